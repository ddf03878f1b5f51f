//! Property maps and sparse rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::value::Value;

/// The sparse set of named values stored under one row.
///
/// Ordered so encoded blobs and debug output are deterministic.
pub type PropertyMap = BTreeMap<String, Value>;

/// Reserved property marking a row as logically deleted.
pub const DELETED_FIELD: &str = "_deleted";

/// Value of [`DELETED_FIELD`] on a logically deleted row.
pub const DELETED_MARKER: &str = "Y";

/// Auto-indexed property holding the row id of the parent row.
pub const PARENT_HASH_FIELD: &str = "_:parenthash";

/// True if the map carries the logically-deleted marker.
pub fn is_deleted(map: &PropertyMap) -> bool {
    matches!(map.get(DELETED_FIELD), Some(Value::String(s)) if s == DELETED_MARKER)
}

/// One row produced by a scan or a find: its row id and an immutable snapshot
/// of its properties.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseRow {
    rid: String,
    properties: Arc<PropertyMap>,
}

impl SparseRow {
    pub fn new(rid: impl Into<String>, properties: Arc<PropertyMap>) -> Self {
        Self {
            rid: rid.into(),
            properties,
        }
    }

    pub fn rid(&self) -> &str {
        &self.rid
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Shared handle to the property snapshot.
    pub fn shared_properties(&self) -> Arc<PropertyMap> {
        Arc::clone(&self.properties)
    }
}
