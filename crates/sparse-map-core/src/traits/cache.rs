//! Direct-access cache contract.
//!
//! The storage client serves reads through a cache keyed by row id but never
//! populates it from a write it just performed. Eviction on write belongs to
//! the cache manager.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::PropertyMap;

/// A cached lookup result.
///
/// An empty holder records that the row is known to be absent, which is
/// distinct from a cache miss.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHolder {
    value: Option<Arc<PropertyMap>>,
}

impl CacheHolder {
    pub fn new(value: Arc<PropertyMap>) -> Self {
        Self { value: Some(value) }
    }

    /// A holder recording "known absent".
    pub fn absent() -> Self {
        Self { value: None }
    }

    /// The cached map, or an empty map for a known-absent row.
    pub fn get(&self) -> Arc<PropertyMap> {
        self.value
            .as_ref()
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::new(PropertyMap::new()))
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }
}

/// Cache consulted by row id before any database access.
pub trait DirectCacheAccess: Send + Sync {
    /// Look up a row. `None` is a miss; `Some` short-circuits the database.
    fn get_from_cache(&self, rid: &str) -> Option<CacheHolder>;

    /// Record a row. Implementations may ignore non-cacheable entries.
    fn put_to_cache(&self, rid: &str, holder: CacheHolder, cacheable: bool);
}

/// In-process cache backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheHolder>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn evict(&self, rid: &str) {
        self.entries.write().remove(rid);
    }
}

impl DirectCacheAccess for MemoryCache {
    fn get_from_cache(&self, rid: &str) -> Option<CacheHolder> {
        self.entries.read().get(rid).cloned()
    }

    fn put_to_cache(&self, rid: &str, holder: CacheHolder, cacheable: bool) {
        if cacheable {
            self.entries.write().insert(rid.to_string(), holder);
        }
    }
}
