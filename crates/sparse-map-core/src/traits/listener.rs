//! Storage client listener.

use crate::types::PropertyMap;

/// Observer of storage client activity. Every hook defaults to a no-op.
pub trait StorageClientListener: Send + Sync {
    /// A transaction block was opened.
    fn begin(&self) {}

    /// A transaction block committed.
    fn commit(&self) {}

    /// A transaction block rolled back.
    fn rollback(&self) {}

    /// A row is about to be removed.
    fn delete(&self, _keyspace: &str, _column_family: &str, _key: &str) {}

    /// The current map was read, before changes are merged.
    fn before(&self, _keyspace: &str, _column_family: &str, _key: &str, _current: &PropertyMap) {}

    /// Changes were merged; this map is about to be persisted.
    fn after(&self, _keyspace: &str, _column_family: &str, _key: &str, _merged: &PropertyMap) {}
}
