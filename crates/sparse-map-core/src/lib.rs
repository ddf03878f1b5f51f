//! Sparse Map Core
//!
//! Data model and contracts shared by the sparse map storage client.
//!
//! # Architecture
//! - `types`: Property values, property maps and sparse rows
//! - `config`: Storage client configuration (`StorageConfig`)
//! - `traits`: Collaborator contracts (direct-access cache, stats sink, listener)
//! - `error`: Core error type (`CoreError`)
//!
//! # Data Model
//! keyspace → column family → key → map of named properties. A property map is
//! sparse and schema-less; each row is addressed by a deterministic row id
//! derived from the (keyspace, column family, key) triple.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{HashAlgorithm, StatementSequence, StorageConfig};
pub use error::{CoreError, CoreResult};
pub use traits::{
    CacheHolder, DirectCacheAccess, MemoryCache, NoopStatsService, StatsService,
    StorageClientListener,
};
pub use types::{
    is_deleted, PropertyMap, SparseRow, Value, DELETED_FIELD, DELETED_MARKER, PARENT_HASH_FIELD,
};
