//! Sparse Map Storage Client
//!
//! Stores sparse property maps, addressed by keyspace, column family and key,
//! as encoded blobs in a relational database, with indexed properties
//! mirrored into a secondary index for predicate queries.
//!
//! # Architecture
//! - `client`: The storage client (reads, writes, scans, lifecycle)
//! - `row_id`: Row identity hashing and shard tags
//! - `statements`: SQL templates and the shard-aware statement resolver
//! - `sql`: Driver seam (`SqlConnection`, `ConnectionProvider`) and SQLite driver
//! - `executor`: Timed, leak-counted statement execution
//! - `transaction`: Transaction blocks with auto-commit restoration
//! - `indexer`: Wide-column, batched and non-batched index strategies
//! - `iter`: Lazy row iterators
//! - `serialization`: Property map codec (MessagePack)
//! - `content`: Streamed body storage
//! - `disposables`: Force-closable resource registry
//! - `diagnostics`: Leak counters
//! - `monitor`: Slow query monitor
//! - `error`: Error types (`StorageClientError`)
//!
//! # Statement Files
//! `sql/sqlite.toml` holds the default statements, `sql/sqlite-wide.toml` adds
//! wide index columns on top, and `sql/sqlite.ddl` creates the schema both
//! expect.

pub mod client;
pub mod content;
pub mod diagnostics;
pub mod disposables;
pub mod error;
pub mod executor;
pub mod indexer;
pub mod iter;
pub mod monitor;
pub mod row_id;
pub mod serialization;
pub mod sql;
pub mod statements;
pub mod transaction;

// Re-export the client surface
pub use client::{make_name_safe_sql, StorageClient, StorageClientBuilder};
pub use content::{BodyStream, FileStreamContentHelper, StreamedContentHelper};
pub use error::{StorageClientError, StorageResult};
pub use indexer::{IndexColumns, Indexer};
pub use iter::SparseRowIterator;
pub use row_id::{RowHasher, RowId};
pub use serialization::{CodecError, MessagePackCodec, PropertyCodec};
pub use statements::SqlStatements;

// Re-export core types for storage consumers
pub use sparse_map_core::{
    CacheHolder, DirectCacheAccess, PropertyMap, SparseRow, StorageConfig, Value,
};
