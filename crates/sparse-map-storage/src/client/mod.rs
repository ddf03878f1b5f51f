//! The storage client.
//!
//! One [`StorageClient`] is bound to one connection. Concurrency comes from
//! pooling several clients, never from sharing one across threads.
//!
//! # Operations
//!
//! | Operation | Failure handling |
//! |-----------|------------------|
//! | `get`, `get_cached` | reset the connection and retry once |
//! | `list_all`, `all_count`, `find`, `list_children` | reset the connection and retry once |
//! | `insert`, `remove` | roll back the block, reset the connection, surface |
//! | `sync_index_columns` | surface |
//!
//! # Module Structure
//! - `core`: struct, builder, lifecycle, retry helper
//! - `read_ops`: point reads
//! - `write_ops`: insert and remove
//! - `scan_ops`: list, count, find
//! - `schema`: wide index column synchronizer
//! - `content_ops`: streamed bodies

mod content_ops;
mod core;
mod read_ops;
mod scan_ops;
mod schema;
mod write_ops;

#[cfg(test)]
mod tests_lifecycle;
#[cfg(test)]
mod tests_read_write;
#[cfg(test)]
mod tests_schema;

pub use self::core::{StorageClient, StorageClientBuilder};
pub use schema::{make_name_safe_sql, PARENT_HASH_COLUMN};
