//! Scans, counts and predicate queries.
//!
//! Each returns a lazy [`SparseRowIterator`] registered with the client, so
//! passivating the client force-closes it. SQL failures while opening the
//! cursor are retried once after a connection reset; failures while
//! iterating end the sequence.

use std::sync::Arc;

use sparse_map_core::{DirectCacheAccess, PropertyMap, Value, PARENT_HASH_FIELD};

use super::core::StorageClient;
use crate::error::{StorageClientError, StorageResult};
use crate::indexer::FindContext;
use crate::iter::{SparseRowIterator, ROW_KEY_COLUMN};
use crate::monitor::op_kind;
use crate::statements::ops;

impl StorageClient {
    /// Every row of `column_family`, including deleted ones.
    ///
    /// Rows that fail to decode are logged and skipped.
    pub fn list_all(
        &mut self,
        keyspace: &str,
        column_family: &str,
    ) -> StorageResult<SparseRowIterator> {
        self.check_active()?;
        let context = format!("list all {}:{}", keyspace, column_family);
        self.with_retry(&context, |client| {
            let statement = client
                .executor
                .prepare(ops::LIST_ALL, keyspace, column_family, None, None)?;
            let cursor = client
                .executor
                .query_by_key(&statement, column_family, op_kind::LIST_ALL, &[], ROW_KEY_COLUMN)
                .map_err(|e| StorageClientError::sql(context.as_str(), e))?;
            Ok(SparseRowIterator::new(
                cursor,
                &client.disposables,
                Arc::clone(&client.codec),
                column_family,
            ))
        })
    }

    /// Number of rows in `column_family`; 0 when the count returns no row.
    pub fn all_count(&mut self, keyspace: &str, column_family: &str) -> StorageResult<u64> {
        self.check_active()?;
        let context = format!("count {}:{}", keyspace, column_family);
        self.with_retry(&context, |client| {
            let statement = client
                .executor
                .prepare(ops::LIST_ALL_COUNT, keyspace, column_family, None, None)?;
            let mut cursor = client
                .executor
                .query(&statement, column_family, op_kind::COUNT, &[])
                .map_err(|e| StorageClientError::sql(context.as_str(), e))?;
            let row = cursor
                .next_row()
                .map_err(|e| StorageClientError::sql(context.as_str(), e))?;
            Ok(row
                .and_then(|r| r.get_i64(0))
                .map(|n| n.max(0) as u64)
                .unwrap_or(0))
        })
    }

    /// Rows of `column_family` matching every indexed predicate.
    ///
    /// Predicates on properties that are not indexed are ignored. An array
    /// predicate matches any of its elements. `_items` and `_page` select a
    /// page of results. Deleted rows are never returned.
    pub fn find(
        &mut self,
        keyspace: &str,
        column_family: &str,
        predicates: &PropertyMap,
        cache: Option<Arc<dyn DirectCacheAccess>>,
    ) -> StorageResult<SparseRowIterator> {
        self.check_active()?;
        let context = format!("find {}:{}", keyspace, column_family);
        self.with_retry(&context, |client| {
            let find_context = FindContext {
                registry: &client.disposables,
                codec: Arc::clone(&client.codec),
                cache: cache.clone(),
            };
            client.indexer.find(
                &mut client.executor,
                &find_context,
                keyspace,
                column_family,
                predicates,
            )
        })
    }

    /// Rows whose parent is the row stored under `key`.
    pub fn list_children(
        &mut self,
        keyspace: &str,
        column_family: &str,
        key: &str,
        cache: Option<Arc<dyn DirectCacheAccess>>,
    ) -> StorageResult<SparseRowIterator> {
        self.check_active()?;
        let parent = self.hasher.row_id(keyspace, column_family, key);
        let mut predicates = PropertyMap::new();
        predicates.insert(PARENT_HASH_FIELD.to_string(), Value::from(parent.into_string()));
        self.find(keyspace, column_family, &predicates, cache)
    }
}
