//! Point reads.

use std::sync::Arc;

use sparse_map_core::{CacheHolder, DirectCacheAccess, PropertyMap};
use tracing::debug;

use super::core::StorageClient;
use crate::error::{StorageClientError, StorageResult};
use crate::executor::SqlExecutor;
use crate::monitor::op_kind;
use crate::row_id::RowId;
use crate::serialization::PropertyCodec;
use crate::sql::SqlValue;
use crate::statements::{ops, StatementCache};

impl StorageClient {
    /// Read the property map stored under `key`.
    ///
    /// A missing row and a row without a blob both read as an empty map.
    /// SQL failures are retried once after a connection reset.
    pub fn get(
        &mut self,
        keyspace: &str,
        column_family: &str,
        key: &str,
    ) -> StorageResult<Arc<PropertyMap>> {
        self.get_cached(keyspace, column_family, key, None)
    }

    /// [`get`](Self::get) through a direct-access cache.
    ///
    /// A cache hit, including a recorded absence, never touches the database.
    /// On a miss the row read from the database is put into the cache.
    pub fn get_cached(
        &mut self,
        keyspace: &str,
        column_family: &str,
        key: &str,
        cache: Option<&dyn DirectCacheAccess>,
    ) -> StorageResult<Arc<PropertyMap>> {
        self.check_active()?;
        let rid = self.hasher.row_id(keyspace, column_family, key);
        if let Some(holder) = cache.and_then(|c| c.get_from_cache(rid.as_str())) {
            debug!("Cache hit for {}:{}:{} ({})", keyspace, column_family, key, rid);
            if holder.is_absent() {
                return Ok(Arc::new(PropertyMap::new()));
            }
            return Ok(holder.get());
        }

        let context = format!("get {}:{}:{} ({})", keyspace, column_family, key, rid);
        let found = self.with_retry(&context, |client| {
            read_row(
                &mut client.executor,
                client.codec.as_ref(),
                keyspace,
                column_family,
                &rid,
                None,
            )
        })?;

        match found {
            Some(properties) => {
                let properties = Arc::new(properties);
                if let Some(cache) = cache {
                    cache.put_to_cache(rid.as_str(), CacheHolder::new(Arc::clone(&properties)), true);
                }
                Ok(properties)
            }
            None => {
                if let Some(cache) = cache {
                    cache.put_to_cache(rid.as_str(), CacheHolder::absent(), true);
                }
                Ok(Arc::new(PropertyMap::new()))
            }
        }
    }
}

/// Select and decode one row.
///
/// `Ok(None)` means no row exists; a row whose blob is null decodes to an
/// empty map. No retry happens here.
pub(super) fn read_row(
    executor: &mut SqlExecutor,
    codec: &dyn PropertyCodec,
    keyspace: &str,
    column_family: &str,
    rid: &RowId,
    statements: Option<&mut StatementCache>,
) -> StorageResult<Option<PropertyMap>> {
    let context = || format!("select {}:{} ({})", keyspace, column_family, rid);
    let statement = executor.prepare(
        ops::BLOCK_SELECT_ROW,
        keyspace,
        column_family,
        Some(rid.shard()),
        statements,
    )?;
    let mut cursor = executor
        .query(
            &statement,
            column_family,
            op_kind::SELECT,
            &[SqlValue::from(rid.as_str())],
        )
        .map_err(|e| StorageClientError::sql(context(), e))?;
    let row = cursor
        .next_row()
        .map_err(|e| StorageClientError::sql(context(), e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    match row.get_bytes(0) {
        Some(bytes) => codec
            .decode(rid.as_str(), column_family, bytes)
            .map(Some)
            .map_err(|e| StorageClientError::data_format(rid.as_str(), e)),
        None => Ok(Some(PropertyMap::new())),
    }
}
