//! Insert and remove.
//!
//! Both run in one transaction block: the row write and its index write
//! commit together or not at all. Failures roll back, reset the connection
//! and surface; nothing is retried, since a retry after partial application
//! could apply index changes twice.

use sparse_map_core::{is_deleted, PropertyMap, StatementSequence};
use tracing::debug;

use super::core::StorageClient;
use super::read_ops::read_row;
use crate::error::{StorageClientError, StorageResult};
use crate::executor::SqlExecutor;
use crate::monitor::op_kind;
use crate::row_id::RowId;
use crate::sql::SqlValue;
use crate::statements::{ops, PreparedStatement, StatementCache};
use crate::transaction::run_in_block;

impl StorageClient {
    /// Merge `changes` into the row stored under `key`.
    ///
    /// A [`Value::Remove`](sparse_map_core::Value::Remove) or
    /// [`Value::Null`](sparse_map_core::Value::Null) change deletes the
    /// property; anything else overwrites it. A row carrying the deleted
    /// marker is cleared before the merge. `probably_new` tries an INSERT
    /// before the UPDATE unless the configured sequence is update-first.
    ///
    /// # Errors
    /// - `InvalidValue` if a change is binary
    /// - `DataFormat` if the merged map cannot be encoded
    /// - `SaveFailed` if neither INSERT nor UPDATE affected the row
    /// - `Sql` for any statement failure
    pub fn insert(
        &mut self,
        keyspace: &str,
        column_family: &str,
        key: &str,
        changes: &PropertyMap,
        probably_new: bool,
    ) -> StorageResult<()> {
        self.check_active()?;
        if let Some((property, _)) = changes.iter().find(|(_, value)| value.is_binary()) {
            return Err(StorageClientError::InvalidValue {
                property: property.clone(),
            });
        }

        let rid = self.hasher.row_id(keyspace, column_family, key);
        let context = format!("insert {}:{}:{} ({})", keyspace, column_family, key, rid);
        let insert_first =
            probably_new && self.config.statement_sequence == StatementSequence::InsertFirst;
        let listener = self.listener.as_deref();
        let codec = self.codec.as_ref();
        let indexer = &self.indexer;

        run_in_block(&mut self.executor, listener, &context, |executor, statements| {
            let mut current = read_row(
                executor,
                codec,
                keyspace,
                column_family,
                &rid,
                Some(&mut *statements),
            )?
            .unwrap_or_default();
            if let Some(listener) = listener {
                listener.before(keyspace, column_family, key, &current);
            }
            if is_deleted(&current) {
                debug!("Resurrecting deleted row {}", rid);
                current.clear();
            }
            merge_changes(&mut current, changes);
            if let Some(listener) = listener {
                listener.after(keyspace, column_family, key, &current);
            }

            let blob = codec
                .encode(rid.as_str(), &current, column_family)
                .map_err(|e| StorageClientError::data_format(rid.as_str(), e))?;
            debug!("Saving {} ({} properties)", context, current.len());
            let write = RowWrite {
                keyspace,
                column_family,
                rid: &rid,
                context: &context,
            };
            write.persist(executor, statements, blob, insert_first)?;

            indexer.index(executor, statements, keyspace, column_family, key, &rid, changes)
        })
    }

    /// Delete the row stored under `key` and its index rows.
    ///
    /// Deleting a missing row succeeds.
    pub fn remove(&mut self, keyspace: &str, column_family: &str, key: &str) -> StorageResult<()> {
        self.check_active()?;
        let rid = self.hasher.row_id(keyspace, column_family, key);
        let context = format!("remove {}:{}:{} ({})", keyspace, column_family, key, rid);
        let listener = self.listener.as_deref();
        if let Some(listener) = listener {
            listener.delete(keyspace, column_family, key);
        }
        let indexer = &self.indexer;

        run_in_block(&mut self.executor, listener, &context, |executor, statements| {
            let params = [SqlValue::from(rid.as_str())];
            let shard = Some(rid.shard());
            for operation in [ops::DELETE_STRING_ROW, ops::BLOCK_DELETE_ROW] {
                let statement = executor.prepare(
                    operation,
                    keyspace,
                    column_family,
                    shard,
                    Some(&mut *statements),
                )?;
                executor
                    .execute(&statement, column_family, op_kind::DELETE, &params)
                    .map_err(|e| StorageClientError::sql(context.as_str(), e))?;
            }
            indexer.remove(executor, statements, keyspace, column_family, &rid)?;
            debug!("Removed {}", context);
            Ok(())
        })
    }
}

/// Apply a change set: removals delete, everything else overwrites.
pub(super) fn merge_changes(current: &mut PropertyMap, changes: &PropertyMap) {
    for (property, value) in changes {
        if value.is_removal() {
            current.remove(property);
        } else {
            current.insert(property.clone(), value.clone());
        }
    }
}

/// One row blob write inside a block.
struct RowWrite<'a> {
    keyspace: &'a str,
    column_family: &'a str,
    rid: &'a RowId,
    context: &'a str,
}

impl RowWrite<'_> {
    fn persist(
        &self,
        executor: &mut SqlExecutor,
        statements: &mut StatementCache,
        blob: Vec<u8>,
        insert_first: bool,
    ) -> StorageResult<()> {
        let written = if insert_first {
            // A failed INSERT usually means the row exists; fall through to UPDATE.
            let inserted = match self.insert(executor, statements, blob.clone()) {
                Ok(rows) => rows,
                Err(e) if e.is_transient() => {
                    debug!("Insert of {} failed, trying update: {}", self.rid, e);
                    0
                }
                Err(e) => return Err(e),
            };
            if inserted > 0 {
                debug!("Inserted {}", self.rid);
                inserted
            } else {
                self.update(executor, statements, blob)?
            }
        } else {
            let updated = self.update(executor, statements, blob.clone())?;
            if updated > 0 {
                debug!("Updated {}", self.rid);
                updated
            } else {
                self.insert(executor, statements, blob)?
            }
        };
        if written == 0 {
            return Err(StorageClientError::SaveFailed {
                rid: self.rid.to_string(),
            });
        }
        Ok(())
    }

    fn insert(
        &self,
        executor: &mut SqlExecutor,
        statements: &mut StatementCache,
        blob: Vec<u8>,
    ) -> StorageResult<usize> {
        let statement = self.prepare(executor, statements, ops::BLOCK_INSERT_ROW)?;
        let params = [SqlValue::from(self.rid.as_str()), executor.blob_param(blob)];
        executor
            .execute(&statement, self.column_family, op_kind::INSERT, &params)
            .map_err(|e| StorageClientError::sql(self.context, e))
    }

    fn update(
        &self,
        executor: &mut SqlExecutor,
        statements: &mut StatementCache,
        blob: Vec<u8>,
    ) -> StorageResult<usize> {
        let statement = self.prepare(executor, statements, ops::BLOCK_UPDATE_ROW)?;
        let params = [executor.blob_param(blob), SqlValue::from(self.rid.as_str())];
        executor
            .execute(&statement, self.column_family, op_kind::UPDATE, &params)
            .map_err(|e| StorageClientError::sql(self.context, e))
    }

    fn prepare(
        &self,
        executor: &SqlExecutor,
        statements: &mut StatementCache,
        operation: &str,
    ) -> StorageResult<PreparedStatement> {
        executor.prepare(
            operation,
            self.keyspace,
            self.column_family,
            Some(self.rid.shard()),
            Some(statements),
        )
    }
}
