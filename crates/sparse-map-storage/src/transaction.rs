//! Transaction blocks.
//!
//! A block spans one row mutation and its index mutation. It captures the
//! connection's auto-commit mode on entry, turns auto-commit off, and always
//! restores the captured mode on exit. The block commits only when the
//! captured mode was auto-commit; otherwise an enclosing transaction owns the
//! commit.
//!
//! Statements resolved inside a block are cached for its lifetime.

use sparse_map_core::StorageClientListener;
use tracing::{debug, warn};

use crate::error::{StorageClientError, StorageResult};
use crate::executor::SqlExecutor;
use crate::sql::SqlError;
use crate::statements::StatementCache;

pub struct TransactionBlock {
    prior_auto_commit: bool,
    statements: StatementCache,
}

impl TransactionBlock {
    /// Capture the auto-commit mode and switch it off.
    pub fn begin(executor: &mut SqlExecutor) -> Result<Self, SqlError> {
        let connection = executor.connection()?;
        let prior_auto_commit = connection.auto_commit();
        connection.set_auto_commit(false)?;
        debug!("Begin block, prior auto-commit {}", prior_auto_commit);
        Ok(Self {
            prior_auto_commit,
            statements: StatementCache::new(),
        })
    }

    pub fn prior_auto_commit(&self) -> bool {
        self.prior_auto_commit
    }

    pub fn statements(&mut self) -> &mut StatementCache {
        &mut self.statements
    }

    /// Commit if this block owns the transaction, then restore auto-commit.
    pub fn commit(self, executor: &mut SqlExecutor) -> Result<(), SqlError> {
        let connection = executor.connection()?;
        if self.prior_auto_commit {
            connection.commit()?;
        }
        connection.set_auto_commit(self.prior_auto_commit)?;
        debug!("Committed block");
        Ok(())
    }

    /// Roll back and restore auto-commit. Failures are logged, not raised:
    /// the caller is already handling the error that caused the rollback.
    pub fn rollback(self, executor: &mut SqlExecutor) {
        match executor.connection() {
            Ok(connection) => {
                if let Err(e) = connection.rollback() {
                    warn!("Rollback failed: {}", e);
                }
                if let Err(e) = connection.set_auto_commit(self.prior_auto_commit) {
                    warn!("Failed to restore auto-commit: {}", e);
                }
            }
            Err(e) => warn!("No connection to roll back: {}", e),
        }
    }
}

/// Run `body` inside a transaction block.
///
/// On success the block commits. On any error the block rolls back, the
/// connection is reset if the error came from SQL, and the error is returned.
/// Auto-commit is restored on every path.
pub fn run_in_block<T, F>(
    executor: &mut SqlExecutor,
    listener: Option<&dyn StorageClientListener>,
    context: &str,
    body: F,
) -> StorageResult<T>
where
    F: FnOnce(&mut SqlExecutor, &mut StatementCache) -> StorageResult<T>,
{
    let mut block = match TransactionBlock::begin(executor) {
        Ok(block) => block,
        Err(e) => {
            executor.reset();
            return Err(StorageClientError::sql(context, e));
        }
    };
    if let Some(listener) = listener {
        listener.begin();
    }

    let result = body(executor, block.statements());
    match result {
        Ok(value) => match block.commit(executor) {
            Ok(()) => {
                if let Some(listener) = listener {
                    listener.commit();
                }
                Ok(value)
            }
            Err(e) => {
                warn!("Commit failed on {}: {}", context, e);
                // The connection state is unknown after a failed commit.
                executor.reset();
                if let Some(listener) = listener {
                    listener.rollback();
                }
                Err(StorageClientError::sql(context, e))
            }
        },
        Err(e) => {
            block.rollback(executor);
            if let Some(listener) = listener {
                listener.rollback();
            }
            if e.is_transient() {
                executor.reset();
            }
            Err(e)
        }
    }
}
