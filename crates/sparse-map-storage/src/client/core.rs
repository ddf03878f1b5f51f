//! Core `StorageClient` struct, its builder and lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//!  build ──> active ──passivate/close──> passive ──activate──> active
//!              │                            │
//!              └──────────destroy───────────┴──> destroyed (terminal)
//! ```
//!
//! Passivating force-closes every open row iterator and body stream and
//! reverts the metrics sink to the pool's. Any data operation on a passive or
//! destroyed client fails with [`StorageClientError::Lifecycle`] carrying the
//! backtrace of the call that released it.

use std::backtrace::Backtrace;
use std::sync::Arc;

use sparse_map_core::{
    NoopStatsService, StatsService, StorageClientListener, StorageConfig,
};
use tracing::{debug, info, warn};

use super::schema::sync_index_columns;
use crate::content::StreamedContentHelper;
use crate::diagnostics::LeakCounters;
use crate::disposables::DisposableRegistry;
use crate::error::{StorageClientError, StorageResult};
use crate::executor::SqlExecutor;
use crate::indexer::{IndexColumns, Indexer};
use crate::monitor::SlowQueryMonitor;
use crate::row_id::RowHasher;
use crate::serialization::{MessagePackCodec, PropertyCodec};
use crate::sql::ConnectionProvider;
use crate::statements::SqlStatements;

/// Sparse multi-column-family key/value storage over one SQL connection.
///
/// Rows are addressed by `(keyspace, column_family, key)`, hashed into a row
/// id. Each row is a property map stored as one encoded blob, with indexed
/// properties mirrored into a secondary index inside the same transaction.
///
/// # Example
///
/// ```rust
/// use sparse_map_core::{PropertyMap, StorageConfig, Value};
/// use sparse_map_storage::sql::sqlite::SqliteProvider;
/// use sparse_map_storage::{SqlStatements, StorageClient};
///
/// let mut provider = SqliteProvider::in_memory();
/// provider
///     .apply_schema("CREATE TABLE css_b (rid TEXT PRIMARY KEY, b BLOB);")
///     .unwrap();
/// let mut statements = SqlStatements::new();
/// statements.insert("block-select-row", "SELECT b FROM css_b WHERE rid = ?");
/// statements.insert("block-insert-row", "INSERT INTO css_b (rid, b) VALUES (?, ?)");
/// statements.insert("block-update-row", "UPDATE css_b SET b = ? WHERE rid = ?");
///
/// let mut client = StorageClient::builder(Box::new(provider), statements)
///     .config(StorageConfig::default())
///     .build()
///     .unwrap();
///
/// let mut changes = PropertyMap::new();
/// changes.insert("title".to_string(), Value::from("hello"));
/// client.insert("n", "cn", "/a", &changes, true).unwrap();
///
/// let row = client.get("n", "cn", "/a").unwrap();
/// assert_eq!(row.get("title"), Some(&Value::from("hello")));
/// ```
pub struct StorageClient {
    pub(super) executor: SqlExecutor,
    pub(super) config: StorageConfig,
    pub(super) hasher: RowHasher,
    pub(super) codec: Arc<dyn PropertyCodec>,
    pub(super) indexer: Indexer,
    pub(super) index_columns: IndexColumns,
    pub(super) disposables: DisposableRegistry,
    pub(super) content: Option<Arc<dyn StreamedContentHelper>>,
    pub(super) listener: Option<Arc<dyn StorageClientListener>>,
    pool_stats: Arc<dyn StatsService>,
    active: bool,
    passivated_at: Option<String>,
    destroyed_at: Option<String>,
}

/// Assembles a [`StorageClient`].
pub struct StorageClientBuilder {
    provider: Box<dyn ConnectionProvider>,
    statements: SqlStatements,
    config: StorageConfig,
    codec: Arc<dyn PropertyCodec>,
    stats: Arc<dyn StatsService>,
    listener: Option<Arc<dyn StorageClientListener>>,
    content: Option<Arc<dyn StreamedContentHelper>>,
}

impl StorageClientBuilder {
    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PropertyCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// The pool's metrics sink, restored whenever the client is passivated.
    pub fn stats_service(mut self, stats: Arc<dyn StatsService>) -> Self {
        self.stats = stats;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn StorageClientListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn content_helper(mut self, helper: Arc<dyn StreamedContentHelper>) -> Self {
        self.content = Some(helper);
        self
    }

    /// Validate configuration, synchronize wide index columns when the
    /// statements support them, and pick the index strategy.
    ///
    /// # Errors
    /// - `Config` for an invalid configuration or unknown digest
    /// - `ColumnCollision` when two indexed properties derive the same column
    /// - `Sql` when the synchronizer cannot read or extend the schema
    pub fn build(self) -> StorageResult<StorageClient> {
        self.config.validate()?;
        let hasher = RowHasher::from_config(&self.config)?;
        let index_columns = IndexColumns::from_config(&self.config)?;
        let monitor = SlowQueryMonitor::from_config(&self.config, Arc::clone(&self.stats));
        let mut executor = SqlExecutor::new(
            self.provider,
            Arc::new(self.statements),
            monitor,
            LeakCounters::new(),
            self.config.declares_stream_length(),
        );

        let wide_mapping = sync_index_columns(&mut executor, &self.config, &index_columns)?;
        let indexer = Indexer::select(&self.config, index_columns.clone(), wide_mapping);
        info!(
            "Storage client ready: {} indexer, {} indexed columns, {} row ids",
            indexer.name(),
            index_columns.len(),
            hasher.algorithm()
        );

        Ok(StorageClient {
            executor,
            config: self.config,
            hasher,
            codec: self.codec,
            indexer,
            index_columns,
            disposables: DisposableRegistry::new(),
            content: self.content,
            listener: self.listener,
            pool_stats: self.stats,
            active: true,
            passivated_at: None,
            destroyed_at: None,
        })
    }
}

impl StorageClient {
    /// Start building a client over `provider` using `statements`.
    pub fn builder(
        provider: Box<dyn ConnectionProvider>,
        statements: SqlStatements,
    ) -> StorageClientBuilder {
        StorageClientBuilder {
            provider,
            statements,
            config: StorageConfig::default(),
            codec: Arc::new(MessagePackCodec::new()),
            stats: Arc::new(NoopStatsService),
            listener: None,
            content: None,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn hasher(&self) -> &RowHasher {
        &self.hasher
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn index_columns(&self) -> &IndexColumns {
        &self.index_columns
    }

    pub fn leak_counters(&self) -> &LeakCounters {
        self.executor.counters()
    }

    /// Iterators and body streams not yet closed.
    pub fn open_disposables(&self) -> usize {
        self.disposables.len()
    }

    pub fn is_active(&self) -> bool {
        self.active && self.destroyed_at.is_none()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed_at.is_some()
    }

    /// Return a passive client to service.
    pub fn activate(&mut self) -> StorageResult<()> {
        self.check_not_destroyed()?;
        self.passivated_at = None;
        self.active = true;
        debug!("Storage client activated");
        Ok(())
    }

    /// Take the client out of service, closing its open resources.
    pub fn passivate(&mut self) {
        if !self.active || self.destroyed_at.is_some() {
            return;
        }
        self.executor.monitor_mut().set_stats(Arc::clone(&self.pool_stats));
        self.passivated_at = Some(capture_traceback());
        let closed = self.disposables.dispose_all();
        self.active = false;
        debug!("Storage client passivated, {} resources force-closed", closed);
    }

    /// Same as [`passivate`](Self::passivate).
    pub fn close(&mut self) {
        self.passivate();
    }

    /// Release the client for good and drop its connection.
    pub fn destroy(&mut self) {
        if self.destroyed_at.is_some() {
            return;
        }
        let closed = self.disposables.dispose_all();
        self.executor.reset();
        self.destroyed_at = Some(capture_traceback());
        self.active = false;
        info!("Storage client destroyed, {} resources force-closed", closed);
    }

    /// Check the connection is usable. Allowed while passive.
    pub fn validate(&mut self) -> StorageResult<bool> {
        self.check_not_destroyed()?;
        match self.executor.connection().and_then(|c| c.validate()) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Failed to validate connection: {}", e);
                self.executor.reset();
                Ok(false)
            }
        }
    }

    /// Report to a session-specific metrics sink until the next passivate.
    pub fn set_stats_service(&mut self, stats: Arc<dyn StatsService>) {
        self.executor.monitor_mut().set_stats(stats);
    }

    pub(super) fn check_active(&self) -> StorageResult<()> {
        self.check_not_destroyed()?;
        if self.active {
            return Ok(());
        }
        warn!("Using a passive storage client");
        Err(StorageClientError::Lifecycle {
            message: "Client has been passivated".to_string(),
            traceback: self
                .passivated_at
                .clone()
                .unwrap_or_else(|| "no passivate location".to_string()),
        })
    }

    fn check_not_destroyed(&self) -> StorageResult<()> {
        match &self.destroyed_at {
            Some(traceback) => {
                warn!("Using a destroyed storage client");
                Err(StorageClientError::Lifecycle {
                    message: "Client was destroyed".to_string(),
                    traceback: traceback.clone(),
                })
            }
            None => Ok(()),
        }
    }

    /// Run `op`; on a SQL failure reset the connection and run it once more.
    pub(super) fn with_retry<T>(
        &mut self,
        context: &str,
        mut op: impl FnMut(&mut Self) -> StorageResult<T>,
    ) -> StorageResult<T> {
        match op(self) {
            Err(e) if e.is_transient() => {
                warn!("{} failed, resetting connection and retrying: {}", context, e);
                self.executor.reset();
                let retried = op(self);
                if let Err(e) = &retried {
                    warn!("{} failed after retry: {}", context, e);
                    if e.is_transient() {
                        self.executor.reset();
                    }
                }
                retried
            }
            other => other,
        }
    }
}

fn capture_traceback() -> String {
    Backtrace::force_capture().to_string()
}
