//! Statement execution against the client's connection.
//!
//! [`SqlExecutor`] resolves statement keys, times each execution through the
//! slow-query monitor, and counts outstanding statements and cursors. It does
//! no retrying and no error wrapping: callers decide between retry and
//! rollback and attach their own context.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::diagnostics::{counter, CounterGuard, LeakCounters};
use crate::error::StorageResult;
use crate::monitor::SlowQueryMonitor;
use crate::sql::{ConnectionProvider, RowCursor, SqlConnection, SqlError, SqlRow, SqlValue};
use crate::statements::{format_template, PreparedStatement, SqlStatements, StatementCache};

/// A cursor that holds its leak-counter guard until dropped.
pub struct TrackedCursor {
    cursor: Box<dyn RowCursor>,
    _guard: CounterGuard,
}

impl TrackedCursor {
    pub fn next_row(&mut self) -> Result<Option<SqlRow>, SqlError> {
        self.cursor.next_row()
    }
}

pub struct SqlExecutor {
    provider: Box<dyn ConnectionProvider>,
    statements: Arc<SqlStatements>,
    monitor: SlowQueryMonitor,
    counters: LeakCounters,
    declares_stream_length: bool,
}

impl SqlExecutor {
    pub fn new(
        provider: Box<dyn ConnectionProvider>,
        statements: Arc<SqlStatements>,
        monitor: SlowQueryMonitor,
        counters: LeakCounters,
        declares_stream_length: bool,
    ) -> Self {
        Self {
            provider,
            statements,
            monitor,
            counters,
            declares_stream_length,
        }
    }

    pub fn statements(&self) -> &SqlStatements {
        &self.statements
    }

    pub fn monitor(&self) -> &SlowQueryMonitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut SlowQueryMonitor {
        &mut self.monitor
    }

    pub fn counters(&self) -> &LeakCounters {
        &self.counters
    }

    /// Resolve a statement, reusing the block's cache when one is given.
    pub fn prepare(
        &self,
        operation: &str,
        keyspace: &str,
        column_family: &str,
        shard: Option<char>,
        cache: Option<&mut StatementCache>,
    ) -> StorageResult<PreparedStatement> {
        self.prepare_formatted(operation, keyspace, column_family, shard, &[], cache)
    }

    /// Resolve a template and fill its `{n}` placeholders with `args`.
    pub fn prepare_formatted(
        &self,
        operation: &str,
        keyspace: &str,
        column_family: &str,
        shard: Option<char>,
        args: &[&str],
        cache: Option<&mut StatementCache>,
    ) -> StorageResult<PreparedStatement> {
        let (key, template) = self
            .statements
            .resolve(operation, keyspace, column_family, shard)?;
        let cache_key = if args.is_empty() {
            key.clone()
        } else {
            format!("{}|{}", key, args.join("|"))
        };
        match cache {
            Some(cache) => {
                let sql = match cache.lookup(&cache_key) {
                    Some(sql) => sql,
                    None => {
                        let sql: Arc<str> = Arc::from(format_template(template, args));
                        let guard = self.counters.acquire(counter::CACHED_STATEMENT);
                        cache.store(cache_key, Arc::clone(&sql), guard);
                        sql
                    }
                };
                Ok(PreparedStatement::new(key, sql, None))
            }
            None => {
                let guard = self.counters.acquire(counter::STATEMENT);
                let sql = Arc::from(format_template(template, args));
                Ok(PreparedStatement::new(key, sql, Some(guard)))
            }
        }
    }

    /// The live connection, opening one if needed.
    pub fn connection(&mut self) -> Result<&mut dyn SqlConnection, SqlError> {
        self.provider.connection()
    }

    /// Discard the connection; the next statement opens a fresh one.
    pub fn reset(&mut self) {
        debug!("Resetting connection");
        self.provider.reset_connection();
    }

    pub fn execute(
        &mut self,
        statement: &PreparedStatement,
        column_family: &str,
        kind: &str,
        params: &[SqlValue],
    ) -> Result<usize, SqlError> {
        debug!("Executing {} {:?}", statement.key(), statement.sql());
        let started = Instant::now();
        let count = self.provider.connection()?.execute(statement.sql(), params)?;
        self.monitor.record(column_family, kind, started, statement.sql());
        Ok(count)
    }

    pub fn execute_batch(
        &mut self,
        statement: &PreparedStatement,
        column_family: &str,
        kind: &str,
        batch: &[Vec<SqlValue>],
    ) -> Result<Vec<usize>, SqlError> {
        debug!(
            "Executing batch of {} {}",
            batch.len(),
            statement.key()
        );
        let started = Instant::now();
        let counts = self
            .provider
            .connection()?
            .execute_batch(statement.sql(), batch)?;
        self.monitor.record(column_family, kind, started, statement.sql());
        Ok(counts)
    }

    pub fn query(
        &mut self,
        statement: &PreparedStatement,
        column_family: &str,
        kind: &str,
        params: &[SqlValue],
    ) -> Result<TrackedCursor, SqlError> {
        debug!("Querying {} {:?}", statement.key(), statement.sql());
        let started = Instant::now();
        let cursor = self.provider.connection()?.query(statement.sql(), params)?;
        self.monitor.record(column_family, kind, started, statement.sql());
        Ok(TrackedCursor {
            cursor,
            _guard: self.counters.acquire(counter::CURSOR),
        })
    }

    /// Query rows unique on `key_column`, letting the driver page through a
    /// large result.
    pub fn query_by_key(
        &mut self,
        statement: &PreparedStatement,
        column_family: &str,
        kind: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> Result<TrackedCursor, SqlError> {
        debug!("Querying {} by {} {:?}", statement.key(), key_column, statement.sql());
        let started = Instant::now();
        let cursor = self
            .provider
            .connection()?
            .query_by_key(statement.sql(), params, key_column)?;
        self.monitor.record(column_family, kind, started, statement.sql());
        Ok(TrackedCursor {
            cursor,
            _guard: self.counters.acquire(counter::CURSOR),
        })
    }

    /// Run an unparameterized schema statement.
    pub fn execute_ddl(&mut self, sql: &str) -> Result<(), SqlError> {
        debug!("Executing DDL {}", sql);
        self.provider.connection()?.execute_ddl(sql)
    }

    /// Bind a blob, declaring its length when the driver level requires it.
    pub fn blob_param(&self, bytes: Vec<u8>) -> SqlValue {
        if self.declares_stream_length {
            let length = bytes.len();
            SqlValue::Stream {
                data: bytes,
                length: Some(length),
            }
        } else {
            SqlValue::Blob(bytes)
        }
    }
}
