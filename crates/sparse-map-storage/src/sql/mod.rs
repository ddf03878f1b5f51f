//! Row-oriented SQL driver seam.
//!
//! The storage client never names a database engine. It talks to a
//! [`ConnectionProvider`] that hands out one live [`SqlConnection`] and can be
//! told to discard and recreate it after a failure.
//!
//! # Implementors
//! - [`sqlite::SqliteProvider`]: rusqlite-backed provider

pub mod sqlite;

use thiserror::Error;

/// A bound parameter or a returned column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Binary stream parameter. `length` is set when the driver needs the
    /// stream length declared before reading it.
    Stream { data: Vec<u8>, length: Option<usize> },
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            SqlValue::Stream { data, .. } => Some(data),
            SqlValue::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(r) => Some(*r as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow {
    columns: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Vec<SqlValue>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get(index)
    }

    pub fn get_str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(SqlValue::as_str)
    }

    pub fn get_bytes(&self, index: usize) -> Option<&[u8]> {
        self.get(index).and_then(SqlValue::as_bytes)
    }

    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(SqlValue::as_i64)
    }
}

/// Failure reported by the driver while preparing or executing a statement.
///
/// The driver's own error, when there is one, is kept as the source.
#[derive(Debug, Error)]
#[error("SQL failure: {message}")]
pub struct SqlError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a driver error, keeping it as the source.
    pub fn from_driver(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The driver error, if this failure came from one.
    pub fn driver_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

/// Forward-only, single-pass cursor over a result set.
///
/// Dropping a cursor releases it.
pub trait RowCursor: Send {
    /// Advance to the next row; `None` once exhausted.
    fn next_row(&mut self) -> Result<Option<SqlRow>, SqlError>;
}

/// A live database connection with driver-style auto-commit semantics.
///
/// While auto-commit is off, statements join an implicit transaction that
/// stays open until `commit` or `rollback`.
pub trait SqlConnection: Send {
    /// Execute a data-modifying statement, returning affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, SqlError>;

    /// Execute one statement for each parameter set, returning affected rows
    /// per set.
    fn execute_batch(&mut self, sql: &str, batch: &[Vec<SqlValue>]) -> Result<Vec<usize>, SqlError>;

    /// Run a query and return a cursor over its rows.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Box<dyn RowCursor>, SqlError>;

    /// Run a query whose rows are unique on `key_column`, for scans that may
    /// be large.
    ///
    /// Drivers that can fetch such results in pages override this; the
    /// default runs a plain [`query`](Self::query).
    fn query_by_key(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> Result<Box<dyn RowCursor>, SqlError> {
        let _ = key_column;
        self.query(sql, params)
    }

    /// Execute an unparameterized schema statement.
    fn execute_ddl(&mut self, sql: &str) -> Result<(), SqlError>;

    fn auto_commit(&self) -> bool;

    /// Switching auto-commit back on commits any open transaction.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), SqlError>;

    fn commit(&mut self) -> Result<(), SqlError>;

    fn rollback(&mut self) -> Result<(), SqlError>;

    /// Cheap liveness check.
    fn validate(&mut self) -> Result<(), SqlError>;
}

/// Supplies the one connection a storage client is bound to.
pub trait ConnectionProvider: Send {
    /// The live connection, created on first use or after a reset.
    fn connection(&mut self) -> Result<&mut dyn SqlConnection, SqlError>;

    /// Discard the current connection. Idempotent and safe after a failure.
    fn reset_connection(&mut self);
}
