//! SQLite driver built on rusqlite.
//!
//! SQLite has no client-side auto-commit switch, so [`SqliteConnection`]
//! emulates it: with auto-commit off, the first statement opens a transaction
//! with `BEGIN` and it stays open until `commit` or `rollback`.
//!
//! rusqlite result sets borrow their statement, so a cursor cannot hold one
//! open. Plain queries are buffered whole. Keyed queries page through the
//! result on the key column, [`KEYSET_PAGE_SIZE`] rows per fetch, so a scan
//! over a large family only holds one page in memory.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, ToSql};
use tracing::debug;

use super::{ConnectionProvider, RowCursor, SqlConnection, SqlError, SqlRow, SqlValue};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rows fetched per page by keyed queries.
pub const KEYSET_PAGE_SIZE: usize = 256;

impl From<rusqlite::Error> for SqlError {
    fn from(e: rusqlite::Error) -> Self {
        SqlError::from_driver(e)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            // SQLite always knows the blob length; a declared length is ignored.
            SqlValue::Stream { data, .. } => ToSqlOutput::Borrowed(ValueRef::Blob(data)),
        })
    }
}

fn from_sqlite(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(i),
        Value::Real(r) => SqlValue::Real(r),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Blob(b),
    }
}

/// Run `sql` and collect every row.
fn fetch_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<VecDeque<SqlRow>, SqlError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut fetched = VecDeque::new();
    while let Some(row) = rows.next()? {
        let mut columns = Vec::with_capacity(column_count);
        for i in 0..column_count {
            columns.push(from_sqlite(row.get::<_, Value>(i)?));
        }
        fetched.push_back(SqlRow::new(columns));
    }
    Ok(fetched)
}

/// Cursor over rows already fetched from SQLite.
struct BufferedCursor {
    rows: VecDeque<SqlRow>,
}

impl RowCursor for BufferedCursor {
    fn next_row(&mut self) -> Result<Option<SqlRow>, SqlError> {
        Ok(self.rows.pop_front())
    }
}

/// Cursor fetching one page at a time, resuming after the last key seen.
///
/// The key must be the first column of the wrapped query. The cursor holds
/// the connection weakly: once the connection is reset, fetching the next
/// page fails.
struct KeysetCursor {
    conn: Weak<Mutex<rusqlite::Connection>>,
    paged_sql: String,
    params: Vec<SqlValue>,
    page: VecDeque<SqlRow>,
    last_key: String,
    exhausted: bool,
}

impl KeysetCursor {
    fn open(
        conn: &Arc<Mutex<rusqlite::Connection>>,
        sql: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> Result<Self, SqlError> {
        let paged_sql = format!(
            "SELECT * FROM ({sql}) AS keyset WHERE keyset.{key} > ? ORDER BY keyset.{key} LIMIT {limit}",
            sql = sql,
            key = key_column,
            limit = KEYSET_PAGE_SIZE,
        );
        let mut cursor = Self {
            conn: Arc::downgrade(conn),
            paged_sql,
            params: params.to_vec(),
            page: VecDeque::new(),
            last_key: String::new(),
            exhausted: false,
        };
        cursor.fetch_page()?;
        Ok(cursor)
    }

    fn fetch_page(&mut self) -> Result<(), SqlError> {
        let conn = self
            .conn
            .upgrade()
            .ok_or_else(|| SqlError::new("connection was reset while a cursor was open"))?;
        let mut params = self.params.clone();
        params.push(SqlValue::from(self.last_key.as_str()));
        self.page = fetch_rows(&conn.lock(), &self.paged_sql, &params)?;
        if self.page.len() < KEYSET_PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(key) = self.page.back().and_then(|row| row.get_str(0)) {
            self.last_key = key.to_string();
        }
        debug!("Fetched page of {} rows after key {:?}", self.page.len(), self.last_key);
        Ok(())
    }
}

impl RowCursor for KeysetCursor {
    fn next_row(&mut self) -> Result<Option<SqlRow>, SqlError> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        Ok(self.page.pop_front())
    }
}

/// One rusqlite connection with emulated auto-commit.
///
/// The handle is shared with open keyed cursors so they can fetch later
/// pages.
pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
    auto_commit: bool,
}

impl SqliteConnection {
    pub fn open(path: &Path) -> Result<Self, SqlError> {
        let conn = rusqlite::Connection::open(path)?;
        Self::configure(conn)
    }

    pub fn open_in_memory() -> Result<Self, SqlError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: rusqlite::Connection) -> Result<Self, SqlError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            auto_commit: true,
        })
    }

    /// SQLite itself reports whether a transaction is open.
    fn in_transaction(&self) -> bool {
        !self.conn.lock().is_autocommit()
    }

    fn ensure_transaction(&mut self) -> Result<(), SqlError> {
        if !self.auto_commit && !self.in_transaction() {
            self.conn.lock().execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

impl SqlConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, SqlError> {
        self.ensure_transaction()?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        Ok(changed)
    }

    fn execute_batch(&mut self, sql: &str, batch: &[Vec<SqlValue>]) -> Result<Vec<usize>, SqlError> {
        self.ensure_transaction()?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let mut counts = Vec::with_capacity(batch.len());
        for params in batch {
            counts.push(stmt.execute(params_from_iter(params.iter()))?);
        }
        Ok(counts)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Box<dyn RowCursor>, SqlError> {
        self.ensure_transaction()?;
        let rows = fetch_rows(&self.conn.lock(), sql, params)?;
        Ok(Box::new(BufferedCursor { rows }))
    }

    fn query_by_key(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> Result<Box<dyn RowCursor>, SqlError> {
        self.ensure_transaction()?;
        Ok(Box::new(KeysetCursor::open(&self.conn, sql, params, key_column)?))
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), SqlError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), SqlError> {
        if auto_commit && self.in_transaction() {
            self.commit()?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqlError> {
        if self.in_transaction() {
            self.conn.lock().execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlError> {
        if self.in_transaction() {
            self.conn.lock().execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<(), SqlError> {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Where a [`SqliteProvider`] opens its connections.
#[derive(Debug, Clone)]
pub enum SqliteTarget {
    /// Private in-memory database. A reset discards all data.
    Memory,
    File(PathBuf),
}

/// Provider of a single SQLite connection, reopened lazily after a reset.
pub struct SqliteProvider {
    target: SqliteTarget,
    connection: Option<SqliteConnection>,
    opened: usize,
}

impl SqliteProvider {
    pub fn new(target: SqliteTarget) -> Self {
        Self {
            target,
            connection: None,
            opened: 0,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(SqliteTarget::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::new(SqliteTarget::Memory)
    }

    /// Number of physical connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.opened
    }

    /// Run a schema script (statements separated by `;`).
    pub fn apply_schema(&mut self, ddl: &str) -> Result<(), SqlError> {
        self.connection()?.execute_ddl(ddl)
    }

    fn open(&self) -> Result<SqliteConnection, SqlError> {
        match &self.target {
            SqliteTarget::Memory => SqliteConnection::open_in_memory(),
            SqliteTarget::File(path) => SqliteConnection::open(path),
        }
    }
}

impl ConnectionProvider for SqliteProvider {
    fn connection(&mut self) -> Result<&mut dyn SqlConnection, SqlError> {
        if self.connection.is_none() {
            let conn = self.open()?;
            self.opened += 1;
            debug!("Opened SQLite connection #{} to {:?}", self.opened, self.target);
            self.connection = Some(conn);
        }
        match self.connection.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(SqlError::new("connection unavailable")),
        }
    }

    fn reset_connection(&mut self) {
        if self.connection.take().is_some() {
            debug!("Reset SQLite connection to {:?}", self.target);
        }
    }
}
