//! SQL statement templates and the shard-aware resolver.
//!
//! Templates are addressed by dotted keys: an operation name optionally
//! followed by a keyspace, a column family and a shard suffix `_x`. A lookup
//! walks from the most specific key to the bare operation name and the first
//! configured key wins:
//!
//! ```text
//! op.ks.cf._s  op.cf._s  op.ks._s  op._s  op.ks.cf  op.cf  op.ks  op
//! ```
//!
//! Statements that span all shards (scans, counts, finds) skip the four
//! sharded keys.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::diagnostics::CounterGuard;
use crate::error::{StorageClientError, StorageResult};

/// Operation names of the statement catalogue.
pub mod ops {
    pub const BLOCK_SELECT_ROW: &str = "block-select-row";
    pub const BLOCK_INSERT_ROW: &str = "block-insert-row";
    pub const BLOCK_UPDATE_ROW: &str = "block-update-row";
    pub const BLOCK_DELETE_ROW: &str = "block-delete-row";
    pub const DELETE_STRING_ROW: &str = "delete-string-row";
    pub const INSERT_STRING_COLUMN: &str = "insert-string-column";
    pub const REMOVE_STRING_COLUMN: &str = "remove-string-column";
    pub const WIDE_INDEX_UPDATE: &str = "wide-index-update";
    pub const WIDE_INDEX_INSERT: &str = "wide-index-insert";
    pub const WIDE_INDEX_DELETE: &str = "wide-index-delete";
    pub const FIND_NARROW: &str = "find-narrow";
    pub const FIND_NARROW_JOIN: &str = "find-narrow-join";
    pub const FIND_NARROW_WHERE: &str = "find-narrow-where";
    pub const FIND_WIDE: &str = "find-wide";
    pub const FIND_WIDE_WHERE: &str = "find-wide-where";
    pub const LIST_ALL: &str = "list-all";
    pub const LIST_ALL_COUNT: &str = "list-all-count";
    pub const INDEX_COLUMN_NAME_SELECT: &str = "index-column-name-select";
    pub const INDEX_COLUMN_NAME_INSERT: &str = "index-column-name-insert";
    pub const ALTER_WIDESTRING_TABLE: &str = "alter-widestring-table";
    pub const INDEX_WIDESTRING_TABLE: &str = "index-widestring-table";
}

/// Flat map of dotted statement keys to SQL text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlStatements {
    templates: HashMap<String, String>,
}

impl SqlStatements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML statement file.
    ///
    /// Keys may be quoted (`"block-select-row.cn" = "..."`) or written as
    /// nested tables; nested tables are flattened with `.`.
    ///
    /// # Errors
    /// `StorageClientError::Config` on malformed TOML or a non-string value.
    pub fn from_toml_str(content: &str) -> StorageResult<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| StorageClientError::config(format!("Invalid SQL statement file: {}", e)))?;
        let mut templates = HashMap::new();
        flatten("", &table, &mut templates)?;
        Ok(Self { templates })
    }

    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageClientError::config(format!(
                "Failed to read SQL statement file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Overlay `other` on top of this set; its keys win.
    pub fn merge(mut self, other: SqlStatements) -> Self {
        self.templates.extend(other.templates);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, sql: impl Into<String>) {
        self.templates.insert(key.into(), sql.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.templates.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Resolve `operation` for a keyspace and column family.
    ///
    /// # Errors
    /// `StorageClientError::StatementNotFound` listing every key tried.
    pub fn resolve(
        &self,
        operation: &str,
        keyspace: &str,
        column_family: &str,
        shard: Option<char>,
    ) -> StorageResult<(String, &str)> {
        let keys = fallback_keys(operation, keyspace, column_family, shard);
        for key in &keys {
            if let Some(sql) = self.get(key) {
                return Ok((key.clone(), sql));
            }
        }
        Err(StorageClientError::StatementNotFound {
            operation: operation.to_string(),
            tried: keys,
        })
    }
}

fn flatten(
    prefix: &str,
    table: &toml::Table,
    out: &mut HashMap<String, String>,
) -> StorageResult<()> {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::String(sql) => {
                out.insert(full, sql.clone());
            }
            toml::Value::Table(nested) => flatten(&full, nested, out)?,
            other => {
                return Err(StorageClientError::config(format!(
                    "Statement {} must be a string, found {}",
                    full,
                    other.type_str()
                )))
            }
        }
    }
    Ok(())
}

/// Candidate keys for `operation`, most specific first.
pub fn fallback_keys(
    operation: &str,
    keyspace: &str,
    column_family: &str,
    shard: Option<char>,
) -> Vec<String> {
    let mut keys = Vec::with_capacity(8);
    if let Some(s) = shard {
        keys.push(format!("{}.{}.{}._{}", operation, keyspace, column_family, s));
        keys.push(format!("{}.{}._{}", operation, column_family, s));
        keys.push(format!("{}.{}._{}", operation, keyspace, s));
        keys.push(format!("{}._{}", operation, s));
    }
    keys.push(format!("{}.{}.{}", operation, keyspace, column_family));
    keys.push(format!("{}.{}", operation, column_family));
    keys.push(format!("{}.{}", operation, keyspace));
    keys.push(operation.to_string());
    keys
}

/// Replace positional placeholders `{0}`, `{1}`, ... with `args`.
pub fn format_template(template: &str, args: &[&str]) -> String {
    let mut sql = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        sql = sql.replace(&format!("{{{}}}", i), arg);
    }
    sql
}

/// A resolved, ready-to-run statement.
///
/// Holds a leak-counter guard while it is outstanding, unless a
/// [`StatementCache`] owns it.
#[derive(Debug)]
pub struct PreparedStatement {
    key: String,
    sql: Arc<str>,
    _guard: Option<CounterGuard>,
}

impl PreparedStatement {
    pub(crate) fn new(key: String, sql: Arc<str>, guard: Option<CounterGuard>) -> Self {
        Self {
            key,
            sql,
            _guard: guard,
        }
    }

    /// The statement key that resolved.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Statements resolved within one transaction block.
///
/// Each entry holds one statement counter until the cache is dropped at the
/// end of the block.
#[derive(Debug, Default)]
pub struct StatementCache {
    entries: HashMap<String, (Arc<str>, CounterGuard)>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn lookup(&self, cache_key: &str) -> Option<Arc<str>> {
        self.entries.get(cache_key).map(|(sql, _)| Arc::clone(sql))
    }

    pub(crate) fn store(&mut self, cache_key: String, sql: Arc<str>, guard: CounterGuard) {
        debug!("Caching statement {}", cache_key);
        self.entries.insert(cache_key, (sql, guard));
    }
}
