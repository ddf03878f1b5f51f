//! Wide index column synchronizer.
//!
//! Maps each indexed `family:property` to a physical column on the family's
//! wide index table. Existing mappings are read from the mapping table and
//! never changed; missing ones get a SQL-safe column name derived from the
//! property name, a mapping row, and the ALTER and CREATE INDEX statements
//! that add the column.
//!
//! Statement sets without `index-column-name-select` and
//! `index-column-name-insert` have no wide column support; the synchronizer
//! then does nothing and the client falls back to a narrow indexer.

use std::collections::{HashMap, HashSet};

use sparse_map_core::config::split_index_column;
use sparse_map_core::StorageConfig;
use tracing::{debug, info, warn};

use super::core::StorageClient;
use crate::error::{StorageClientError, StorageResult};
use crate::executor::SqlExecutor;
use crate::indexer::{IndexColumns, Indexer, WideColumnIndexer};
use crate::sql::{SqlError, SqlValue};
use crate::statements::{format_template, ops};

/// Physical column of the auto-indexed parent hash property.
pub const PARENT_HASH_COLUMN: &str = "parenthash";

/// Property names with a fixed physical column.
const COLUMN_NAME_OVERRIDES: [(&str, &str); 1] = [("_:parenthash", PARENT_HASH_COLUMN)];

/// Derive a SQL-safe column name from a property name.
///
/// A leading `_` is dropped, or replaced by `X` when `padding` is on. Other
/// characters that are not letters or digits become `_`, or are dropped when
/// `padding` is on. The result is cut to `max_length` characters.
pub fn make_name_safe_sql(name: &str, padding: bool, max_length: usize) -> String {
    if let Some((_, column)) = COLUMN_NAME_OVERRIDES.iter().find(|(n, _)| *n == name) {
        return column.to_string();
    }
    let mut out = String::with_capacity(name.len());
    let rest = match name.strip_prefix('_') {
        Some(rest) => {
            if padding {
                out.push('X');
            }
            rest
        }
        None => name,
    };
    for c in rest.chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !padding {
            out.push('_');
        }
    }
    out.chars().take(max_length).collect()
}

impl StorageClient {
    /// Add any missing wide index columns and return the full mapping.
    ///
    /// Returns `None` when the statements have no wide column support.
    /// Re-running only adds mappings for newly indexed properties.
    pub fn sync_index_columns(&mut self) -> StorageResult<Option<HashMap<String, String>>> {
        self.check_active()?;
        let mapping = sync_index_columns(&mut self.executor, &self.config, &self.index_columns)?;
        if let (Some(mapping), Indexer::WideColumn(wide)) = (&mapping, &mut self.indexer) {
            *wide = WideColumnIndexer::new(mapping.clone());
        }
        Ok(mapping)
    }
}

pub(super) fn sync_index_columns(
    executor: &mut SqlExecutor,
    config: &StorageConfig,
    columns: &IndexColumns,
) -> StorageResult<Option<HashMap<String, String>>> {
    let statements = executor.statements();
    let (Some(select), Some(insert)) = (
        statements.get(ops::INDEX_COLUMN_NAME_SELECT),
        statements.get(ops::INDEX_COLUMN_NAME_INSERT),
    ) else {
        debug!("No wide index column statements, using key/value index tables");
        return Ok(None);
    };
    let select = select.to_string();
    let insert = insert.to_string();
    let alter = required(executor, ops::ALTER_WIDESTRING_TABLE)?;
    let create_index = required(executor, ops::INDEX_WIDESTRING_TABLE)?;
    let sql_error = |context: &str| {
        let context = context.to_string();
        move |e: SqlError| StorageClientError::sql(context, e)
    };

    let mut mapping = HashMap::new();
    let mut used = HashSet::new();
    {
        let mut cursor = executor
            .connection()
            .and_then(|c| c.query(&select, &[]))
            .map_err(sql_error("read index column mapping"))?;
        while let Some(row) = cursor
            .next_row()
            .map_err(sql_error("read index column mapping"))?
        {
            let (Some(family), Some(property), Some(physical)) =
                (row.get_str(0), row.get_str(1), row.get_str(2))
            else {
                warn!("Skipping incomplete index column mapping row");
                continue;
            };
            mapping.insert(format!("{}:{}", family, property), physical.to_string());
            used.insert(format!("{}:{}", family, physical));
        }
    }

    for column_key in columns.iter() {
        if mapping.contains_key(column_key) {
            continue;
        }
        let (family, property) = split_index_column(column_key)?;
        let physical = make_name_safe_sql(property, config.sql_name_padding, config.sql_max_name_length);
        if !used.insert(format!("{}:{}", family, physical)) {
            info!(
                "Column already exists, provide explicit mapping for {}, already used column {}",
                column_key, physical
            );
            return Err(StorageClientError::ColumnCollision {
                column_key: column_key.to_string(),
                physical,
            });
        }

        let context = format!("add index column {} as {}.{}", column_key, family, physical);
        let connection = executor.connection().map_err(sql_error(&context))?;
        connection
            .execute(
                &insert,
                &[
                    SqlValue::from(family),
                    SqlValue::from(property),
                    SqlValue::from(physical.as_str()),
                ],
            )
            .map_err(sql_error(&context))?;
        for template in [&alter, &create_index] {
            let ddl = format_template(template, &[family, physical.as_str()]);
            if let Err(e) = connection.execute_ddl(&ddl) {
                warn!("Adding index column {} failed, SQL was {}", column_key, ddl);
                return Err(StorageClientError::sql(context, e));
            }
        }
        info!("Added index column {} to table {} as {}", column_key, family, physical);
        mapping.insert(column_key.to_string(), physical);
    }

    for (column_key, physical) in &mapping {
        debug!("Index column {} maps to {}", column_key, physical);
    }
    Ok(Some(mapping))
}

fn required(executor: &SqlExecutor, operation: &str) -> StorageResult<String> {
    executor
        .statements()
        .get(operation)
        .map(str::to_string)
        .ok_or_else(|| StorageClientError::StatementNotFound {
            operation: operation.to_string(),
            tried: vec![operation.to_string()],
        })
}
