//! Wide-column index strategy.
//!
//! Each indexed property has its own physical column on a per-family index
//! table, named by the mapping the index-column synchronizer produces. A row
//! write costs one UPDATE, or an INSERT when the index row does not exist yet.
//!
//! An array value has no single column value. Its column is cleared and its
//! elements go to the family's key/value index table instead, so a find
//! matches a term either in the column or among the array elements. Every
//! indexed change retracts the property's key/value rows, which keeps a
//! property that switches between array and scalar from matching stale terms.

use std::collections::HashMap;

use sparse_map_core::{PropertyMap, Value};
use tracing::debug;

use super::narrow::write_index_rows;
use super::{finish_iterator, plan_predicates, FindContext};
use crate::error::{StorageClientError, StorageResult};
use crate::executor::SqlExecutor;
use crate::iter::{SparseRowIterator, ROW_KEY_COLUMN};
use crate::monitor::op_kind;
use crate::row_id::RowId;
use crate::sql::SqlValue;
use crate::statements::{format_template, ops, StatementCache};

#[derive(Debug, Clone, Default)]
pub struct WideColumnIndexer {
    /// `family:property` to physical column name.
    mapping: HashMap<String, String>,
}

impl WideColumnIndexer {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &HashMap<String, String> {
        &self.mapping
    }

    /// Physical column for a property, if it is indexed in this family.
    pub fn column(&self, column_family: &str, property: &str) -> Option<&str> {
        self.mapping
            .get(&format!("{}:{}", column_family, property))
            .map(String::as_str)
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn index(
        &self,
        executor: &mut SqlExecutor,
        statements: &mut StatementCache,
        keyspace: &str,
        column_family: &str,
        key: &str,
        rid: &RowId,
        changes: &PropertyMap,
    ) -> StorageResult<()> {
        let retract = Value::Remove;
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut element_rows: Vec<(&str, &Value)> = Vec::new();
        for (property, value) in changes {
            let Some(column) = self.column(column_family, property) else {
                continue;
            };
            let bound = match value {
                v if v.is_removal() => {
                    element_rows.push((property.as_str(), &retract));
                    SqlValue::Null
                }
                Value::Array(_) => {
                    element_rows.push((property.as_str(), value));
                    SqlValue::Null
                }
                v => match v.to_index_string() {
                    Some(s) => {
                        element_rows.push((property.as_str(), &retract));
                        SqlValue::Text(s)
                    }
                    None => continue,
                },
            };
            columns.push(column);
            values.push(bound);
        }
        if columns.is_empty() {
            return Ok(());
        }
        let context = || format!("index {}:{}:{} ({})", keyspace, column_family, key, rid);
        let shard = Some(rid.shard());

        let set_list = columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let update = executor.prepare_formatted(
            ops::WIDE_INDEX_UPDATE,
            keyspace,
            column_family,
            shard,
            &[column_family, set_list.as_str()],
            Some(&mut *statements),
        )?;
        let mut params = values.clone();
        params.push(SqlValue::from(rid.as_str()));
        let updated = executor
            .execute(&update, column_family, op_kind::INDEX, &params)
            .map_err(|e| StorageClientError::sql(context(), e))?;
        if updated == 0 {
            let column_list = columns.join(", ");
            let placeholders = vec!["?"; columns.len()].join(", ");
            let insert = executor.prepare_formatted(
                ops::WIDE_INDEX_INSERT,
                keyspace,
                column_family,
                shard,
                &[column_family, column_list.as_str(), placeholders.as_str()],
                Some(&mut *statements),
            )?;
            let mut params = Vec::with_capacity(values.len() + 1);
            params.push(SqlValue::from(rid.as_str()));
            params.extend(values);
            executor
                .execute(&insert, column_family, op_kind::INDEX, &params)
                .map_err(|e| StorageClientError::sql(context(), e))?;
            debug!("Inserted wide index row for {} {}", column_family, rid);
        }
        write_index_rows(
            executor,
            statements,
            keyspace,
            column_family,
            key,
            rid,
            &element_rows,
            true,
        )
    }

    /// Drop the wide index row of a removed row.
    pub(super) fn remove(
        &self,
        executor: &mut SqlExecutor,
        statements: &mut StatementCache,
        keyspace: &str,
        column_family: &str,
        rid: &RowId,
    ) -> StorageResult<()> {
        if !self.indexes_family(column_family) {
            return Ok(());
        }
        let delete = executor.prepare_formatted(
            ops::WIDE_INDEX_DELETE,
            keyspace,
            column_family,
            Some(rid.shard()),
            &[column_family],
            Some(statements),
        )?;
        executor
            .execute(&delete, column_family, op_kind::DELETE, &[SqlValue::from(rid.as_str())])
            .map_err(|e| {
                StorageClientError::sql(format!("remove wide index row {}:{} ({})", keyspace, column_family, rid), e)
            })?;
        Ok(())
    }

    /// Whether any property of `column_family` has a wide column.
    pub fn indexes_family(&self, column_family: &str) -> bool {
        let prefix = format!("{}:", column_family);
        self.mapping.keys().any(|k| k.starts_with(&prefix))
    }

    pub(super) fn find(
        &self,
        executor: &mut SqlExecutor,
        context: &FindContext<'_>,
        keyspace: &str,
        column_family: &str,
        predicates: &PropertyMap,
    ) -> StorageResult<SparseRowIterator> {
        let (usable, paging) = plan_predicates(column_family, predicates, |p| {
            self.column(column_family, p).is_some()
        });
        if usable.is_empty() {
            debug!("No indexed predicates for find on {}", column_family);
            return Ok(SparseRowIterator::empty(
                context.codec.clone(),
                column_family,
            ));
        }

        let where_template = executor
            .statements()
            .resolve(ops::FIND_WIDE_WHERE, keyspace, column_family, None)?
            .1
            .to_string();
        let mut clauses = Vec::with_capacity(usable.len());
        let mut params = Vec::new();
        for predicate in &usable {
            let Some(column) = self.column(column_family, &predicate.property) else {
                continue;
            };
            let clause = format_template(&where_template, &[column, column_family]);
            let alternatives: Vec<&str> = predicate.terms.iter().map(|_| clause.as_str()).collect();
            clauses.push(format!("({})", alternatives.join(" OR ")));
            for term in &predicate.terms {
                params.push(SqlValue::from(term.as_str()));
                params.push(SqlValue::from(predicate.property.as_str()));
                params.push(SqlValue::from(term.as_str()));
            }
        }
        let clauses = clauses.join(" AND ");

        let statement = executor.prepare_formatted(
            ops::FIND_WIDE,
            keyspace,
            column_family,
            None,
            &[column_family, clauses.as_str()],
            None,
        )?;
        let cursor = executor
            .query_by_key(&statement, column_family, op_kind::FIND, &params, ROW_KEY_COLUMN)
            .map_err(|e| {
                StorageClientError::sql(format!("find {}:{}", keyspace, column_family), e)
            })?;
        let iter = SparseRowIterator::new(cursor, context.registry, context.codec.clone(), column_family);
        Ok(finish_iterator(iter, context, paging))
    }
}
