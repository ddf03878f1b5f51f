//! Key/value index table strategies.
//!
//! Each indexed property value is one `(rid, property, value)` row. An array
//! value contributes one row per element. Writes retract every existing row
//! of a changed property, then insert its new values, either as two batched
//! statements or one statement per row.

use sparse_map_core::{PropertyMap, Value};
use tracing::debug;

use super::{finish_iterator, plan_predicates, FindContext, IndexColumns};
use crate::error::{StorageClientError, StorageResult};
use crate::executor::SqlExecutor;
use crate::iter::{SparseRowIterator, ROW_KEY_COLUMN};
use crate::monitor::op_kind;
use crate::row_id::RowId;
use crate::sql::SqlValue;
use crate::statements::{format_template, ops, StatementCache};

#[derive(Debug, Clone)]
pub struct NarrowColumnIndexer {
    columns: IndexColumns,
}

impl NarrowColumnIndexer {
    pub fn new(columns: IndexColumns) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &IndexColumns {
        &self.columns
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
        batched: bool,
    ) -> StorageResult<()> {
        let indexed: Vec<(&str, &Value)> = changes
            .iter()
            .filter(|(property, _)| self.columns.contains(column_family, property))
            .map(|(property, value)| (property.as_str(), value))
            .collect();
        write_index_rows(
            executor,
            statements,
            keyspace,
            column_family,
            key,
            rid,
            &indexed,
            batched,
        )
    }

    /// One join per predicate; an array predicate matches any element.
    pub(super) fn find(
        &self,
        executor: &mut SqlExecutor,
        context: &FindContext<'_>,
        keyspace: &str,
        column_family: &str,
        predicates: &PropertyMap,
    ) -> StorageResult<SparseRowIterator> {
        let (usable, paging) = plan_predicates(column_family, predicates, |p| {
            self.columns.contains(column_family, p)
        });
        if usable.is_empty() {
            debug!("No indexed predicates for find on {}", column_family);
            return Ok(SparseRowIterator::empty(
                context.codec.clone(),
                column_family,
            ));
        }

        let join_template = executor
            .statements()
            .resolve(ops::FIND_NARROW_JOIN, keyspace, column_family, None)?
            .1
            .to_string();
        let where_template = executor
            .statements()
            .resolve(ops::FIND_NARROW_WHERE, keyspace, column_family, None)?
            .1
            .to_string();

        let mut joins = Vec::with_capacity(usable.len());
        let mut clauses = Vec::with_capacity(usable.len());
        let mut params = Vec::new();
        for (i, predicate) in usable.iter().enumerate() {
            let alias = format!("a{}", i);
            joins.push(format_template(&join_template, &[alias.as_str()]));
            let clause = format_template(&where_template, &[alias.as_str()]);
            let alternatives: Vec<&str> = predicate.terms.iter().map(|_| clause.as_str()).collect();
            clauses.push(format!("({})", alternatives.join(" OR ")));
            for term in &predicate.terms {
                params.push(SqlValue::from(predicate.property.as_str()));
                params.push(SqlValue::from(term.as_str()));
            }
        }
        let joins = joins.join(" ");
        let clauses = clauses.join(" AND ");

        let statement = executor.prepare_formatted(
            ops::FIND_NARROW,
            keyspace,
            column_family,
            None,
            &[joins.as_str(), clauses.as_str()],
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

/// Replace the key/value index rows of each listed property.
///
/// Every listed property has its rows retracted; a value that is not a
/// removal then gets one row per index term.
#[allow(clippy::too_many_arguments)]
pub(super) fn write_index_rows(
    executor: &mut SqlExecutor,
    statements: &mut StatementCache,
    keyspace: &str,
    column_family: &str,
    key: &str,
    rid: &RowId,
    properties: &[(&str, &Value)],
    batched: bool,
) -> StorageResult<()> {
    if properties.is_empty() {
        return Ok(());
    }
    let mut removals = Vec::with_capacity(properties.len());
    let mut inserts = Vec::new();
    for (property, value) in properties {
        removals.push(vec![SqlValue::from(rid.as_str()), SqlValue::from(*property)]);
        if value.is_removal() {
            continue;
        }
        for term in value.index_terms() {
            inserts.push(vec![
                SqlValue::from(rid.as_str()),
                SqlValue::from(*property),
                SqlValue::Text(term),
            ]);
        }
    }
    let context = || format!("index {}:{}:{} ({})", keyspace, column_family, key, rid);
    let shard = Some(rid.shard());

    let remove = executor.prepare(
        ops::REMOVE_STRING_COLUMN,
        keyspace,
        column_family,
        shard,
        Some(&mut *statements),
    )?;
    if batched {
        executor
            .execute_batch(&remove, column_family, op_kind::INDEX, &removals)
            .map_err(|e| StorageClientError::sql(context(), e))?;
    } else {
        for params in &removals {
            executor
                .execute(&remove, column_family, op_kind::INDEX, params)
                .map_err(|e| StorageClientError::sql(context(), e))?;
        }
    }

    if inserts.is_empty() {
        return Ok(());
    }
    let insert = executor.prepare(
        ops::INSERT_STRING_COLUMN,
        keyspace,
        column_family,
        shard,
        Some(statements),
    )?;
    if batched {
        executor
            .execute_batch(&insert, column_family, op_kind::INDEX, &inserts)
            .map_err(|e| StorageClientError::sql(context(), e))?;
    } else {
        for params in &inserts {
            executor
                .execute(&insert, column_family, op_kind::INDEX, params)
                .map_err(|e| StorageClientError::sql(context(), e))?;
        }
    }
    debug!(
        "Indexed {} {}: {} removed, {} inserted",
        column_family,
        rid,
        removals.len(),
        inserts.len()
    );
    Ok(())
}
