//! Secondary index maintenance and predicate queries.
//!
//! Three strategies trade write cost against query flexibility:
//!
//! | Strategy | Layout | Write cost per row |
//! |----------|--------|--------------------|
//! | [`Indexer::WideColumn`] | one physical column per indexed property | one UPDATE (or INSERT) |
//! | [`Indexer::BatchInsert`] | key/value index table | two batched statements |
//! | [`Indexer::NonBatchInsert`] | key/value index table | one statement per property value |
//!
//! The strategy is chosen once, when the client is built. Every strategy
//! works from the raw change set: a property whose change is a removal has its
//! index entries retracted, any other indexed change replaces them.

mod narrow;
mod wide;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use sparse_map_core::config::split_index_column;
use sparse_map_core::{DirectCacheAccess, PropertyMap, StorageConfig, Value};
use tracing::{debug, warn};

use crate::disposables::DisposableRegistry;
use crate::error::StorageResult;
use crate::executor::SqlExecutor;
use crate::iter::SparseRowIterator;
use crate::row_id::RowId;
use crate::serialization::PropertyCodec;
use crate::statements::StatementCache;

pub use narrow::NarrowColumnIndexer;
pub use wide::WideColumnIndexer;

/// Properties indexed in every deployment.
pub const AUTO_INDEX_COLUMNS: [&str; 3] = ["cn:_:parenthash", "au:_:parenthash", "ac:_:parenthash"];

/// Predicate key holding the page size of a find.
pub const ITEMS_KEY: &str = "_items";

/// Predicate key holding the zero-based page number of a find.
pub const PAGE_KEY: &str = "_page";

/// The set of indexed `family:property` columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexColumns {
    columns: BTreeSet<String>,
}

impl IndexColumns {
    /// Configured columns plus [`AUTO_INDEX_COLUMNS`].
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let mut columns = BTreeSet::new();
        for column in config
            .index_columns
            .iter()
            .map(String::as_str)
            .chain(AUTO_INDEX_COLUMNS)
        {
            split_index_column(column)?;
            columns.insert(column.to_string());
        }
        Ok(Self { columns })
    }

    pub fn contains(&self, column_family: &str, property: &str) -> bool {
        self.columns
            .contains(&format!("{}:{}", column_family, property))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// What a find needs besides the executor.
pub struct FindContext<'a> {
    pub registry: &'a DisposableRegistry,
    pub codec: Arc<dyn PropertyCodec>,
    pub cache: Option<Arc<dyn DirectCacheAccess>>,
}

/// The index strategy in use.
pub enum Indexer {
    WideColumn(WideColumnIndexer),
    BatchInsert(NarrowColumnIndexer),
    NonBatchInsert(NarrowColumnIndexer),
}

impl Indexer {
    /// Pick a strategy: wide columns when a column mapping exists, otherwise
    /// a narrow indexer, batched if configured.
    pub fn select(
        config: &StorageConfig,
        columns: IndexColumns,
        wide_mapping: Option<HashMap<String, String>>,
    ) -> Self {
        match wide_mapping {
            Some(mapping) => {
                debug!("Using wide column indexes");
                Indexer::WideColumn(WideColumnIndexer::new(mapping))
            }
            None if config.use_batch_inserts => {
                if config.enforce_wide_columns {
                    warn!("Batch narrow column indexes are deprecated, please check your database and configuration");
                }
                Indexer::BatchInsert(NarrowColumnIndexer::new(columns))
            }
            None => {
                if config.enforce_wide_columns {
                    warn!("Narrow column indexes are deprecated, please check your database and configuration");
                }
                Indexer::NonBatchInsert(NarrowColumnIndexer::new(columns))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Indexer::WideColumn(_) => "wide-column",
            Indexer::BatchInsert(_) => "batch-insert",
            Indexer::NonBatchInsert(_) => "non-batch-insert",
        }
    }

    /// Mirror the indexed properties in `changes` into the index.
    #[allow(clippy::too_many_arguments)]
    pub fn index(
        &self,
        executor: &mut SqlExecutor,
        statements: &mut StatementCache,
        keyspace: &str,
        column_family: &str,
        key: &str,
        rid: &RowId,
        changes: &PropertyMap,
    ) -> StorageResult<()> {
        match self {
            Indexer::WideColumn(wide) => {
                wide.index(executor, statements, keyspace, column_family, key, rid, changes)
            }
            Indexer::BatchInsert(narrow) => narrow.index(
                executor,
                statements,
                keyspace,
                column_family,
                key,
                rid,
                changes,
                true,
            ),
            Indexer::NonBatchInsert(narrow) => narrow.index(
                executor,
                statements,
                keyspace,
                column_family,
                key,
                rid,
                changes,
                false,
            ),
        }
    }

    /// Drop index state held outside the key/value table when a row is
    /// removed. Key/value rows go with the row's `delete-string-row`.
    pub fn remove(
        &self,
        executor: &mut SqlExecutor,
        statements: &mut StatementCache,
        keyspace: &str,
        column_family: &str,
        rid: &RowId,
    ) -> StorageResult<()> {
        match self {
            Indexer::WideColumn(wide) => {
                wide.remove(executor, statements, keyspace, column_family, rid)
            }
            Indexer::BatchInsert(_) | Indexer::NonBatchInsert(_) => Ok(()),
        }
    }

    /// Rows of `column_family` matching every predicate.
    pub fn find(
        &self,
        executor: &mut SqlExecutor,
        context: &FindContext<'_>,
        keyspace: &str,
        column_family: &str,
        predicates: &PropertyMap,
    ) -> StorageResult<SparseRowIterator> {
        match self {
            Indexer::WideColumn(wide) => {
                wide.find(executor, context, keyspace, column_family, predicates)
            }
            Indexer::BatchInsert(narrow) | Indexer::NonBatchInsert(narrow) => {
                narrow.find(executor, context, keyspace, column_family, predicates)
            }
        }
    }
}

/// A usable predicate: a property and the terms any of which may match.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Predicate {
    pub property: String,
    pub terms: Vec<String>,
}

/// Paging requested through [`ITEMS_KEY`] and [`PAGE_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Paging {
    pub items: usize,
    pub page: usize,
}

/// Split a predicate map into usable predicates and paging.
///
/// Predicates on properties `is_indexed` rejects are ignored.
pub(crate) fn plan_predicates(
    column_family: &str,
    predicates: &PropertyMap,
    is_indexed: impl Fn(&str) -> bool,
) -> (Vec<Predicate>, Option<Paging>) {
    let mut usable = Vec::new();
    for (property, value) in predicates {
        if property == ITEMS_KEY || property == PAGE_KEY {
            continue;
        }
        if !is_indexed(property) {
            if property.starts_with('_') {
                debug!("Ignoring reserved predicate {} on {}", property, column_family);
            } else {
                warn!("Property {}:{} is not indexed, predicate ignored", column_family, property);
            }
            continue;
        }
        let terms = value.index_terms();
        if terms.is_empty() {
            debug!("Predicate {} has no searchable value", property);
            continue;
        }
        usable.push(Predicate {
            property: property.clone(),
            terms,
        });
    }
    let paging = predicates.get(ITEMS_KEY).and_then(as_count).map(|items| Paging {
        items,
        page: predicates.get(PAGE_KEY).and_then(as_count).unwrap_or(0),
    });
    (usable, paging)
}

fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Integer(i) if *i >= 0 => Some(*i as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Wrap a find cursor with the caller's cache and paging.
pub(crate) fn finish_iterator(iter: SparseRowIterator, context: &FindContext<'_>, paging: Option<Paging>) -> SparseRowIterator {
    let iter = iter.with_cache(context.cache.clone()).skipping_deleted();
    match paging {
        Some(p) => iter.with_page(p.items, p.page),
        None => iter,
    }
}
