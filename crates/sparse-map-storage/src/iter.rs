//! Lazy, single-pass row sequences over `(rid, blob)` cursors.
//!
//! Rows are decoded one at a time as the caller advances. A row that fails to
//! decode is logged and skipped; the sequence carries on. The cursor is
//! released on exhaustion, on [`SparseRowIterator::close`], on drop, or when
//! the owning client is passivated, whichever comes first.

use std::sync::Arc;

use parking_lot::Mutex;
use sparse_map_core::{is_deleted, CacheHolder, DirectCacheAccess, PropertyMap, SparseRow};
use tracing::{debug, error, warn};

use crate::disposables::{Disposable, DisposableRegistry, Registration};
use crate::executor::TrackedCursor;
use crate::serialization::PropertyCodec;
use crate::sql::SqlRow;

/// Column the row cursors are keyed on; always the first column.
pub const ROW_KEY_COLUMN: &str = "rid";

/// Shared slot holding the open cursor, closable from the registry.
struct CursorSlot {
    cursor: Mutex<Option<TrackedCursor>>,
}

impl Disposable for CursorSlot {
    fn close(&self) {
        if self.cursor.lock().take().is_some() {
            debug!("Row cursor closed");
        }
    }
}

/// Lazy sequence of [`SparseRow`]s.
pub struct SparseRowIterator {
    slot: Arc<CursorSlot>,
    registration: Option<Registration>,
    codec: Arc<dyn PropertyCodec>,
    column_family: String,
    cache: Option<Arc<dyn DirectCacheAccess>>,
    skip_deleted: bool,
    to_skip: usize,
    remaining: Option<usize>,
}

impl SparseRowIterator {
    /// Wrap `cursor` and register it with `registry`.
    pub fn new(
        cursor: TrackedCursor,
        registry: &DisposableRegistry,
        codec: Arc<dyn PropertyCodec>,
        column_family: impl Into<String>,
    ) -> Self {
        let slot = Arc::new(CursorSlot {
            cursor: Mutex::new(Some(cursor)),
        });
        let registration = registry.register(Arc::clone(&slot) as Arc<dyn Disposable>);
        Self {
            slot,
            registration: Some(registration),
            codec,
            column_family: column_family.into(),
            cache: None,
            skip_deleted: false,
            to_skip: 0,
            remaining: None,
        }
    }

    /// A sequence that yields nothing.
    pub fn empty(codec: Arc<dyn PropertyCodec>, column_family: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(CursorSlot {
                cursor: Mutex::new(None),
            }),
            registration: None,
            codec,
            column_family: column_family.into(),
            cache: None,
            skip_deleted: false,
            to_skip: 0,
            remaining: None,
        }
    }

    /// Serve rows from `cache` when present there, and record decoded rows.
    pub fn with_cache(mut self, cache: Option<Arc<dyn DirectCacheAccess>>) -> Self {
        self.cache = cache;
        self
    }

    /// Yield only page `page` (zero-based) of `items` rows.
    pub fn with_page(mut self, items: usize, page: usize) -> Self {
        self.to_skip = items.saturating_mul(page);
        self.remaining = Some(items);
        self
    }

    /// Drop rows carrying the logically-deleted marker.
    pub fn skipping_deleted(mut self) -> Self {
        self.skip_deleted = true;
        self
    }

    pub fn is_open(&self) -> bool {
        self.slot.cursor.lock().is_some()
    }

    /// Release the cursor now. Idempotent.
    pub fn close(&mut self) {
        self.slot.close();
        if let Some(registration) = self.registration.take() {
            registration.release();
        }
    }

    fn next_sql_row(&mut self) -> Option<SqlRow> {
        let fetched = {
            let mut guard = self.slot.cursor.lock();
            match guard.as_mut() {
                Some(cursor) => cursor.next_row(),
                None => return None,
            }
        };
        match fetched {
            Ok(Some(row)) => Some(row),
            Ok(None) => {
                debug!("End of set for {}", self.column_family);
                self.close();
                None
            }
            Err(e) => {
                error!("Cursor failed on {}: {}", self.column_family, e);
                self.close();
                None
            }
        }
    }

    fn load(&self, rid: &str, row: &SqlRow) -> Option<Arc<PropertyMap>> {
        if let Some(cache) = &self.cache {
            if let Some(holder) = cache.get_from_cache(rid) {
                if holder.is_absent() {
                    return None;
                }
                return Some(holder.get());
            }
        }
        let properties = match row.get_bytes(1) {
            Some(bytes) => match self.codec.decode(rid, &self.column_family, bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Skipping row {} in {}: {}", rid, self.column_family, e);
                    return None;
                }
            },
            None => PropertyMap::new(),
        };
        let properties = Arc::new(properties);
        if let Some(cache) = &self.cache {
            cache.put_to_cache(rid, CacheHolder::new(Arc::clone(&properties)), true);
        }
        Some(properties)
    }
}

impl Iterator for SparseRowIterator {
    type Item = SparseRow;

    fn next(&mut self) -> Option<SparseRow> {
        if self.remaining == Some(0) {
            self.close();
            return None;
        }
        loop {
            let row = self.next_sql_row()?;
            let Some(rid) = row.get_str(0).map(str::to_string) else {
                warn!("Skipping row without rid in {}", self.column_family);
                continue;
            };
            let Some(properties) = self.load(&rid, &row) else {
                continue;
            };
            if self.skip_deleted && is_deleted(&properties) {
                continue;
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Some(SparseRow::new(rid, properties));
        }
    }
}

impl Drop for SparseRowIterator {
    fn drop(&mut self) {
        self.close();
    }
}
