//! Slow statement classification.
//!
//! Elapsed time is classified after the fact and never cancels anything:
//!
//! | Elapsed | Class | Log |
//! |---------|-------|-----|
//! | `<= slow` | normal | none |
//! | `> slow`, `<= very_slow` | slow | `warn!` |
//! | `> very_slow` | very slow | `error!` |
//!
//! Slow and very slow statements are logged on the `sparse_map::slow_query`
//! target and reported to the stats sink with their SQL text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sparse_map_core::config::constants::{DEFAULT_SLOW_QUERY_MS, DEFAULT_VERY_SLOW_QUERY_MS};
use sparse_map_core::{NoopStatsService, StatsService, StorageConfig};
use tracing::{error, warn};

/// Operation kinds reported to the stats sink.
pub mod op_kind {
    pub const SELECT: &str = "select";
    pub const INSERT: &str = "insert";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const LIST_ALL: &str = "listall";
    pub const COUNT: &str = "count";
    pub const FIND: &str = "find";
    pub const INDEX: &str = "index";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySpeed {
    Normal,
    Slow,
    VerySlow,
}

/// Times statements and reports them to a [`StatsService`].
#[derive(Clone)]
pub struct SlowQueryMonitor {
    slow: Duration,
    very_slow: Duration,
    stats: Arc<dyn StatsService>,
}

impl SlowQueryMonitor {
    pub fn new(slow: Duration, very_slow: Duration, stats: Arc<dyn StatsService>) -> Self {
        Self {
            slow,
            very_slow,
            stats,
        }
    }

    pub fn from_config(config: &StorageConfig, stats: Arc<dyn StatsService>) -> Self {
        Self::new(
            Duration::from_millis(config.slow_query_ms),
            Duration::from_millis(config.very_slow_query_ms),
            stats,
        )
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow
    }

    pub fn very_slow_threshold(&self) -> Duration {
        self.very_slow
    }

    pub fn stats(&self) -> Arc<dyn StatsService> {
        Arc::clone(&self.stats)
    }

    pub fn set_stats(&mut self, stats: Arc<dyn StatsService>) {
        self.stats = stats;
    }

    pub fn classify(&self, elapsed: Duration) -> QuerySpeed {
        if elapsed > self.very_slow {
            QuerySpeed::VerySlow
        } else if elapsed > self.slow {
            QuerySpeed::Slow
        } else {
            QuerySpeed::Normal
        }
    }

    /// Classify, log and report one statement that started at `started`.
    pub fn record(&self, column_family: &str, kind: &str, started: Instant, sql: &str) -> QuerySpeed {
        self.record_elapsed(column_family, kind, started.elapsed(), sql)
    }

    pub fn record_elapsed(
        &self,
        column_family: &str,
        kind: &str,
        elapsed: Duration,
        sql: &str,
    ) -> QuerySpeed {
        let ms = elapsed.as_millis() as u64;
        let speed = self.classify(elapsed);
        match speed {
            QuerySpeed::Normal => self.stats.storage_op(column_family, kind, ms),
            QuerySpeed::Slow => {
                warn!(target: "sparse_map::slow_query", "Slow Query {}ms {}", ms, sql);
                self.stats.slow_storage_op(column_family, kind, ms, sql);
            }
            QuerySpeed::VerySlow => {
                error!(target: "sparse_map::slow_query", "Very Slow Query {}ms {}", ms, sql);
                self.stats.slow_storage_op(column_family, kind, ms, sql);
            }
        }
        speed
    }
}

impl Default for SlowQueryMonitor {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_SLOW_QUERY_MS),
            Duration::from_millis(DEFAULT_VERY_SLOW_QUERY_MS),
            Arc::new(NoopStatsService),
        )
    }
}
