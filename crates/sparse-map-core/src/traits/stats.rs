//! Operational metrics sink.

/// Receives per-operation timing samples.
pub trait StatsService: Send + Sync {
    /// A statement that completed under the slow threshold.
    fn storage_op(&self, column_family: &str, op_kind: &str, elapsed_ms: u64);

    /// A statement at or over the slow threshold, with its SQL text.
    fn slow_storage_op(&self, column_family: &str, op_kind: &str, elapsed_ms: u64, sql: &str);
}

/// Discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsService;

impl StatsService for NoopStatsService {
    fn storage_op(&self, _column_family: &str, _op_kind: &str, _elapsed_ms: u64) {}

    fn slow_storage_op(&self, _column_family: &str, _op_kind: &str, _elapsed_ms: u64, _sql: &str) {}
}
