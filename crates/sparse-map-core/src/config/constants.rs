//! Configuration defaults.

/// Default row id digest (128-bit).
pub const DEFAULT_ROWID_HASH: &str = "MD5";

/// Default maximum length of a derived physical index column name.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 50;

/// Statements slower than this are reported as slow.
pub const DEFAULT_SLOW_QUERY_MS: u64 = 50;

/// Statements slower than this are reported as very slow.
pub const DEFAULT_VERY_SLOW_QUERY_MS: u64 = 100;

/// Driver support level assumed when none is configured.
pub const DEFAULT_JDBC_SUPPORT_LEVEL: &str = "4.0";

/// Legacy driver level that needs blob lengths declared up front.
pub const LEGACY_JDBC_SUPPORT_LEVEL: &str = "1.5";

/// Environment variable selecting the environment-specific config file.
pub const ENV_SELECTOR: &str = "SPARSE_MAP_ENV";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SPARSE_MAP";
