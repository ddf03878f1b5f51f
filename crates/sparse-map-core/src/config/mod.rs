//! Configuration management for the sparse map storage client.
//!
//! Statement templates are not part of this structure; they are loaded
//! separately by the storage crate because their keys are dotted paths.

pub mod constants;


use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use constants::*;

/// Digest used to derive row ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// 128-bit digest, the default.
    #[default]
    Md5,
    Sha256,
    Sha512,
}

impl FromStr for HashAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Ok(HashAlgorithm::Md5),
            "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(CoreError::UnknownHashAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

/// Order in which the write path tries INSERT and UPDATE for a row the caller
/// believes is new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatementSequence {
    /// Honour the `probably_new` hint: INSERT first for new rows.
    #[default]
    InsertFirst,
    /// Always UPDATE first, regardless of the hint.
    UpdateFirst,
}

/// Storage client configuration.
///
/// # Defaults
/// - `rowid_hash`: "MD5"
/// - `sql_max_name_length`: 50
/// - `slow_query_ms` / `very_slow_query_ms`: 50 / 100
/// - everything else off or empty
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Row id digest name (MD5, SHA-256, SHA-512).
    pub rowid_hash: String,
    /// Pad a leading underscore with `X` and drop other non-alphanumerics
    /// when deriving physical column names.
    pub sql_name_padding: bool,
    /// Maximum length of a derived physical column name.
    pub sql_max_name_length: usize,
    /// Use the batched narrow-column indexer when no wide columns exist.
    pub use_batch_inserts: bool,
    /// Driver support level; "1.5" pre-declares blob lengths.
    pub jdbc_support_level: String,
    pub statement_sequence: StatementSequence,
    pub slow_query_ms: u64,
    pub very_slow_query_ms: u64,
    /// Indexed properties as `family:property`.
    pub index_columns: Vec<String>,
    /// Warn when falling back to a narrow-column indexer.
    pub enforce_wide_columns: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rowid_hash: DEFAULT_ROWID_HASH.to_string(),
            sql_name_padding: false,
            sql_max_name_length: DEFAULT_MAX_NAME_LENGTH,
            use_batch_inserts: false,
            jdbc_support_level: DEFAULT_JDBC_SUPPORT_LEVEL.to_string(),
            statement_sequence: StatementSequence::default(),
            slow_query_ms: DEFAULT_SLOW_QUERY_MS,
            very_slow_query_ms: DEFAULT_VERY_SLOW_QUERY_MS,
            index_columns: Vec::new(),
            enforce_wide_columns: false,
        }
    }
}

impl StorageConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order:
    /// 1. config/storage.toml (base settings)
    /// 2. config/storage-{SPARSE_MAP_ENV}.toml (environment-specific)
    /// 3. Environment variables with SPARSE_MAP__ prefix
    pub fn load() -> CoreResult<Self> {
        let env = std::env::var(ENV_SELECTOR).unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/storage").required(false))
            .add_source(config::File::with_name(&format!("config/storage-{}", env)).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: StorageConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: StorageConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> CoreResult<()> {
        self.hash_algorithm()?;

        if self.sql_max_name_length == 0 {
            return Err(CoreError::ConfigError(
                "sql_max_name_length must be greater than 0".into(),
            ));
        }

        if self.slow_query_ms > self.very_slow_query_ms {
            return Err(CoreError::ConfigError(format!(
                "slow_query_ms ({}) must not exceed very_slow_query_ms ({})",
                self.slow_query_ms, self.very_slow_query_ms
            )));
        }

        for column in &self.index_columns {
            split_index_column(column)?;
        }

        Ok(())
    }

    /// The parsed row id digest.
    pub fn hash_algorithm(&self) -> CoreResult<HashAlgorithm> {
        self.rowid_hash.parse()
    }

    /// True when blob parameters must carry a pre-declared length.
    pub fn declares_stream_length(&self) -> bool {
        self.jdbc_support_level == LEGACY_JDBC_SUPPORT_LEVEL
    }
}

/// Split `family:property` at the first colon.
///
/// Property names may themselves contain colons (`_:parenthash`).
pub fn split_index_column(column: &str) -> CoreResult<(&str, &str)> {
    match column.split_once(':') {
        Some((family, property)) if !family.is_empty() && !property.is_empty() => {
            Ok((family, property))
        }
        _ => Err(CoreError::InvalidIndexColumn(column.to_string())),
    }
}
