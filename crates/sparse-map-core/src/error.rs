//! Error types for sparse-map-core.
//!
//! This module defines [`CoreError`], raised while loading configuration or
//! interpreting property values, along with the [`CoreResult<T>`] alias.
//!
//! # Examples
//!
//! ```rust
//! use sparse_map_core::CoreError;
//!
//! let error = CoreError::UnknownHashAlgorithm("CRC32".to_string());
//! assert!(error.to_string().contains("CRC32"));
//! ```

use thiserror::Error;

/// Top-level error type for sparse-map-core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded or failed validation.
    ///
    /// # When This Occurs
    ///
    /// - A configuration file is missing or malformed
    /// - A threshold or length setting is out of range
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The configured row id digest is not supported.
    #[error("Unknown row id hash algorithm: {0}")]
    UnknownHashAlgorithm(String),

    /// An index column is not written as `family:property`.
    #[error("Invalid index column '{0}', expected family:property")]
    InvalidIndexColumn(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::ConfigError(err.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::ConfigError(err.to_string())
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
