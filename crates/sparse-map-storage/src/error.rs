//! Storage client error types.
//!
//! Every failure leaving the storage client is a [`StorageClientError`].
//! The variants fall into five groups:
//!
//! | Group | Variants | Retried |
//! |-------|----------|---------|
//! | configuration | `Config`, `StatementNotFound`, `ColumnCollision` | never |
//! | transient connectivity | `Sql` | once on reads and scans |
//! | data format | `DataFormat`, `InvalidValue` | never |
//! | lifecycle | `Lifecycle` | never |
//! | logical write failure | `SaveFailed` | never |
//!
//! No driver error escapes unwrapped: SQL failures are carried as the
//! `#[source]` of `Sql`.

use sparse_map_core::CoreError;
use thiserror::Error;

use crate::serialization::CodecError;
use crate::sql::SqlError;

/// Result type for storage client operations.
pub type StorageResult<T> = Result<T, StorageClientError>;

/// Unified storage client error.
#[derive(Debug, Error)]
pub enum StorageClientError {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No statement template matched any key in the fallback chain.
    #[error("No SQL statement configured for '{operation}', tried {tried:?}")]
    StatementNotFound {
        operation: String,
        tried: Vec<String>,
    },

    /// A derived physical index column is already used by another property.
    #[error("Column already exists, provide an explicit mapping for [{column_key}], already used column [{physical}]")]
    ColumnCollision { column_key: String, physical: String },

    /// Statement execution failed.
    ///
    /// `context` names the operation and the keyspace/family/key/rid involved.
    #[error("Storage operation failed on {context}: {source}")]
    Sql {
        context: String,
        #[source]
        source: SqlError,
    },

    /// A property map could not be encoded or decoded.
    #[error("Data invalid for storage in row {rid}: {source}")]
    DataFormat {
        rid: String,
        #[source]
        source: CodecError,
    },

    /// A change carried a value that may not be stored inline.
    #[error("Invalid content in {property}, storing binary rather than streaming it")]
    InvalidValue { property: String },

    /// The client was used after passivation or destruction.
    ///
    /// `traceback` is the backtrace captured where that happened.
    #[error("{message}, traceback of the release location follows:\n{traceback}")]
    Lifecycle { message: String, traceback: String },

    /// Both the primary write and its fallback affected zero rows.
    #[error("Failed to save {rid}")]
    SaveFailed { rid: String },

    /// Streamed body I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageClientError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn sql(context: impl Into<String>, source: SqlError) -> Self {
        Self::Sql {
            context: context.into(),
            source,
        }
    }

    pub fn data_format(rid: impl Into<String>, source: CodecError) -> Self {
        Self::DataFormat {
            rid: rid.into(),
            source,
        }
    }

    /// True for failures a connection reset may cure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sql { .. })
    }

    /// True for deployment mistakes that will fail the same way every time.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::StatementNotFound { .. } | Self::ColumnCollision { .. }
        )
    }

    pub fn is_data_format(&self) -> bool {
        matches!(self, Self::DataFormat { .. } | Self::InvalidValue { .. })
    }
}

impl From<CoreError> for StorageClientError {
    fn from(e: CoreError) -> Self {
        StorageClientError::Config(e.to_string())
    }
}
