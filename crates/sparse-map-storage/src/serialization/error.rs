//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding a property map.
///
/// These are data-format errors: they say the bytes or the values are bad,
/// never that the database is unreachable. They surface as
/// [`StorageClientError::DataFormat`](crate::StorageClientError::DataFormat).
///
/// `rmp_serde` errors do not implement `Clone`, so messages are kept as
/// `String`.
///
/// # Example
///
/// ```rust
/// use sparse_map_storage::serialization::CodecError;
///
/// let error = CodecError::BinaryValue { property: "body".to_string() };
/// assert!(error.to_string().contains("body"));
/// ```
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// Malformed bytes, including invalid text encoding inside a value.
    #[error("Decoding failed: {0}")]
    Decode(String),

    /// Raw binary values belong to the streamed-content boundary.
    #[error("Property {property} holds binary content, which cannot be stored inline")]
    BinaryValue { property: String },

    #[error("Unsupported property map format version {0}")]
    UnsupportedVersion(u8),
}
