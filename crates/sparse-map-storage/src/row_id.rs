//! Row identity derivation.
//!
//! A row id is the lowercase hex digest of `"keyspace:columnFamily:key"`.
//! Its first character is the shard tag used to route point statements to a
//! sharded table variant.
//!
//! # Example
//! ```rust
//! use sparse_map_core::HashAlgorithm;
//! use sparse_map_storage::row_id::RowHasher;
//!
//! let hasher = RowHasher::new(HashAlgorithm::Md5);
//! let rid = hasher.row_id("n", "cn", "/content/a");
//! assert_eq!(rid.as_str().len(), 32);
//! assert_eq!(rid.shard(), rid.as_str().chars().next().unwrap());
//! ```

use std::fmt;

use sha2::{Digest, Sha256, Sha512};
use sparse_map_core::{HashAlgorithm, StorageConfig};

use crate::error::StorageResult;

/// Deterministic address of one (keyspace, column family, key) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowId(String);

impl RowId {
    /// Wrap an already-computed row id, e.g. one read back from a scan.
    pub fn from_hex(rid: impl Into<String>) -> Self {
        Self(rid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// One-character shard discriminator: the first character of the id.
    pub fn shard(&self) -> char {
        shard_of(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shard tag of a row id string. An empty id maps to `'0'`.
pub fn shard_of(rid: &str) -> char {
    rid.chars().next().unwrap_or('0')
}

/// Computes row ids with one configured digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowHasher {
    algorithm: HashAlgorithm,
}

impl RowHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Build from configuration.
    ///
    /// # Errors
    /// `StorageClientError::Config` if `rowid_hash` names an unsupported digest.
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        Ok(Self::new(config.hash_algorithm()?))
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Row id of `keyspace:column_family:key`.
    pub fn row_id(&self, keyspace: &str, column_family: &str, key: &str) -> RowId {
        let input = format!("{}:{}:{}", keyspace, column_family, key);
        let digest = match self.algorithm {
            HashAlgorithm::Md5 => hex::encode(md5::compute(input.as_bytes()).0),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(input.as_bytes())),
        };
        RowId(digest)
    }
}
