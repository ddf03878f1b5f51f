//! Property map codec.
//!
//! A property map is stored as one opaque blob per row. The codec boundary is
//! the [`PropertyCodec`] trait; [`MessagePackCodec`] is the default
//! implementation.
//!
//! # Format
//!
//! | Field | Type | Meaning |
//! |-------|------|---------|
//! | `version` | u8 | format version, currently 1 |
//! | `family` | string | column family the row was written under |
//! | `properties` | map | the property map itself |
//!
//! The envelope is written with `rmp_serde::to_vec_named` so field names are
//! part of the blob.
//!
//! # Example: Round-trip
//!
//! ```rust
//! use sparse_map_core::{PropertyMap, Value};
//! use sparse_map_storage::serialization::{MessagePackCodec, PropertyCodec};
//!
//! let codec = MessagePackCodec::new();
//! let mut map = PropertyMap::new();
//! map.insert("title".to_string(), Value::from("hello"));
//! let bytes = codec.encode("rid", &map, "cn").unwrap();
//! assert_eq!(codec.decode("rid", "cn", &bytes).unwrap(), map);
//! ```

mod error;


use serde::{Deserialize, Serialize};
use sparse_map_core::PropertyMap;
use tracing::warn;

pub use error::CodecError;

/// Current envelope version.
pub const FORMAT_VERSION: u8 = 1;

/// Turns a property map into a storable blob and back.
///
/// `family` is a hint: implementations may lay out different column families
/// differently.
pub trait PropertyCodec: Send + Sync {
    fn encode(&self, rid: &str, properties: &PropertyMap, family: &str) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, rid: &str, family: &str, bytes: &[u8]) -> Result<PropertyMap, CodecError>;
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u8,
    family: &'a str,
    properties: &'a PropertyMap,
}

#[derive(Deserialize)]
struct Envelope {
    version: u8,
    family: String,
    properties: PropertyMap,
}

/// MessagePack codec with a versioned, family-tagged envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackCodec;

impl MessagePackCodec {
    pub fn new() -> Self {
        Self
    }
}

impl PropertyCodec for MessagePackCodec {
    fn encode(&self, _rid: &str, properties: &PropertyMap, family: &str) -> Result<Vec<u8>, CodecError> {
        if let Some((name, _)) = properties.iter().find(|(_, v)| v.is_binary()) {
            return Err(CodecError::BinaryValue {
                property: name.clone(),
            });
        }
        let envelope = EnvelopeRef {
            version: FORMAT_VERSION,
            family,
            properties,
        };
        rmp_serde::to_vec_named(&envelope).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, rid: &str, family: &str, bytes: &[u8]) -> Result<PropertyMap, CodecError> {
        let envelope: Envelope =
            rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(envelope.version));
        }
        if envelope.family != family {
            warn!(
                "Row {} was written under family {} but read as {}",
                rid, envelope.family, family
            );
        }
        Ok(envelope.properties)
    }
}
