//! Data model types: values, property maps, sparse rows.

mod property_map;
mod value;

pub use property_map::{
    is_deleted, PropertyMap, SparseRow, DELETED_FIELD, DELETED_MARKER, PARENT_HASH_FIELD,
};
pub use value::Value;
