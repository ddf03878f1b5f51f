//! Property values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single property value in a sparse row.
///
/// Stored rows only ever contain the scalar variants and `Array`. The other
/// three forms have special meaning on the write path:
/// - `Remove` and `Null` in a change set delete the property.
/// - `Binary` is rejected: large bodies go through the streamed-content
///   boundary, never inline in a property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Explicit absence. Deletes the property when used as a change.
    Null,
    /// Removal sentinel. Deletes the property when used as a change.
    Remove,
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    /// Raw bytes. Never storable in a property map.
    Binary(Vec<u8>),
}

impl Value {
    /// True if this value, used as a change, deletes the property.
    pub fn is_removal(&self) -> bool {
        matches!(self, Value::Remove | Value::Null)
    }

    /// True for raw binary payloads, including arrays containing them.
    pub fn is_binary(&self) -> bool {
        match self {
            Value::Binary(_) => true,
            Value::Array(items) => items.iter().any(Value::is_binary),
            _ => false,
        }
    }

    /// String form of a scalar for storage in an index slot.
    ///
    /// Returns `None` for arrays and the non-storable forms.
    pub fn to_index_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Date(d) => Some(d.to_rfc3339()),
            Value::Null | Value::Remove | Value::Array(_) | Value::Binary(_) => None,
        }
    }

    /// All index terms for this value: one per scalar, one per array element.
    pub fn index_terms(&self) -> Vec<String> {
        match self {
            Value::Array(items) => items.iter().filter_map(Value::to_index_string).collect(),
            other => other.to_index_string().into_iter().collect(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}
