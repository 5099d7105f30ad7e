use std::fmt;

use bytes::Bytes;
use serde::ser::{Serialize, Serializer};

/// One tagged argument value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Binary(Bytes),
}

impl Variant {
    /// Short kind name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Variant::Null => "null",
            Variant::Bool(_) => "bool",
            Variant::Number(_) => "number",
            Variant::String(_) => "string",
            Variant::Binary(_) => "binary",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value truncated toward zero, if it is a finite number.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().filter(|n| n.is_finite()).map(|n| n as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Variant::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => f.write_str("null"),
            Variant::Bool(b) => write!(f, "{b}"),
            Variant::Number(n) => write!(f, "{n}"),
            Variant::String(s) => write!(f, "{s:?}"),
            Variant::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Variant::Null => serializer.serialize_unit(),
            Variant::Bool(b) => serializer.serialize_bool(*b),
            Variant::Number(n) => serializer.serialize_f64(*n),
            Variant::String(s) => serializer.serialize_str(s),
            Variant::Binary(b) => serializer.serialize_bytes(b),
        }
    }
}

impl From<()> for Variant {
    fn from(_: ()) -> Self {
        Variant::Null
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Number(value)
    }
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        Variant::Number(f64::from(value))
    }
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Variant::Number(f64::from(value))
    }
}

impl From<u32> for Variant {
    fn from(value: u32) -> Self {
        Variant::Number(f64::from(value))
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<Bytes> for Variant {
    fn from(value: Bytes) -> Self {
        Variant::Binary(value)
    }
}

impl From<Vec<u8>> for Variant {
    fn from(value: Vec<u8>) -> Self {
        Variant::Binary(Bytes::from(value))
    }
}

impl<T: Into<Variant>> From<Option<T>> for Variant {
    fn from(value: Option<T>) -> Self {
        value.map_or(Variant::Null, Into::into)
    }
}
