//! JSON text encoding of variants.
//!
//! Used where the peer is a script environment: arrays travel as JSON arrays
//! of scalars. Binary values become arrays of byte numbers on the way out and
//! do not come back as binary; JSON peers should use strings instead.

use serde_json::{Number, Value};

use crate::error::{Result, VariantError};
use crate::value::Variant;

/// Convert one variant to a JSON value.
///
/// Non-finite numbers have no JSON form and become `null`.
pub fn to_json(value: &Variant) -> Value {
    match value {
        Variant::Null => Value::Null,
        Variant::Bool(b) => Value::Bool(*b),
        Variant::Number(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        Variant::String(s) => Value::String(s.clone()),
        Variant::Binary(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

/// Convert one JSON scalar to a variant.
pub fn from_json(value: &Value) -> Result<Variant> {
    match value {
        Value::Null => Ok(Variant::Null),
        Value::Bool(b) => Ok(Variant::Bool(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(Variant::Number)
            .ok_or_else(|| VariantError::UnsupportedJson(n.to_string())),
        Value::String(s) => Ok(Variant::String(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(VariantError::UnsupportedJson(value.to_string())),
    }
}

/// Encode an array as JSON text, e.g. `["getWidth",640.0]`.
pub fn encode_json_array(values: &[Variant]) -> String {
    Value::Array(values.iter().map(to_json).collect()).to_string()
}

/// Decode JSON text that must hold a top-level array of scalars.
pub fn decode_json_array(text: &str) -> Result<Vec<Variant>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => items.iter().map(from_json).collect(),
        other => Err(VariantError::UnsupportedJson(format!(
            "expected array, got {other}"
        ))),
    }
}
