//! Tolerant field deserializers for untrusted payloads.
//!
//! A field with an unexpected JSON type decodes as `None` instead of failing
//! the whole record. Only the identifier decides whether a record survives.

use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value};

/// Raw identifier as it appeared on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawId {
    Text(String),
    Number(Number),
    /// Present but of a type that cannot be an identifier (array, object, bool).
    Unsupported(&'static str),
}

/// Raw observation instant as it appeared on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInstant {
    Text(String),
    Number(Number),
}

pub fn boolean<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => Some(flag),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

pub fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn id<'de, D>(deserializer: D) -> Result<Option<RawId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(RawId::Text(s)),
        Value::Number(n) => Some(RawId::Number(n)),
        other => Some(RawId::Unsupported(json_kind(&other))),
    })
}

pub fn instant<'de, D>(deserializer: D) -> Result<Option<RawInstant>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(RawInstant::Text(s)),
        Value::Number(n) => Some(RawInstant::Number(n)),
        _ => None,
    })
}

pub fn integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Human-readable JSON type name for diagnostics.
#[must_use]
pub const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn nested<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    })
}
