//! [`Value`]: the tagged-union representation of a single document field,
//! generalizing the teacher's `AttributeValue` model
//! (`ruststack-dynamodb-model::attribute_value`) to the attribute types the
//! schema DSL declares (`spec.md` §4.2).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single document field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Value {
    /// Absence of a value, distinct from a field simply not being present.
    Null,
    /// A boolean scalar.
    Bool(bool),
    /// A numeric scalar, stored as an IEEE-754 double per `spec.md` §4.5.
    Number(f64),
    /// A UTF-8 string scalar.
    String(String),
    /// A UTC timestamp, stored and transmitted as ISO-8601.
    Date(chrono::DateTime<chrono::Utc>),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// An unordered map of values, keyed by attribute name.
    Object(BTreeMap<String, Value>),
    /// Opaque binary data (e.g. a decoded `secret` field before re-encryption).
    Bytes(Vec<u8>),
    /// A fixed-length embedding vector, quantized+compressed on the wire
    /// per `spec.md` §4.2 but represented here as plain floats.
    Embedding(Vec<f32>),
}

impl Value {
    /// The DSL primitive name this value corresponds to, used for
    /// validation error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Bytes(_) => "bytes",
            Value::Embedding(_) => "embedding",
        }
    }

    /// Borrow as a string, if this value is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow as a number, if this value is one.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// `true` if this value is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Deterministic stringification used by `user-managed`/`enforce-limits`/
    /// `truncate-data` behaviors when writing scalars into S3 metadata
    /// (`spec.md` §4.2: "Scalars are stringified with deterministic format").
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            // Nanos, not Millis: the reverse mapper parses this back with
            // `DateTime::parse_from_rfc3339`, and anything coarser silently
            // drops precision on every round-trip (spec.md §8 invariant #1).
            Value::Date(d) => d.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
            Value::Bytes(b) => base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b),
            Value::Embedding(_) => String::new(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}
