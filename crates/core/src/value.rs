//! Storable values
//!
//! Rows are arbitrary self-describing data. `Value` is the tagged sum type
//! they are modeled as; every branch serializes through serde so the same
//! type feeds the row codec, the WAL and the snapshot stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unified value type for row payloads.
///
/// Maps use `BTreeMap` so serialization is deterministic, which keeps
/// snapshot bytes stable for identical logical states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Point in time (UTC)
    Timestamp(DateTime<Utc>),
    /// Ordered list of values
    List(Vec<Value>),
    /// Map of string field names to values
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Look up a named field; `None` unless `self` is a map holding it.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Mutable variant of [`Value::field`].
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Map(fields) => fields.get_mut(name),
            _ => None,
        }
    }

    /// Insert or replace a field. No-op unless `self` is a map.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        if let Value::Map(fields) = self {
            fields.insert(name.into(), value);
        }
    }

    /// Build a map value from `(name, value)` pairs.
    ///
    /// This is the usual way tests and callers assemble rows:
    ///
    /// ```
    /// use tessera_core::Value;
    ///
    /// let row = Value::record([("id", Value::Int(1)), ("name", "ada".into())]);
    /// assert_eq!(row.field("name"), Some(&Value::Text("ada".into())));
    /// ```
    pub fn record<N, I>(fields: I) -> Value
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Value)>,
    {
        Value::Map(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Short human label for the branch, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// True if this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}
