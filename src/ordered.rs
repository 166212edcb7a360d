use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// A JSON object that preserves insertion order of its keys.
///
/// All schema-shaped values in the gateway (function parameter schemas,
/// response-format schemas, `$defs` blocks) pass through this type rather
/// than a hash-based map: Gemini's schema evaluation is order-sensitive,
/// and user-authored schemas rely on author-specified property order.
/// Nested objects inside values stay ordered too, because the crate builds
/// `serde_json` with the `preserve_order` feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonMap(IndexMap<String, Value>);

impl JsonMap {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Insert or overwrite a key. Re-setting an existing key keeps its
    /// original position.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Key/value pairs in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Interpret a decoded JSON value as an ordered object. Anything other
    /// than an object is a decode error.
    pub fn from_value(value: Value) -> Result<Self, GatewayError> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(GatewayError::Conversion(format!(
                "expected JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }

    pub fn parse(json: &str) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn to_json(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl FromIterator<(String, Value)> for JsonMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for JsonMap {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
