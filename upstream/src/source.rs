//! Read-only JSON documents as returned by the donation platform.

use crate::path;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Renders a value the way it should appear as text. Strings are unquoted,
/// numbers and booleans use their literal form, containers are raw JSON.
pub fn as_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Integer coercion. Floats truncate, numeric strings parse, anything else is 0.
pub fn as_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or_default(),
        Value::Bool(true) => 1,
        _ => 0,
    }
}

pub fn as_float(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or_default(),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

pub fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.as_str(), "1" | "t" | "T" | "true" | "TRUE" | "True"),
        _ => false,
    }
}

/// An immutable JSON document with typed path lookups.
///
/// Cloning is cheap; clones share the parsed tree. A path "exists" when it is
/// present and not `null`, so every typed accessor returns `None` for both.
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    data: Arc<Value>,
}

impl SourceDocument {
    pub fn new(data: Value) -> Self {
        SourceDocument {
            data: Arc::new(data),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(Self::new)
    }

    /// A document with no fields. Every lookup on it reports absence.
    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    pub fn value(&self) -> &Value {
        &self.data
    }

    /// The top-level object, if the document is one.
    pub fn raw_object(&self) -> Option<&Map<String, Value>> {
        self.data.as_object()
    }

    pub fn is_empty(&self) -> bool {
        match self.data.as_ref() {
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    /// Resolves a path expression, treating `null` as absent.
    pub fn lookup(&self, expr: &str) -> Option<Value> {
        path::resolve(&self.data, expr).filter(|v| !v.is_null())
    }

    pub fn exists(&self, expr: &str) -> bool {
        self.lookup(expr).is_some()
    }

    pub fn string_at(&self, expr: &str) -> Option<String> {
        self.lookup(expr).map(|v| as_string(&v))
    }

    pub fn int_at(&self, expr: &str) -> Option<i64> {
        self.lookup(expr).map(|v| as_int(&v))
    }

    pub fn float_at(&self, expr: &str) -> Option<f64> {
        self.lookup(expr).map(|v| as_float(&v))
    }

    pub fn bool_at(&self, expr: &str) -> Option<bool> {
        self.lookup(expr).map(|v| as_bool(&v))
    }

    /// Array elements at `expr` as documents. Missing or non-array paths give
    /// an empty list.
    pub fn array_at(&self, expr: &str) -> Vec<SourceDocument> {
        match self.lookup(expr) {
            Some(Value::Array(items)) => items.into_iter().map(SourceDocument::new).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Value> for SourceDocument {
    fn from(value: Value) -> Self {
        SourceDocument::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> SourceDocument {
        SourceDocument::new(json!({
            "uuid": "p-1",
            "total": 4321,
            "public": {"exerciseTotal": "12.9", "optIn": "true", "nothing": null},
            "user": {"uuid": "u-1", "verified": true},
            "items": [{"a": 1}, {"a": 2}]
        }))
    }

    #[test]
    fn test_typed_lookups() {
        let doc = page();
        assert_eq!(doc.string_at("uuid").as_deref(), Some("p-1"));
        assert_eq!(doc.string_at("total").as_deref(), Some("4321"));
        assert_eq!(doc.string_at("user.verified").as_deref(), Some("true"));
        assert_eq!(doc.int_at("total"), Some(4321));
        assert_eq!(doc.int_at("public.exerciseTotal"), Some(12));
        assert_eq!(doc.bool_at("public.optIn"), Some(true));
        assert_eq!(doc.bool_at("user.verified"), Some(true));
    }

    #[test]
    fn test_large_unsigned_saturates() {
        assert_eq!(as_int(&json!(u64::MAX)), i64::MAX);
        assert_eq!(as_int(&json!(i64::MAX as u64 + 1)), i64::MAX);
        assert_eq!(as_int(&json!(i64::MAX as u64)), i64::MAX);
    }

    #[test]
    fn test_null_is_absent() {
        let doc = page();
        assert!(!doc.exists("public.nothing"));
        assert_eq!(doc.string_at("public.nothing"), None);
        assert_eq!(doc.int_at("public.missing"), None);
    }

    #[test]
    fn test_array_at() {
        let doc = page();
        let items = doc.array_at("items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].int_at("a"), Some(2));
        assert!(doc.array_at("uuid").is_empty());
    }

    #[test]
    fn test_empty_document() {
        let doc = SourceDocument::empty();
        assert!(doc.is_empty());
        assert!(!doc.exists("anything"));
        assert!(doc.raw_object().is_some_and(|m| m.is_empty()));
    }

    #[test]
    fn test_parse() {
        let doc = SourceDocument::parse(r#"{"a": {"b": "c"}}"#).unwrap();
        assert_eq!(doc.string_at("a.b").as_deref(), Some("c"));
        assert!(SourceDocument::parse("{").is_err());
    }
}
