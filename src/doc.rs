//! Safe accessors for schema-less JSON documents.
//!
//! Source events and reasoning-stage outputs are untyped documents; a
//! malformed or partial upstream response must degrade to "field absent",
//! never panic a stage. These helpers return defaults instead of erroring.

use serde_json::Value;

/// Fetch a field as a string. Numbers are stringified (source APIs flip
/// between `"severity": "4"` and `"severity": 4` freely).
pub fn str_field(doc: &Value, field: &str) -> Option<String> {
    match doc.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Fetch a field as f64, accepting numeric strings.
pub fn f64_field(doc: &Value, field: &str) -> Option<f64> {
    match doc.get(field) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Fetch a field as a list; absent or non-array yields an empty slice.
pub fn list_field<'a>(doc: &'a Value, field: &str) -> &'a [Value] {
    doc.get(field).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Fetch a string list, stringifying scalar members and skipping the rest.
pub fn str_list_field(doc: &Value, field: &str) -> Vec<String> {
    match doc.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// True when the document carries a non-empty value under `field`.
pub fn has_field(doc: &Value, field: &str) -> bool {
    match doc.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}

/// True when the document is a stage error sentinel.
pub fn is_error(doc: &Value) -> bool {
    doc.get("_error").is_some()
}
