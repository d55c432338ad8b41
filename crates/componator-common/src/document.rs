//! Semantic comparison of JSON policy documents
//!
//! Providers hand documents back reformatted (whitespace, key order), so a
//! byte comparison would report drift on every pass. Documents are parsed
//! into [`serde_json::Value`] and compared structurally instead.

use serde_json::Value;

/// Compare two JSON documents for semantic equality
///
/// Key order and insignificant whitespace are ignored, and numbers compare by
/// numeric value (`1` equals `1.0`). If either document fails to parse the
/// documents are reported as different, which forces an update rather than
/// silently skipping a real change.
pub fn documents_equal(a: &str, b: &str) -> bool {
    match (parse_document(a), parse_document(b)) {
        (Some(a), Some(b)) => values_equal(&a, &b),
        _ => false,
    }
}

/// Parse a JSON document, returning `None` when it is not valid JSON
pub fn parse_document(doc: &str) -> Option<Value> {
    serde_json::from_str(doc).ok()
}

/// Structural equality over parsed JSON values
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            // Integer and float representations of the same value
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => false,
    }
}
