//! Dot-path lookup into message documents.
//!
//! Paths such as `metadata.type` or `payload.items.0.sku` walk objects by key
//! and arrays by decimal index. A missing segment yields `None`, never an error.

use serde_json::Value;

/// Resolve a dot-path against a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(doc);
    }

    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Resolve a dot-path, treating JSON `null` as absent.
pub fn lookup_present<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    lookup(doc, path).filter(|v| !v.is_null())
}

/// Canonical string form of a value.
///
/// Strings are returned raw (no quotes), numbers and booleans via their JSON
/// text, and objects/arrays as compact JSON. `serde_json` maps are ordered by
/// key, so the serialization of an object is canonical.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Look up a path and render it as a string, `None` if missing or null.
pub fn lookup_string(doc: &Value, path: &str) -> Option<String> {
    lookup_present(doc, path).map(canonical_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_lookup() {
        let doc = json!({"metadata": {"user": {"id": 123}}});
        assert_eq!(lookup(&doc, "metadata.user.id"), Some(&json!(123)));
        assert_eq!(lookup(&doc, "metadata.missing"), None);
        assert_eq!(lookup(&doc, "metadata.user.id.deeper"), None);
    }

    #[test]
    fn test_array_index() {
        let doc = json!({"payload": {"items": [{"sku": "a"}, {"sku": "b"}]}});
        assert_eq!(lookup(&doc, "payload.items.1.sku"), Some(&json!("b")));
        assert_eq!(lookup(&doc, "payload.items.9.sku"), None);
        assert_eq!(lookup(&doc, "payload.items.x"), None);
    }

    #[test]
    fn test_null_is_absent() {
        let doc = json!({"a": null});
        assert!(lookup(&doc, "a").is_some());
        assert!(lookup_present(&doc, "a").is_none());
    }

    #[test]
    fn test_canonical_string() {
        assert_eq!(canonical_string(&json!("text")), "text");
        assert_eq!(canonical_string(&json!(42)), "42");
        assert_eq!(canonical_string(&json!(true)), "true");
        assert_eq!(canonical_string(&json!({"b": 1, "a": [1, 2]})), r#"{"a":[1,2],"b":1}"#);
    }
}
