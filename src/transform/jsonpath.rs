//! JSONPath extraction (RFC 9535) over the message document.
//!
//! Results collapse as follows: one match yields the value itself, several
//! matches yield an array in document order, no match is an error.

use std::sync::Arc;

use serde_json::Value;

use crate::transform::TransformError;

/// A compiled path expression.
#[derive(Debug, Clone)]
pub struct JsonPath {
    source: String,
    path: Arc<serde_json_path::JsonPath>,
}

impl JsonPath {
    pub fn compile(source: &str) -> Result<Self, TransformError> {
        let path = serde_json_path::JsonPath::parse(source).map_err(|e| {
            TransformError::Parse(format!("invalid JSONPath '{}': {}", source, e))
        })?;
        Ok(Self {
            source: source.to_string(),
            path: Arc::new(path),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every matching node in document order.
    pub fn select<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        self.path.query(doc).all()
    }

    /// Extract with the single-or-array collapse rule.
    pub fn extract(&self, doc: &Value) -> Result<Value, TransformError> {
        let mut matches = self.select(doc);
        match matches.len() {
            0 => Err(TransformError::Eval(format!(
                "path '{}' matched nothing",
                self.source
            ))),
            1 => Ok(matches.remove(0).clone()),
            _ => Ok(Value::Array(matches.into_iter().cloned().collect())),
        }
    }
}
