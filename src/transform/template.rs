//! `{{dot.path}}` templates.
//!
//! A template that starts with `[`, or with a `{` that does not open a
//! placeholder, is JSON: each
//! placeholder inside a string literal is replaced by the escaped text of the
//! value, and each placeholder outside a string is replaced by the value's
//! JSON encoding, then the result is parsed. Any other template renders to a
//! JSON string, except a template that is exactly one placeholder, which
//! yields the referenced value unchanged.

use serde_json::Value;

use crate::routing::path::{canonical_string, lookup};
use crate::transform::TransformError;

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Placeholder {
        path: String,
        /// Sits inside a JSON string literal.
        quoted: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
    json: bool,
}

impl Template {
    pub fn compile(source: &str) -> Result<Self, TransformError> {
        let json = looks_like_json(source);
        let mut parts = Vec::new();
        let mut rest = source;
        let mut in_string = false;

        while let Some(open) = rest.find("{{") {
            let literal = &rest[..open];
            if json {
                in_string = track_quotes(literal, in_string);
            }
            if !literal.is_empty() {
                parts.push(Part::Literal(literal.to_string()));
            }

            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                return Err(TransformError::Parse(format!(
                    "unterminated placeholder in template '{}'",
                    source
                )));
            };
            let path = after[..close].trim();
            if path.is_empty() {
                return Err(TransformError::Parse("empty placeholder '{{}}'".to_string()));
            }
            parts.push(Part::Placeholder {
                path: path.to_string(),
                quoted: json && in_string,
            });
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
            json,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder paths in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Placeholder { path, .. } => Some(path.as_str()),
            Part::Literal(_) => None,
        })
    }

    pub fn render(&self, doc: &Value) -> Result<Value, TransformError> {
        if let [Part::Placeholder { path, .. }] = self.parts.as_slice() {
            return resolve(doc, path).cloned();
        }

        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Placeholder { path, quoted } => {
                    let value = resolve(doc, path)?;
                    if !self.json {
                        out.push_str(&canonical_string(value));
                    } else if *quoted {
                        out.push_str(&escape(&canonical_string(value)));
                    } else {
                        out.push_str(&serde_json::to_string(value).unwrap_or_default());
                    }
                }
            }
        }

        if self.json {
            serde_json::from_str(&out).map_err(|e| {
                TransformError::Eval(format!("template did not render valid JSON: {}", e))
            })
        } else {
            Ok(Value::String(out))
        }
    }
}

fn looks_like_json(source: &str) -> bool {
    let trimmed = source.trim_start();
    trimmed.starts_with('[') || (trimmed.starts_with('{') && !trimmed.starts_with("{{"))
}

fn resolve<'a>(doc: &'a Value, path: &str) -> Result<&'a Value, TransformError> {
    lookup(doc, path)
        .ok_or_else(|| TransformError::Eval(format!("unresolved placeholder '{{{{{}}}}}'", path)))
}

/// Quote state after scanning `text`, given the state before it.
fn track_quotes(text: &str, mut in_string: bool) -> bool {
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ => {}
        }
    }
    in_string
}

/// JSON string escaping without the surrounding quotes.
fn escape(text: &str) -> String {
    let quoted = serde_json::to_string(text).unwrap_or_default();
    quoted
        .strip_prefix('"')
        .and_then(|q| q.strip_suffix('"'))
        .unwrap_or_default()
        .to_string()
}
