//! Route matching logic.
//!
//! # Responsibilities
//! - Exact string match of a document field (`match_value`)
//! - Full-string regex match of a document field (`match_pattern`)
//! - Unconditional match for the default route
//!
//! # Design Decisions
//! - Field values are coerced with [`canonical_string`] before comparison
//! - Missing or null field = no match (not an error)
//! - Patterns are anchored at compile time so matching is never substring

use regex::Regex;
use serde_json::Value;

use crate::routing::path::{canonical_string, lookup_present};

/// Trait for matching message documents against a condition.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the document matches this condition.
    fn matches(&self, doc: &Value) -> bool;
}

/// Matches when the field's canonical string equals the expected value.
#[derive(Debug, Clone)]
pub struct FieldEquals {
    field: String,
    expected: String,
}

impl FieldEquals {
    pub fn new(field: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
        }
    }
}

impl Matcher for FieldEquals {
    fn matches(&self, doc: &Value) -> bool {
        lookup_present(doc, &self.field)
            .map(|v| canonical_string(v) == self.expected)
            .unwrap_or(false)
    }
}

/// Matches when the whole field value matches a regular expression.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    field: String,
    pattern: Regex,
}

impl FieldPattern {
    /// Compile an anchored pattern. Fails on invalid regex syntax.
    pub fn new(field: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let anchored = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            field: field.into(),
            pattern: anchored,
        })
    }
}

impl Matcher for FieldPattern {
    fn matches(&self, doc: &Value) -> bool {
        lookup_present(doc, &self.field)
            .map(|v| self.pattern.is_match(&canonical_string(v)))
            .unwrap_or(false)
    }
}

/// Matches everything (default route).
#[derive(Debug, Clone, Default)]
pub struct MatchAll;

impl Matcher for MatchAll {
    fn matches(&self, _doc: &Value) -> bool {
        true
    }
}
