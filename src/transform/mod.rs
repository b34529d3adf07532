//! Transform engine.
//!
//! # Responsibilities
//! - Compile a route's transform source once, when the route table loads
//! - Build the outbound body from the message document
//! - Derive outbound headers and query parameters from the original message
//!
//! # Design Decisions
//! - The set of transforms is closed: one enum, matched exhaustively
//! - Every variant except passthrough sees the same document:
//!   `{correlation_id, payload, metadata, headers, timestamp}`
//! - Mappings resolve against the original message, never the new body;
//!   a missing source path omits that header or parameter
//!
//! # Data Flow
//! ```text
//! Message ──► document() ──► Transform::apply ──► body
//!    │
//!    └──► header_mappings / query_mappings ──► headers, query_params
//! ```

pub mod jq;
pub mod jsonpath;
pub mod template;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;
use crate::routing::path::lookup_string;

pub use jq::Program;
pub use jsonpath::JsonPath;
pub use template::Template;

/// Errors from compiling or evaluating a transform.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    /// Malformed transform source; raised at load time.
    #[error("invalid transform: {0}")]
    Parse(String),

    /// The transform failed against a particular message.
    #[error("{0}")]
    Eval(String),
}

impl TransformError {
    /// The bare message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            TransformError::Parse(m) | TransformError::Eval(m) => m,
        }
    }
}

/// Transform kind as written in route configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformKind {
    #[default]
    #[serde(rename = "passthrough")]
    Passthrough,
    #[serde(rename = "jq", alias = "structural")]
    Structural,
    #[serde(rename = "jsonpath", alias = "path_extract")]
    PathExtract,
    #[serde(rename = "template")]
    Template,
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransformKind::Passthrough => "passthrough",
            TransformKind::Structural => "jq",
            TransformKind::PathExtract => "jsonpath",
            TransformKind::Template => "template",
        })
    }
}

/// A compiled transform.
#[derive(Debug, Clone)]
pub enum Transform {
    Passthrough,
    Structural(Program),
    PathExtract(JsonPath),
    Template(Template),
}

impl Transform {
    /// Compile `source` for the given kind. Passthrough ignores the source.
    pub fn compile(kind: TransformKind, source: Option<&str>) -> Result<Self, TransformError> {
        if kind == TransformKind::Passthrough {
            return Ok(Transform::Passthrough);
        }
        let source = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TransformError::Parse(format!("transform type '{}' requires a transform", kind)))?;

        Ok(match kind {
            TransformKind::Passthrough => Transform::Passthrough,
            TransformKind::Structural => Transform::Structural(Program::compile(source)?),
            TransformKind::PathExtract => Transform::PathExtract(JsonPath::compile(source)?),
            TransformKind::Template => Transform::Template(Template::compile(source)?),
        })
    }

    pub fn kind(&self) -> TransformKind {
        match self {
            Transform::Passthrough => TransformKind::Passthrough,
            Transform::Structural(_) => TransformKind::Structural,
            Transform::PathExtract(_) => TransformKind::PathExtract,
            Transform::Template(_) => TransformKind::Template,
        }
    }

    /// Build the outbound body for a message.
    pub fn apply(&self, message: &Message) -> Result<Value, TransformError> {
        match self {
            Transform::Passthrough => Ok(message.payload.clone()),
            Transform::Structural(program) => program.run(&message.document()),
            Transform::PathExtract(path) => path.extract(&message.document()),
            Transform::Template(template) => template.render(&message.document()),
        }
    }
}

/// Body, headers and query parameters for the outbound call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformedOutput {
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
}

/// Run a transform and resolve the header/query mappings for `message`.
pub fn transform_message(
    message: &Message,
    transform: &Transform,
    header_mappings: &BTreeMap<String, String>,
    query_mappings: &BTreeMap<String, String>,
) -> Result<TransformedOutput, TransformError> {
    let body = transform.apply(message)?;

    let doc = message.document();
    let resolve = |mappings: &BTreeMap<String, String>| {
        mappings
            .iter()
            .filter_map(|(name, path)| lookup_string(&doc, path).map(|v| (name.clone(), v)))
            .collect::<BTreeMap<_, _>>()
    };

    Ok(TransformedOutput {
        body,
        headers: resolve(header_mappings),
        query_params: resolve(query_mappings),
    })
}
