//! Route table and lookup.
//!
//! # Responsibilities
//! - Compile route configuration into matchers and transforms
//! - Order routes by priority, keeping declaration order on ties
//! - Select the first matching route, or the fallback endpoint
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Reload builds a new table and swaps it whole
//! - Compilation reports every invalid route, not just the first
//! - Explicit no-match error unless fallback is configured

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde_json::Value;

use crate::config::schema::{RouteConfig, RouteFile};
use crate::config::validation::ValidationError;
use crate::error::DispatchError;
use crate::message::Message;
use crate::routing::matcher::{FieldEquals, FieldPattern, MatchAll, Matcher};
use crate::routing::path::canonical_string;
use crate::transform::{Transform, TransformKind};

/// A route ready for matching and dispatch.
#[derive(Debug)]
pub struct CompiledRoute {
    pub name: String,
    pub priority: i32,
    matcher: Box<dyn Matcher>,
    pub transform: Transform,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub header_mappings: BTreeMap<String, String>,
    pub query_mappings: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub partition_key_field: Option<String>,
}

impl CompiledRoute {
    pub fn matches(&self, doc: &Value) -> bool {
        self.matcher.matches(doc)
    }

    fn compile(index: usize, config: &RouteConfig) -> Result<Self, Vec<ValidationError>> {
        let field = |name: &str| format!("routing.routes[{}].{}", index, name);
        let mut errors = Vec::new();

        if config.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        }

        let conditions = [
            config.match_value.is_some(),
            config.match_pattern.is_some(),
            config.is_default,
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if conditions != 1 {
            errors.push(ValidationError::new(
                field("match_value"),
                format!(
                    "route '{}' needs exactly one of match_value, match_pattern or is_default",
                    config.name
                ),
            ));
        }

        let match_field = config.match_field.as_deref().map(str::trim).unwrap_or("");
        if !config.is_default && match_field.is_empty() {
            errors.push(ValidationError::new(
                field("match_field"),
                format!("route '{}' has a match condition but no match_field", config.name),
            ));
        }

        let matcher: Option<Box<dyn Matcher>> = if config.is_default {
            Some(Box::new(MatchAll))
        } else if let Some(value) = &config.match_value {
            Some(Box::new(FieldEquals::new(match_field, canonical_string(value))))
        } else if let Some(pattern) = &config.match_pattern {
            match FieldPattern::new(match_field, pattern) {
                Ok(m) => Some(Box::new(m)),
                Err(e) => {
                    errors.push(ValidationError::new(
                        field("match_pattern"),
                        format!("invalid regex '{}': {}", pattern, e),
                    ));
                    None
                }
            }
        } else {
            None
        };

        let source = match &config.transform {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) if config.transform_type == TransformKind::Template => {
                Some(serde_json::to_string(other).unwrap_or_default())
            }
            Some(_) => {
                errors.push(ValidationError::new(
                    field("transform"),
                    format!("{} transforms must be strings", config.transform_type),
                ));
                None
            }
        };
        let transform = match Transform::compile(config.transform_type, source.as_deref()) {
            Ok(t) => Some(t),
            Err(e) => {
                errors.push(ValidationError::new(field("transform"), e.to_string()));
                None
            }
        };

        if let Some(method) = &config.method {
            if reqwest::Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    field("method"),
                    format!("'{}' is not an HTTP method", method),
                ));
            }
        }

        match (matcher, transform) {
            (Some(matcher), Some(transform)) if errors.is_empty() => Ok(Self {
                name: config.name.clone(),
                priority: config.priority,
                matcher,
                transform,
                endpoint: config.endpoint.clone(),
                method: config.method.clone(),
                header_mappings: config.header_mappings.clone(),
                query_mappings: config.query_mappings.clone(),
                timeout: config.timeout_secs.map(Duration::from_secs),
                max_retries: config.max_retries,
                partition_key_field: config.partition_key_field.clone(),
            }),
            _ => Err(errors),
        }
    }
}

/// Outcome of routing a message.
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Route(&'a CompiledRoute),
    /// Nothing matched; send the payload unchanged to this endpoint.
    Fallback { endpoint: &'a str },
}

/// An immutable, priority-ordered set of routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    default_endpoint: Option<String>,
    enable_fallback: bool,
}

impl RouteTable {
    /// Compile routes, dropping disabled ones and sorting by priority (stable).
    pub fn compile(
        routes: &[RouteConfig],
        default_endpoint: Option<String>,
        enable_fallback: bool,
    ) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut compiled = Vec::new();
        let mut seen = HashSet::new();

        for (i, config) in routes.iter().enumerate() {
            if !seen.insert(config.name.as_str()) {
                errors.push(ValidationError::new(
                    format!("routing.routes[{}].name", i),
                    format!("duplicate route name '{}'", config.name),
                ));
            }
            if !config.enabled {
                continue;
            }
            match CompiledRoute::compile(i, config) {
                Ok(route) => compiled.push(route),
                Err(route_errors) => errors.extend(route_errors),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        compiled.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self {
            routes: compiled,
            default_endpoint,
            enable_fallback,
        })
    }

    pub fn from_file(file: &RouteFile) -> Result<Self, Vec<ValidationError>> {
        Self::compile(
            &file.routes,
            file.default_endpoint.clone(),
            file.enable_fallback,
        )
    }

    /// A table with no routes that sends everything to `endpoint`.
    pub fn fallback_only(endpoint: Option<String>) -> Self {
        Self {
            routes: Vec::new(),
            enable_fallback: endpoint.is_some(),
            default_endpoint: endpoint,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes in evaluation order.
    pub fn routes(&self) -> impl Iterator<Item = &CompiledRoute> {
        self.routes.iter()
    }

    pub fn default_endpoint(&self) -> Option<&str> {
        self.default_endpoint.as_deref()
    }

    /// First matching route for a document, if any.
    pub fn find(&self, doc: &Value) -> Option<&CompiledRoute> {
        self.routes.iter().find(|route| route.matches(doc))
    }

    /// Route a message, falling back to the default endpoint when allowed.
    pub fn match_message(&self, message: &Message) -> Result<RouteMatch<'_>, DispatchError> {
        let doc = message.document();
        if let Some(route) = self.find(&doc) {
            return Ok(RouteMatch::Route(route));
        }
        match (&self.default_endpoint, self.enable_fallback) {
            (Some(endpoint), true) => Ok(RouteMatch::Fallback { endpoint }),
            _ => Err(DispatchError::NoRouteMatched {
                correlation_id: message.correlation_id.clone(),
            }),
        }
    }
}
