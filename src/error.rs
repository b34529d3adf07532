//! Dispatch error taxonomy.
//!
//! The routing engine and transforms raise typed errors; the dispatcher wraps
//! them here; only the worker runtime decides requeue vs dead-letter vs ack.

use std::time::Duration;
use thiserror::Error;

/// Whether a failure may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Errors that can occur while dispatching a message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No route matched and no fallback is configured.
    #[error("no route matched message {correlation_id} and no fallback is configured")]
    NoRouteMatched { correlation_id: String },

    /// Transform evaluation failed on a route.
    #[error("transform on route '{route}' failed for message {correlation_id}: {reason}")]
    Transformation {
        route: String,
        correlation_id: String,
        reason: String,
    },

    /// Endpoint or route missing, invalid URL, bad header value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Endpoint declares an auth type but lacks credentials.
    #[error("authentication error for endpoint '{endpoint}': {reason}")]
    Authentication { endpoint: String, reason: String },

    /// The partition key field is absent and the policy is to reject.
    #[error("message {correlation_id} has no partition key")]
    MissingPartitionKey { correlation_id: String },

    /// Outbound call exceeded its deadline.
    #[error("request to '{endpoint}' timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    /// Connection refused, reset, DNS, ...
    #[error("network error calling '{endpoint}': {reason}")]
    Network { endpoint: String, reason: String },

    /// Response body larger than the configured limit.
    #[error("response from '{endpoint}' exceeds {limit} bytes")]
    ResponseTooLarge { endpoint: String, limit: usize },

    /// Failure reported by a custom handler.
    #[error("handler error: {message}")]
    Handler { message: String, retryable: bool },

    /// The message outlived `metadata.timeout` before it was dispatched.
    #[error("message {correlation_id} expired before processing")]
    Expired { correlation_id: String },

    /// Transform or handler code panicked while processing the message.
    #[error("dispatch panicked: {reason}")]
    Panicked { reason: String },
}

impl DispatchError {
    /// Network and timeout failures are transient; everything else is fatal.
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::Timeout { .. } | DispatchError::Network { .. } => ErrorClass::Retryable,
            DispatchError::Handler { retryable: true, .. } => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Short label for metrics and dead-letter entries.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::NoRouteMatched { .. } => "no_route",
            DispatchError::Transformation { .. } => "transformation",
            DispatchError::Configuration(_) => "configuration",
            DispatchError::Authentication { .. } => "authentication",
            DispatchError::MissingPartitionKey { .. } => "missing_partition_key",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Network { .. } => "network",
            DispatchError::ResponseTooLarge { .. } => "response_too_large",
            DispatchError::Handler { .. } => "handler",
            DispatchError::Expired { .. } => "expired",
            DispatchError::Panicked { .. } => "panic",
        }
    }
}

/// A dispatch error plus the retry budget of the route that produced it.
#[derive(Debug)]
pub struct DispatchFailure {
    pub error: DispatchError,
    /// Matched route, when routing got that far.
    pub route: Option<String>,
    /// Per-route `max_retries` override.
    pub max_retries: Option<u32>,
}

impl DispatchFailure {
    pub fn new(error: DispatchError) -> Self {
        Self {
            error,
            route: None,
            max_retries: None,
        }
    }

    pub fn on_route(mut self, route: &str, max_retries: Option<u32>) -> Self {
        self.route = Some(route.to_string());
        self.max_retries = max_retries;
        self
    }
}

impl From<DispatchError> for DispatchFailure {
    fn from(error: DispatchError) -> Self {
        Self::new(error)
    }
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for DispatchFailure {}
