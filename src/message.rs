//! Message, result and dead-letter types shared by every subsystem.
//!
//! # Lifecycle
//! ```text
//! ingress / external publisher
//!     → Message (PENDING, correlation_id assigned, immutable id)
//!     → worker dequeues (PROCESSING)
//!     → ProcessingResult (COMPLETED | FAILED | TIMEOUT), written once
//!     → result store / response queue
//! ```

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Metadata key carrying the number of retries already performed.
pub const RETRY_COUNT_KEY: &str = "retry_count";

/// Metadata key carrying the error text of every failed attempt.
pub const ERRORS_KEY: &str = "errors";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Processing status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl MessageStatus {
    /// Terminal states are entered exactly once and never left.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Failed | MessageStatus::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Processing => "PROCESSING",
            MessageStatus::Completed => "COMPLETED",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work flowing through the mediator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque identifier assigned at ingress.
    pub correlation_id: String,

    /// Arbitrary structured document.
    pub payload: Value,

    /// Routing hints (`type`, `session_id`, `endpoint`, `priority`, `retry_count`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Headers to forward to the target endpoint.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Creation time in milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: u64,

    #[serde(default)]
    pub status: MessageStatus,

    /// Present only on entries published to the dead-letter queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<DeadLetterInfo>,
}

impl Message {
    /// Create a new pending message with a fresh correlation id.
    pub fn new(payload: Value) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    /// Create a new pending message with an explicit correlation id.
    pub fn with_id(correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload,
            metadata: Map::new(),
            headers: BTreeMap::new(),
            timestamp: now_millis(),
            status: MessageStatus::Pending,
            dead_letter: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// String-valued metadata entry.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Retries already performed for this message.
    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get(RETRY_COUNT_KEY)
            .and_then(Value::as_u64)
            .map(|n| n.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(0)
    }

    pub fn set_retry_count(&mut self, count: u32) {
        self.metadata.insert(RETRY_COUNT_KEY.to_string(), Value::from(count));
    }

    /// Append the error of a failed attempt to `metadata.errors`.
    pub fn record_error(&mut self, error: &str) {
        let entry = self
            .metadata
            .entry(ERRORS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(Value::from(error)),
            other => *other = Value::Array(vec![Value::from(error)]),
        }
    }

    /// Errors accumulated across attempts, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.metadata
            .get(ERRORS_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Absolute deadline (ms since epoch) derived from `metadata.timeout` seconds.
    pub fn deadline(&self) -> Option<u64> {
        let secs = self.metadata.get("timeout").and_then(Value::as_u64)?;
        Some(self.timestamp.saturating_add(secs.saturating_mul(1000)))
    }

    /// The logical document routing and transforms operate on.
    pub fn document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(
            "correlation_id".to_string(),
            Value::String(self.correlation_id.clone()),
        );
        doc.insert("payload".to_string(), self.payload.clone());
        doc.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        doc.insert(
            "headers".to_string(),
            Value::Object(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        doc.insert("timestamp".to_string(), Value::from(self.timestamp));
        Value::Object(doc)
    }
}

/// Final outcome of a message, produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub correlation_id: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    pub processing_time_ms: u64,
    pub completed_at: u64,
}

impl ProcessingResult {
    /// A call that completed, whatever status code the backend returned.
    pub fn completed(
        correlation_id: impl Into<String>,
        body: Value,
        status_code: Option<u16>,
        response_headers: BTreeMap<String, String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: MessageStatus::Completed,
            body: Some(body),
            response_headers,
            status_code,
            error: None,
            route: None,
            processing_time_ms,
            completed_at: now_millis(),
        }
    }

    /// A message that reached `FAILED` or `TIMEOUT`.
    pub fn failed(
        correlation_id: impl Into<String>,
        status: MessageStatus,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status,
            body: None,
            response_headers: BTreeMap::new(),
            status_code: None,
            error: Some(error.into()),
            route: None,
            processing_time_ms,
            completed_at: now_millis(),
        }
    }

    pub fn with_route(mut self, route: Option<String>) -> Self {
        self.route = route;
        self
    }
}

/// Failure details attached to a dead-lettered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterInfo {
    /// Error of the final attempt.
    pub error: String,
    /// Error kind label (`timeout`, `transformation`, ...).
    pub kind: String,
    /// Every attempt's error, oldest first.
    #[serde(default)]
    pub errors: Vec<String>,
    pub retry_count: u32,
    pub worker_id: String,
    pub failed_at: u64,
}
