//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the mediator.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transform::TransformKind;

/// Root configuration for the mediator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MediatorConfig {
    /// Ingress listener (submit / status / response API).
    pub listener: ListenerConfig,

    /// Queue names and consumer group.
    pub queue: QueueConfig,

    /// Worker pool and retry settings.
    pub worker: WorkerConfig,

    /// Outbound endpoints and header policy.
    pub proxy: ProxyConfig,

    /// Route set, inline or from a file.
    pub routing: RoutingConfig,

    /// Partition assignment and session affinity.
    pub partitioning: PartitioningConfig,

    /// Result store settings.
    pub results: ResultsConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown.
    pub shutdown: ShutdownConfig,
}

/// Ingress listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Serve the ingress API from this process.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Largest accepted submission body.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8000".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Queue naming.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub request_queue_name: String,
    pub response_queue_name: String,
    pub dlq_name: String,

    /// Consumer group shared by workers (suffixed per worker when partitioned).
    pub consumer_group: String,

    /// How long a receive waits for messages before returning empty, in ms.
    pub receive_wait_ms: u64,

    /// Entries kept on queues without consumers (responses, dead letters).
    pub max_unconsumed: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_queue_name: "mediator-requests".to_string(),
            response_queue_name: "mediator-responses".to_string(),
            dlq_name: "mediator-dlq".to_string(),
            consumer_group: "mediator-workers".to_string(),
            receive_wait_ms: 1000,
            max_unconsumed: 10_000,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker slots run by this process.
    pub count: usize,

    /// Global index of this process's first slot.
    pub index_offset: usize,

    /// Worker slots across all processes; defaults to `index_offset + count`.
    pub total: Option<usize>,

    /// Messages received and processed concurrently per worker.
    pub batch_size: usize,

    /// Default outbound timeout when neither route nor endpoint sets one.
    pub timeout_secs: u64,

    /// Retries before a retryable failure is dead-lettered.
    pub max_retries: u32,

    /// Backoff base delay in milliseconds.
    pub retry_delay_base_ms: u64,

    /// Backoff cap in milliseconds.
    pub retry_delay_max_ms: u64,

    /// Add random jitter to backoff delays.
    pub retry_jitter: bool,
}

impl WorkerConfig {
    pub fn total_workers(&self) -> usize {
        self.total.unwrap_or(self.index_offset + self.count)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 5,
            index_offset: 0,
            total: None,
            batch_size: 10,
            timeout_secs: 300,
            max_retries: 3,
            retry_delay_base_ms: 1000,
            retry_delay_max_ms: 60_000,
            retry_jitter: false,
        }
    }
}

/// Outbound proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Dispatch over HTTP; when false the custom handler is invoked instead.
    pub enabled: bool,

    /// Named endpoint definitions.
    pub endpoints: BTreeMap<String, EndpointConfig>,

    /// Endpoint name or absolute URL used when a message carries no route.
    pub default_endpoint: Option<String>,

    /// Message headers allowed through (case-insensitive, `*` = all).
    pub forward_headers: Vec<String>,

    /// Message headers never forwarded (case-insensitive).
    pub strip_headers: Vec<String>,

    /// Largest accepted response body in bytes.
    pub max_response_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoints: BTreeMap::new(),
            default_endpoint: None,
            forward_headers: vec![
                "Content-Type".to_string(),
                "Accept".to_string(),
                "User-Agent".to_string(),
            ],
            strip_headers: vec!["Host".to_string(), "Connection".to_string()],
            max_response_size: 10 * 1024 * 1024,
        }
    }
}

/// Authentication scheme of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    Basic,
    ApiKey,
    Custom,
}

/// A target endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Request timeout in seconds.
    #[serde(default, alias = "timeout")]
    pub timeout_secs: Option<u64>,

    /// Static headers sent on every call.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub auth_type: Option<AuthType>,

    /// Token for `bearer` / `api_key`, value for `custom`.
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub auth_username: Option<String>,

    #[serde(default)]
    pub auth_password: Option<String>,

    /// Header carrying the credential for `api_key` / `custom`.
    #[serde(default)]
    pub auth_header_name: Option<String>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            timeout_secs: None,
            headers: BTreeMap::new(),
            auth_type: None,
            auth_token: None,
            auth_username: None,
            auth_password: None,
            auth_header_name: None,
        }
    }
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_true() -> bool {
    true
}

/// Routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Route messages through the route table.
    pub enabled: bool,

    /// Load routes from this `.toml`, `.json` or `.yaml` file instead of inline.
    pub config_path: Option<PathBuf>,

    /// Reload the route file when it changes.
    pub watch: bool,

    /// Inline routes.
    pub routes: Vec<RouteConfig>,

    /// Endpoint used when nothing matches and fallback is enabled.
    pub default_endpoint: Option<String>,

    pub enable_fallback: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            config_path: None,
            watch: false,
            routes: Vec::new(),
            default_endpoint: None,
            enable_fallback: true,
        }
    }
}

/// Contents of a standalone routing file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteFile {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub default_endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A single routing rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Unique route name for logging/metrics.
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Higher is evaluated first; ties keep declaration order.
    #[serde(default)]
    pub priority: i32,

    /// Dot-path into the message document (e.g., `metadata.type`).
    #[serde(default)]
    pub match_field: Option<String>,

    /// Exact value; non-strings compare by canonical JSON.
    #[serde(default)]
    pub match_value: Option<Value>,

    /// Full-string regular expression.
    #[serde(default)]
    pub match_pattern: Option<String>,

    #[serde(default)]
    pub is_default: bool,

    /// Endpoint name from `proxy.endpoints`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// HTTP method override.
    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub transform_type: TransformKind,

    /// Program, path or template; templates may also be given as a table.
    #[serde(default)]
    pub transform: Option<Value>,

    /// Header name → dot-path into the original message.
    #[serde(default)]
    pub header_mappings: BTreeMap<String, String>,

    /// Query parameter → dot-path into the original message.
    #[serde(default, alias = "query_params")]
    pub query_mappings: BTreeMap<String, String>,

    /// Timeout override in seconds.
    #[serde(default, alias = "timeout")]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Partition key path override for this route.
    #[serde(default)]
    pub partition_key_field: Option<String>,
}

impl RouteConfig {
    /// A passthrough route with no match condition set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            priority: 0,
            match_field: None,
            match_value: None,
            match_pattern: None,
            is_default: false,
            endpoint: None,
            method: None,
            transform_type: TransformKind::Passthrough,
            transform: None,
            header_mappings: BTreeMap::new(),
            query_mappings: BTreeMap::new(),
            timeout_secs: None,
            max_retries: None,
            partition_key_field: None,
        }
    }
}

/// Partition assignment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    #[default]
    Sticky,
    Hash,
    Key,
    RoundRobin,
}

/// How partition ids are spread over workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentScheme {
    /// Worker `i` owns `{i, i + n, i + 2n, ...}`.
    #[default]
    Modulo,
    /// Worker `i` owns one contiguous block of ids.
    ContiguousRange,
}

/// What to do with a message lacking its partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Treat as owned by global worker 0.
    #[default]
    WorkerZero,
    /// Worker 0 dead-letters it; the others skip.
    Reject,
}

/// Partitioning configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PartitioningConfig {
    pub enabled: bool,
    pub strategy: PartitionStrategy,
    pub assignment: AssignmentScheme,
    pub partition_count: u32,
    pub partition_key_field: String,
    pub session_key_field: String,

    /// Session idle TTL in seconds; 0 disables expiry.
    pub sticky_session_ttl: u64,

    /// Upper bound on tracked sessions per worker.
    pub max_sessions: usize,

    /// Interval of the expired-session sweep in seconds.
    pub sweep_interval_secs: u64,

    /// Track sessions for affinity; invalid with `round_robin`.
    pub session_affinity: bool,

    pub missing_key_policy: MissingKeyPolicy,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: PartitionStrategy::Sticky,
            assignment: AssignmentScheme::Modulo,
            partition_count: 10,
            partition_key_field: "metadata.partition_key".to_string(),
            session_key_field: "metadata.session_id".to_string(),
            sticky_session_ttl: 3600,
            max_sessions: 100_000,
            sweep_interval_secs: 60,
            session_affinity: true,
            missing_key_policy: MissingKeyPolicy::WorkerZero,
        }
    }
}

/// Result store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// How long results and status records are kept, in seconds.
    pub ttl_secs: u64,

    /// Interval of the expired-result purge in seconds.
    pub purge_interval_secs: u64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            purge_interval_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight messages get to finish, in seconds.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 30 }
    }
}
