//! Dispatch orchestration.
//!
//! # Responsibilities
//! - Select the route for a message (or the fallback endpoint)
//! - Apply partition ownership; skip messages another worker owns
//! - Transform the message and resolve endpoint, method, headers, timeout
//! - Perform the outbound HTTP call, or invoke the custom handler
//! - Classify every failure as retryable or fatal
//!
//! # Data Flow
//! ```text
//! Message
//!     → plan(): RouteTable → PartitionAssigner → Transform → EndpointRegistry
//!         → Plan::Skip (not owned)  or  Plan::Call(PreparedCall)
//!     → execute(): HTTP request / CustomHandler, bounded by timeout
//!     → ProcessingResult (COMPLETED, whatever the backend status code)
//! ```
//!
//! # Design Decisions
//! - A call that returns any HTTP status is a completed call; only transport
//!   failures are retryable
//! - Header precedence: endpoint static < auth < forwarded message headers < route mappings
//! - Message metadata `endpoint` / `method` override the route

pub mod endpoint;
pub mod handler;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::{json, Value};

use crate::config::schema::{MediatorConfig, MissingKeyPolicy, PartitioningConfig, ProxyConfig};
use crate::error::{DispatchError, DispatchFailure};
use crate::message::{Message, ProcessingResult};
use crate::observability::metrics;
use crate::partition::{PartitionAssigner, PartitionDecision};
use crate::resilience::timeouts::{effective_timeout, with_timeout};
use crate::routing::path::lookup_string;
use crate::routing::{RouteMatch, SharedRouteTable};
use crate::transform::{transform_message, Transform, TransformedOutput};

pub use endpoint::{auth_header, Endpoint, EndpointRegistry};
pub use handler::{CustomHandler, EchoHandler, HandlerError};

const HOP_BY_HOP: &[&str] = &["transfer-encoding", "connection"];

/// Identity of the worker slot dispatching a message.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Global worker index across all processes.
    pub worker_index: usize,
    pub assigner: Option<Arc<PartitionAssigner>>,
    /// Queue sequence of the delivery, used by round-robin partitioning.
    pub sequence: u64,
}

impl DispatchContext {
    pub fn unpartitioned(worker_index: usize) -> Self {
        Self {
            worker_index,
            assigner: None,
            sequence: 0,
        }
    }
}

/// Why a message was left for another worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotOwned { partition_id: u32, owner: usize },
    /// No partition key and this worker is not worker 0.
    MissingKey,
}

#[derive(Debug)]
pub enum CallTarget {
    Http {
        endpoint: String,
        method: Method,
        url: url::Url,
        headers: HeaderMap,
    },
    Handler,
}

/// Everything needed to perform one call.
#[derive(Debug)]
pub struct PreparedCall {
    pub route: Option<String>,
    pub max_retries: Option<u32>,
    pub partition_id: Option<u32>,
    pub body: Value,
    pub timeout: Duration,
    pub target: CallTarget,
}

#[derive(Debug)]
pub enum Plan {
    Skip(SkipReason),
    Call(PreparedCall),
}

/// Result of [`Dispatcher::dispatch`].
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(ProcessingResult),
    Skipped(SkipReason),
}

/// Routes, transforms and delivers messages.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: SharedRouteTable,
    routing_enabled: bool,
    endpoints: EndpointRegistry,
    proxy: ProxyConfig,
    partitioning: PartitioningConfig,
    default_timeout: Duration,
    client: reqwest::Client,
    handler: Option<Arc<dyn CustomHandler>>,
}

impl Dispatcher {
    pub fn new(config: &MediatorConfig, routes: SharedRouteTable) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DispatchError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            routes,
            routing_enabled: config.routing.enabled,
            endpoints: EndpointRegistry::new(config.proxy.endpoints.clone()),
            proxy: config.proxy.clone(),
            partitioning: config.partitioning.clone(),
            default_timeout: Duration::from_secs(config.worker.timeout_secs),
            client,
            handler: None,
        })
    }

    /// Handler invoked when HTTP dispatch is disabled.
    pub fn with_handler(mut self, handler: Arc<dyn CustomHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn routes(&self) -> &SharedRouteTable {
        &self.routes
    }

    pub fn partitioning_enabled(&self) -> bool {
        self.partitioning.enabled
    }

    /// Route, partition and transform a message.
    pub fn plan(&self, message: &Message, ctx: &DispatchContext) -> Result<Plan, DispatchFailure> {
        let table = self.routes.load_full();
        let cid = message.correlation_id.as_str();

        let matched = self.routing_enabled.then(|| table.match_message(message));
        let matched_route = match &matched {
            Some(Ok(RouteMatch::Route(route))) => Some(*route),
            _ => None,
        };

        // Ownership first, so only the owning worker reports routing failures.
        let partition_id = match self.partition(
            message,
            matched_route.and_then(|r| r.partition_key_field.as_deref()),
            ctx,
        ) {
            Ok(Ok(pid)) => pid,
            Ok(Err(skip)) => return Ok(Plan::Skip(skip)),
            Err(e) => {
                let failure = DispatchFailure::new(e);
                return Err(match matched_route {
                    Some(r) => failure.on_route(&r.name, r.max_retries),
                    None => failure,
                });
            }
        };

        let (route, direct_endpoint) = match matched {
            None => (None, None),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(RouteMatch::Route(route))) => {
                tracing::info!(correlation_id = %cid, route = %route.name, "Route matched");
                metrics::record_route_match(&route.name);
                (Some(route), None)
            }
            Some(Ok(RouteMatch::Fallback { endpoint })) => {
                tracing::info!(correlation_id = %cid, endpoint = %endpoint, "No route matched, using fallback endpoint");
                (None, Some(endpoint.to_string()))
            }
        };

        let route_name = route.map(|r| r.name.clone());
        let max_retries = route.and_then(|r| r.max_retries);
        let tag = |error: DispatchError| {
            let failure = DispatchFailure::new(error);
            match &route_name {
                Some(name) => failure.on_route(name, max_retries),
                None => failure,
            }
        };

        let transformed = match route {
            Some(route) => transform_message(
                message,
                &route.transform,
                &route.header_mappings,
                &route.query_mappings,
            )
            .map_err(|e| {
                tag(DispatchError::Transformation {
                    route: route.name.clone(),
                    correlation_id: cid.to_string(),
                    reason: e.message().to_string(),
                })
            })?,
            None => transform_message(
                message,
                &Transform::Passthrough,
                &BTreeMap::new(),
                &BTreeMap::new(),
            )
            .map_err(|e| tag(DispatchError::Configuration(e.to_string())))?,
        };

        let route_timeout = route.and_then(|r| r.timeout);

        if !self.proxy.enabled {
            return Ok(Plan::Call(PreparedCall {
                route: route_name,
                max_retries,
                partition_id,
                body: transformed.body,
                timeout: effective_timeout(route_timeout, None, self.default_timeout),
                target: CallTarget::Handler,
            }));
        }

        let reference = message
            .metadata_str("endpoint")
            .map(str::to_string)
            .or_else(|| route.and_then(|r| r.endpoint.clone()))
            .or(direct_endpoint)
            .or_else(|| table.default_endpoint().map(str::to_string))
            .or_else(|| self.proxy.default_endpoint.clone())
            .ok_or_else(|| {
                tag(DispatchError::Configuration(
                    "no endpoint specified and no default endpoint configured".to_string(),
                ))
            })?;
        let endpoint = self.endpoints.resolve(&reference).map_err(tag)?;

        let method_name = message
            .metadata_str("method")
            .map(str::to_string)
            .or_else(|| route.and_then(|r| r.method.clone()))
            .unwrap_or_else(|| endpoint.config.method.clone())
            .to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            tag(DispatchError::Configuration(format!(
                "'{}' is not an HTTP method",
                method_name
            )))
        })?;

        let mut url = url::Url::parse(&endpoint.config.url).map_err(|e| {
            tag(DispatchError::Configuration(format!(
                "endpoint '{}' has invalid url '{}': {}",
                endpoint.name, endpoint.config.url, e
            )))
        })?;
        if !transformed.query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(transformed.query_params.iter());
        }

        let headers = self.build_headers(&endpoint, message, &transformed).map_err(tag)?;
        let timeout = effective_timeout(route_timeout, endpoint.config.timeout_secs, self.default_timeout);

        Ok(Plan::Call(PreparedCall {
            route: route_name,
            max_retries,
            partition_id,
            body: transformed.body,
            timeout,
            target: CallTarget::Http {
                endpoint: endpoint.name,
                method,
                url,
                headers,
            },
        }))
    }

    /// Perform a prepared call.
    pub async fn execute(
        &self,
        call: PreparedCall,
        message: &Message,
    ) -> Result<ProcessingResult, DispatchFailure> {
        let started = Instant::now();
        let cid = message.correlation_id.as_str();
        let route_label = call.route.clone().unwrap_or_else(|| "default".to_string());
        let tag = |error: DispatchError| {
            let failure = DispatchFailure::new(error);
            match &call.route {
                Some(name) => failure.on_route(name, call.max_retries),
                None => failure,
            }
        };

        let result = match &call.target {
            CallTarget::Handler => {
                let handler = self.handler.as_ref().ok_or_else(|| {
                    tag(DispatchError::Configuration(
                        "HTTP dispatch is disabled and no handler is installed".to_string(),
                    ))
                })?;
                let output = with_timeout(call.timeout, handler.process(call.body.clone(), message))
                    .await
                    .map_err(|_| {
                        tag(DispatchError::Timeout {
                            endpoint: "handler".to_string(),
                            timeout: call.timeout,
                        })
                    })?
                    .map_err(|e| tag(e.into()))?;
                ProcessingResult::completed(
                    cid,
                    output,
                    None,
                    BTreeMap::new(),
                    started.elapsed().as_millis() as u64,
                )
            }
            CallTarget::Http {
                endpoint,
                method,
                url,
                headers,
            } => {
                let (status, response_headers, body) = with_timeout(
                    call.timeout,
                    self.send(endpoint, method.clone(), url.clone(), headers.clone(), &call.body, call.timeout),
                )
                .await
                .map_err(|_| {
                    tag(DispatchError::Timeout {
                        endpoint: endpoint.clone(),
                        timeout: call.timeout,
                    })
                })?
                .map_err(tag)?;

                ProcessingResult::completed(
                    cid,
                    body,
                    Some(status),
                    response_headers,
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        let elapsed = started.elapsed();
        metrics::record_dispatch_duration(&route_label, elapsed);
        tracing::info!(
            correlation_id = %cid,
            route = %route_label,
            status_code = ?result.status_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "Dispatch completed"
        );
        Ok(result.with_route(call.route))
    }

    /// Route, partition, transform and deliver one message.
    pub async fn dispatch(
        &self,
        message: &Message,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        match self.plan(message, ctx)? {
            Plan::Skip(reason) => Ok(DispatchOutcome::Skipped(reason)),
            Plan::Call(call) => self.execute(call, message).await.map(DispatchOutcome::Completed),
        }
    }

    /// `Ok(Ok(pid))` to process, `Ok(Err(reason))` to skip.
    fn partition(
        &self,
        message: &Message,
        route_key_field: Option<&str>,
        ctx: &DispatchContext,
    ) -> Result<Result<Option<u32>, SkipReason>, DispatchError> {
        let Some(assigner) = ctx.assigner.as_ref().filter(|_| self.partitioning.enabled) else {
            return Ok(Ok(None));
        };
        let cid = message.correlation_id.as_str();
        let doc = message.document();
        let key = match route_key_field {
            Some(field) => lookup_string(&doc, field),
            None => lookup_string(&doc, &self.partitioning.partition_key_field)
                .or_else(|| lookup_string(&doc, &self.partitioning.session_key_field)),
        };

        match assigner.decide(key.as_deref(), ctx.sequence) {
            PartitionDecision::Owned { partition_id } => {
                tracing::debug!(correlation_id = %cid, partition_id, owned = true, worker = ctx.worker_index, "Partition decision");
                match &key {
                    Some(k) => assigner.touch(k, partition_id),
                    None => assigner.record_unkeyed(),
                }
                Ok(Ok(Some(partition_id)))
            }
            PartitionDecision::NotOwned { partition_id, owner } => {
                tracing::debug!(correlation_id = %cid, partition_id, owned = false, owner, worker = ctx.worker_index, "Partition not owned, skipping");
                Ok(Err(SkipReason::NotOwned { partition_id, owner }))
            }
            PartitionDecision::MissingKey => {
                if ctx.worker_index != 0 {
                    tracing::debug!(correlation_id = %cid, worker = ctx.worker_index, "No partition key, leaving to worker 0");
                    return Ok(Err(SkipReason::MissingKey));
                }
                match self.partitioning.missing_key_policy {
                    MissingKeyPolicy::WorkerZero => {
                        tracing::debug!(correlation_id = %cid, "No partition key, processing on worker 0");
                        assigner.record_unkeyed();
                        Ok(Ok(None))
                    }
                    MissingKeyPolicy::Reject => Err(DispatchError::MissingPartitionKey {
                        correlation_id: cid.to_string(),
                    }),
                }
            }
        }
    }

    fn build_headers(
        &self,
        endpoint: &Endpoint,
        message: &Message,
        transformed: &TransformedOutput,
    ) -> Result<HeaderMap, DispatchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &endpoint.config.headers {
            insert_header(&mut headers, name, value)?;
        }
        if let Some((name, value)) = auth_header(endpoint)? {
            insert_header(&mut headers, &name, &value)?;
        }
        for (name, value) in &message.headers {
            if self.should_forward(name) {
                insert_header(&mut headers, name, value)?;
            }
        }
        for (name, value) in &transformed.headers {
            insert_header(&mut headers, name, value)?;
        }
        Ok(headers)
    }

    fn should_forward(&self, name: &str) -> bool {
        let allowed = self
            .proxy
            .forward_headers
            .iter()
            .any(|h| h == "*" || h.eq_ignore_ascii_case(name));
        let stripped = self
            .proxy
            .strip_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name));
        allowed && !stripped
    }

    async fn send(
        &self,
        endpoint: &str,
        method: Method,
        url: url::Url,
        headers: HeaderMap,
        body: &Value,
        timeout: Duration,
    ) -> Result<(u16, BTreeMap<String, String>, Value), DispatchError> {
        let mut request = self.client.request(method, url).headers(headers).timeout(timeout);
        if !body.is_null() {
            request = request.json(body);
        }
        let mut response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(endpoint, timeout, e))?;

        let limit = self.proxy.max_response_size;
        if response.content_length().is_some_and(|len| len as usize > limit) {
            return Err(DispatchError::ResponseTooLarge {
                endpoint: endpoint.to_string(),
                limit,
            });
        }

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let response_headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(endpoint, timeout, e))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(DispatchError::ResponseTooLarge {
                    endpoint: endpoint.to_string(),
                    limit,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((status, response_headers, decode_body(&bytes, &content_type)))
    }
}

/// JSON bodies are parsed; anything else is wrapped with its content type.
pub fn decode_body(bytes: &[u8], content_type: &str) -> Value {
    if content_type.contains("application/json") {
        if let Ok(value) = serde_json::from_slice(bytes) {
            return value;
        }
    }
    json!({
        "response": String::from_utf8_lossy(bytes),
        "content_type": content_type,
    })
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), DispatchError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| DispatchError::Configuration(format!("invalid header name '{}'", name)))?;
    let header_value = HeaderValue::from_str(value).map_err(|_| {
        DispatchError::Configuration(format!("invalid value for header '{}'", name))
    })?;
    headers.insert(header_name, header_value);
    Ok(())
}

fn map_reqwest_error(endpoint: &str, timeout: Duration, error: reqwest::Error) -> DispatchError {
    if error.is_timeout() {
        DispatchError::Timeout {
            endpoint: endpoint.to_string(),
            timeout,
        }
    } else if error.is_builder() {
        DispatchError::Configuration(format!("request to '{}': {}", endpoint, error))
    } else {
        DispatchError::Network {
            endpoint: endpoint.to_string(),
            reason: error.to_string(),
        }
    }
}
