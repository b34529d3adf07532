//! Ingress HTTP server.
//!
//! # Responsibilities
//! - Accept submissions, assign correlation ids and enqueue them
//! - Report status and results from the result store
//! - Wire up middleware (tracing, limits, request ID, timeout)
//! - Stop accepting on shutdown and finish open requests
//!
//! # Design Decisions
//! - Submission is fire-and-forget: the caller gets a correlation id back
//!   as soon as the message is on the queue, never a processing result
//! - Processing errors are only visible later, as a FAILED result

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    map_response_body::MapResponseBodyLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::MediatorConfig;
use crate::message::{Message, MessageStatus};
use crate::observability::metrics;
use crate::queue::MessageQueue;
use crate::results::ResultStore;

/// Request ID header set on every request and echoed on the response.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Body of `POST /api/v1/submit`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Caller-chosen id; a fresh UUID when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Reply to a submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmitResponse {
    pub correlation_id: String,
    pub status: MessageStatus,
    pub submitted_at: u64,
}

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub queue: Arc<dyn MessageQueue>,
    pub results: Arc<dyn ResultStore>,
    pub request_queue: String,
}

/// Ingress server for the mediator.
pub struct IngressServer {
    router: Router,
}

impl IngressServer {
    pub fn new(
        config: &MediatorConfig,
        queue: Arc<dyn MessageQueue>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        let state = AppState {
            queue,
            results,
            request_queue: config.queue.request_queue_name.clone(),
        };
        Self {
            router: build_router(config, state),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Ingress server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Ingress server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(config: &MediatorConfig, state: AppState) -> Router {
    let x_request_id = HeaderName::from_static(X_REQUEST_ID);
    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.listener.request_timeout_secs),
        ))
        .layer(MapResponseBodyLayer::new(axum::body::Body::new))
        .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
        .layer(PropagateRequestIdLayer::new(x_request_id));

    Router::new()
        .route("/api/v1/submit", post(submit))
        .route("/api/v1/status/{correlation_id}", get(status))
        .route("/api/v1/response/{correlation_id}", get(response))
        .route("/health", get(health))
        .layer(layers)
        .with_state(state)
}

async fn submit(State(state): State<AppState>, Json(request): Json<SubmitRequest>) -> Response {
    let mut message = match request.correlation_id {
        Some(id) if !id.is_empty() => Message::with_id(id, request.payload),
        _ => Message::new(request.payload),
    };
    message.metadata = request.metadata;
    message.headers = request.headers;

    let cid = message.correlation_id.clone();
    let submitted_at = message.timestamp;

    match state.results.status(&cid).await {
        Ok(Some(record)) if record.status.is_terminal() => {
            tracing::info!(correlation_id = %cid, status = %record.status, "Resubmitted message already terminal");
        }
        _ => {
            if let Err(e) = state.results.set_status(&cid, MessageStatus::Pending).await {
                tracing::warn!(correlation_id = %cid, error = %e, "Could not record PENDING status");
            }
        }
    }

    if let Err(e) = state.queue.publish(&state.request_queue, message).await {
        tracing::error!(correlation_id = %cid, error = %e, "Failed to enqueue message");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )
            .into_response();
    }

    metrics::record_submitted();
    tracing::info!(correlation_id = %cid, "Message submitted");

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            correlation_id: cid,
            status: MessageStatus::Pending,
            submitted_at,
        }),
    )
        .into_response()
}

async fn status(State(state): State<AppState>, Path(correlation_id): Path<String>) -> Response {
    match state.results.status(&correlation_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => not_found(&correlation_id),
        Err(e) => unavailable(e),
    }
}

async fn response(State(state): State<AppState>, Path(correlation_id): Path<String>) -> Response {
    match state.results.get(&correlation_id).await {
        Ok(Some(result)) => return (StatusCode::OK, Json(result)).into_response(),
        Ok(None) => {}
        Err(e) => return unavailable(e),
    }
    match state.results.status(&correlation_id).await {
        Ok(Some(record)) => (StatusCode::ACCEPTED, Json(record)).into_response(),
        Ok(None) => not_found(&correlation_id),
        Err(e) => unavailable(e),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let depth = state.queue.depth(&state.request_queue).await;
    Json(json!({
        "status": "healthy",
        "queue_depth": depth,
    }))
    .into_response()
}

fn not_found(correlation_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("unknown correlation id '{}'", correlation_id)})),
    )
        .into_response()
}

fn unavailable(error: impl std::fmt::Display) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": error.to_string()})),
    )
        .into_response()
}
