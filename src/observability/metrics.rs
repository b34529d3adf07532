//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define mediator metrics (volume, retries, dead letters, latency)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-route and aggregate metrics
//!
//! # Metrics
//! - `mediator_messages_submitted_total` (counter): messages accepted by ingress
//! - `mediator_messages_dispatched_total` (counter): terminal results by route, outcome
//! - `mediator_messages_skipped_total` (counter): messages left to another worker
//! - `mediator_messages_retried_total` (counter): retries scheduled by route
//! - `mediator_messages_dead_lettered_total` (counter): dead letters by reason
//! - `mediator_route_matches_total` (counter): route selections
//! - `mediator_dispatch_duration_seconds` (histogram): end-to-end dispatch latency
//! - `mediator_active_sessions` (gauge): sticky sessions held per worker
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels for route, outcome, reason, worker

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const MESSAGES_SUBMITTED: &str = "mediator_messages_submitted_total";
pub const MESSAGES_DISPATCHED: &str = "mediator_messages_dispatched_total";
pub const MESSAGES_SKIPPED: &str = "mediator_messages_skipped_total";
pub const MESSAGES_RETRIED: &str = "mediator_messages_retried_total";
pub const MESSAGES_DEAD_LETTERED: &str = "mediator_messages_dead_lettered_total";
pub const ROUTE_MATCHES: &str = "mediator_route_matches_total";
pub const DISPATCH_DURATION: &str = "mediator_dispatch_duration_seconds";
pub const ACTIVE_SESSIONS: &str = "mediator_active_sessions";

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_counter!(MESSAGES_SUBMITTED, "Messages accepted by the ingress API");
            describe_counter!(MESSAGES_DISPATCHED, "Messages that reached a terminal state");
            describe_counter!(MESSAGES_SKIPPED, "Messages skipped because another worker owns them");
            describe_counter!(MESSAGES_RETRIED, "Retries scheduled after transient failures");
            describe_counter!(MESSAGES_DEAD_LETTERED, "Messages moved to the dead-letter queue");
            describe_counter!(ROUTE_MATCHES, "Route selections");
            describe_histogram!(DISPATCH_DURATION, "Dispatch latency in seconds");
            describe_gauge!(ACTIVE_SESSIONS, "Sticky sessions tracked by a worker");
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_submitted() {
    counter!(MESSAGES_SUBMITTED).increment(1);
}

pub fn record_dispatched(route: &str, outcome: &str) {
    counter!(
        MESSAGES_DISPATCHED,
        "route" => route.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_skipped() {
    counter!(MESSAGES_SKIPPED).increment(1);
}

pub fn record_retried(route: &str) {
    counter!(MESSAGES_RETRIED, "route" => route.to_string()).increment(1);
}

pub fn record_dead_lettered(reason: &str) {
    counter!(MESSAGES_DEAD_LETTERED, "reason" => reason.to_string()).increment(1);
}

pub fn record_route_match(route: &str) {
    counter!(ROUTE_MATCHES, "route" => route.to_string()).increment(1);
}

pub fn record_dispatch_duration(route: &str, elapsed: Duration) {
    histogram!(DISPATCH_DURATION, "route" => route.to_string()).record(elapsed.as_secs_f64());
}

pub fn set_active_sessions(worker: usize, sessions: usize) {
    gauge!(ACTIVE_SESSIONS, "worker" => worker.to_string()).set(sessions as f64);
}
