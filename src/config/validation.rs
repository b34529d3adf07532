//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing endpoints)
//! - Validate value ranges (counts > 0, delays ordered, addresses parse)
//! - Compile inline routes so bad regexes and transforms fail at load
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MediatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{MediatorConfig, PartitionStrategy, RouteConfig};
use crate::routing::router::RouteTable;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted location of the offending setting (e.g., `routing.routes[2].match_pattern`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a loaded configuration.
pub fn validate_config(config: &MediatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.enabled && config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let worker = &config.worker;
    if worker.count == 0 {
        errors.push(ValidationError::new("worker.count", "must be at least 1"));
    }
    if worker.batch_size == 0 {
        errors.push(ValidationError::new("worker.batch_size", "must be at least 1"));
    }
    if worker.timeout_secs == 0 {
        errors.push(ValidationError::new("worker.timeout_secs", "must be greater than 0"));
    }
    if worker.retry_delay_base_ms > worker.retry_delay_max_ms {
        errors.push(ValidationError::new(
            "worker.retry_delay_base_ms",
            "must not exceed worker.retry_delay_max_ms",
        ));
    }
    if worker.total_workers() < worker.index_offset + worker.count {
        errors.push(ValidationError::new(
            "worker.total",
            format!(
                "{} is smaller than index_offset + count ({})",
                worker.total_workers(),
                worker.index_offset + worker.count
            ),
        ));
    }

    for (name, endpoint) in &config.proxy.endpoints {
        let field = format!("proxy.endpoints.{}", name);
        match url::Url::parse(&endpoint.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => errors.push(ValidationError::new(
                format!("{}.url", field),
                format!("'{}' is not an absolute http(s) URL", endpoint.url),
            )),
        }
        if reqwest::Method::from_bytes(endpoint.method.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("{}.method", field),
                format!("'{}' is not an HTTP method", endpoint.method),
            ));
        }
    }

    if config.proxy.enabled {
        if let Some(default) = &config.proxy.default_endpoint {
            check_endpoint_ref(config, "proxy.default_endpoint", default, &mut errors);
        }
    }

    let routing = &config.routing;
    if routing.enabled && routing.config_path.is_none() {
        if let Err(route_errors) = RouteTable::compile(
            &routing.routes,
            routing.default_endpoint.clone(),
            routing.enable_fallback,
        ) {
            errors.extend(route_errors);
        }
        errors.extend(check_route_endpoints(config, &routing.routes));
    }
    if config.proxy.enabled {
        if let Some(default) = &routing.default_endpoint {
            check_endpoint_ref(config, "routing.default_endpoint", default, &mut errors);
        }
    }

    let partitioning = &config.partitioning;
    if partitioning.partition_count == 0 {
        errors.push(ValidationError::new(
            "partitioning.partition_count",
            "must be at least 1",
        ));
    }
    if partitioning.enabled {
        if (partitioning.partition_count as usize) < worker.total_workers() {
            errors.push(ValidationError::new(
                "partitioning.partition_count",
                format!(
                    "{} partitions cannot cover {} workers",
                    partitioning.partition_count,
                    worker.total_workers()
                ),
            ));
        }
        if partitioning.strategy == PartitionStrategy::RoundRobin && partitioning.session_affinity {
            errors.push(ValidationError::new(
                "partitioning.strategy",
                "round_robin cannot provide session affinity; set session_affinity = false",
            ));
        }
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Routes must name endpoints that exist when dispatching over HTTP.
pub fn check_route_endpoints(config: &MediatorConfig, routes: &[RouteConfig]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !config.proxy.enabled {
        return errors;
    }
    for (i, route) in routes.iter().enumerate() {
        if let Some(endpoint) = &route.endpoint {
            check_endpoint_ref(
                config,
                &format!("routing.routes[{}].endpoint", i),
                endpoint,
                &mut errors,
            );
        }
    }
    errors
}

/// Extra checks when the queue lives inside this process.
///
/// Partitioned workers acknowledge messages they do not own, so every
/// partition owner must be a local slot or those messages are lost.
pub fn validate_in_process(config: &MediatorConfig) -> Result<(), Vec<ValidationError>> {
    let worker = &config.worker;
    if !config.partitioning.enabled {
        return Ok(());
    }
    let mut errors = Vec::new();
    if worker.index_offset != 0 {
        errors.push(ValidationError::new(
            "worker.index_offset",
            "must be 0 when partitioning over the in-process queue",
        ));
    }
    if worker.total_workers() != worker.count {
        errors.push(ValidationError::new(
            "worker.total",
            format!(
                "{} must equal worker.count ({}) when partitioning over the in-process queue",
                worker.total_workers(),
                worker.count
            ),
        ));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_endpoint_ref(
    config: &MediatorConfig,
    field: &str,
    reference: &str,
    errors: &mut Vec<ValidationError>,
) {
    let is_url = reference.starts_with("http://") || reference.starts_with("https://");
    if !is_url && !config.proxy.endpoints.contains_key(reference) {
        errors.push(ValidationError::new(
            field,
            format!("unknown endpoint '{}'", reference),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EndpointConfig, RouteConfig};
    use serde_json::json;

    fn routed_config() -> MediatorConfig {
        let mut config = MediatorConfig::default();
        config.proxy.enabled = true;
        config
            .proxy
            .endpoints
            .insert("users".to_string(), EndpointConfig::new("http://127.0.0.1:9000/users"));
        config.routing.enabled = true;
        let mut route = RouteConfig::new("register");
        route.match_field = Some("metadata.type".to_string());
        route.match_value = Some(json!("user.register"));
        route.endpoint = Some("users".to_string());
        config.routing.routes.push(route);
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&MediatorConfig::default()).is_ok());
    }

    #[test]
    fn test_routed_config_is_valid() {
        assert!(validate_config(&routed_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = routed_config();
        config.worker.count = 0;
        config.worker.batch_size = 0;
        config.listener.bind_address = "nope".to_string();
        config.routing.routes[0].endpoint = Some("missing".to_string());

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 4);
        assert!(errors.iter().any(|e| e.field == "worker.count"));
        assert!(errors.iter().any(|e| e.field == "routing.routes[0].endpoint"));
    }

    #[test]
    fn test_invalid_regex_fails_load() {
        let mut config = routed_config();
        config.routing.routes[0].match_value = None;
        config.routing.routes[0].match_pattern = Some("(unclosed".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field.ends_with("match_pattern")));
    }

    #[test]
    fn test_round_robin_with_affinity_rejected() {
        let mut config = MediatorConfig::default();
        config.partitioning.enabled = true;
        config.partitioning.strategy = PartitionStrategy::RoundRobin;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "partitioning.strategy"));

        config.partitioning.session_affinity = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partitions_must_cover_workers() {
        let mut config = MediatorConfig::default();
        config.partitioning.enabled = true;
        config.partitioning.partition_count = 2;
        config.worker.count = 3;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_in_process_partitioning_needs_every_owner_local() {
        let mut config = MediatorConfig::default();
        config.partitioning.enabled = true;
        config.worker.count = 1;
        config.worker.total = Some(2);
        assert!(validate_config(&config).is_ok());
        let errors = validate_in_process(&config).unwrap_err();
        assert_eq!(errors[0].field, "worker.total");

        config.worker.total = None;
        config.worker.index_offset = 1;
        let fields: Vec<_> = validate_in_process(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["worker.index_offset", "worker.total"]);

        config.partitioning.enabled = false;
        assert!(validate_in_process(&config).is_ok());
    }

    #[test]
    fn test_endpoint_url_and_method() {
        let mut config = MediatorConfig::default();
        let mut endpoint = EndpointConfig::new("not a url");
        endpoint.method = "BAD METHOD".to_string();
        config.proxy.endpoints.insert("svc".to_string(), endpoint);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_default_endpoint_may_be_url() {
        let mut config = MediatorConfig::default();
        config.proxy.enabled = true;
        config.proxy.default_endpoint = Some("http://127.0.0.1:1/fallback".to_string());
        assert!(validate_config(&config).is_ok());
        config.proxy.default_endpoint = Some("ghost".to_string());
        assert!(validate_config(&config).is_err());
    }
}
