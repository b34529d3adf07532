//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{MediatorConfig, RouteFile};
use crate::config::validation::{check_route_endpoints, validate_config, ValidationError};
use crate::routing::RouteTable;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Json(serde_json::Error),
    Yaml(serde_yaml::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Json(e) => write!(f, "Parse error: {}", e),
            ConfigError::Yaml(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<MediatorConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<MediatorConfig, ConfigError> {
    let config: MediatorConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Read a standalone route file by extension: `.json`, `.yaml`/`.yml`, otherwise TOML.
pub fn load_route_file(path: &Path) -> Result<RouteFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("json") => serde_json::from_str(&content).map_err(ConfigError::Json),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(ConfigError::Yaml),
        _ => toml::from_str(&content).map_err(ConfigError::Parse),
    }
}

/// Compile a route file against the endpoints of `config`.
pub fn compile_route_file(config: &MediatorConfig, file: &RouteFile) -> Result<RouteTable, ConfigError> {
    let mut errors = check_route_endpoints(config, &file.routes);
    match RouteTable::from_file(file) {
        Ok(table) if errors.is_empty() => Ok(table),
        Ok(_) => Err(ConfigError::Validation(errors)),
        Err(mut route_errors) => {
            route_errors.append(&mut errors);
            Err(ConfigError::Validation(route_errors))
        }
    }
}

/// Build the route table the dispatcher starts with.
///
/// With routing disabled every message goes to the default endpoint.
pub fn build_route_table(config: &MediatorConfig) -> Result<RouteTable, ConfigError> {
    let routing = &config.routing;
    if !routing.enabled {
        let endpoint = routing
            .default_endpoint
            .clone()
            .or_else(|| config.proxy.default_endpoint.clone());
        return Ok(RouteTable::fallback_only(endpoint));
    }

    match &routing.config_path {
        Some(path) => {
            let file = load_route_file(path)?;
            let table = compile_route_file(config, &file)?;
            tracing::info!(path = ?path, routes = table.len(), "Loaded route file");
            Ok(table)
        }
        None => RouteTable::compile(
            &routing.routes,
            routing.default_endpoint.clone(),
            routing.enable_fallback,
        )
        .map_err(ConfigError::Validation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config("").unwrap();
        assert_eq!(config.worker.count, 5);
        assert_eq!(config.queue.request_queue_name, "mediator-requests");
    }

    #[test]
    fn test_parse_rejects_invalid_config() {
        let err = parse_config("[worker]\ncount = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("worker.count"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_config("[worker\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_json_route_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"routes": [{{"name": "users", "match_field": "metadata.type", "match_value": "user", "endpoint": "http://users.local"}}], "default_endpoint": "http://fallback.local"}}"#
        )
        .unwrap();

        let route_file = load_route_file(file.path()).unwrap();
        assert_eq!(route_file.routes.len(), 1);
        assert!(route_file.enable_fallback);

        let mut config = MediatorConfig::default();
        config.proxy.enabled = true;
        let table = compile_route_file(&config, &route_file).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.default_endpoint(), Some("http://fallback.local"));
    }

    #[test]
    fn test_load_yaml_route_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "routes:\n  - name: orders\n    match_field: metadata.type\n    match_value: order.created\n    priority: 5\n    transform_type: jq\n    transform: '{{id: .payload.id}}'\n    endpoint: http://orders.local\n  - name: catch-all\n    is_default: true\n    endpoint: http://fallback.local\n"
        )
        .unwrap();

        let route_file = load_route_file(file.path()).unwrap();
        assert_eq!(route_file.routes.len(), 2);
        assert_eq!(route_file.routes[0].priority, 5);

        let mut config = MediatorConfig::default();
        config.proxy.enabled = true;
        let table = compile_route_file(&config, &route_file).unwrap();
        assert_eq!(table.len(), 2);

        let mut broken = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(broken, "routes: [unclosed").unwrap();
        assert!(matches!(
            load_route_file(broken.path()),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_route_file_unknown_endpoint_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[[routes]]\nname = \"r\"\nmatch_field = \"metadata.type\"\nmatch_value = \"x\"\nendpoint = \"missing\""
        )
        .unwrap();

        let route_file = load_route_file(file.path()).unwrap();
        let mut config = MediatorConfig::default();
        config.proxy.enabled = true;
        let err = compile_route_file(&config, &route_file).unwrap_err();
        assert!(err.to_string().contains("unknown endpoint 'missing'"));
    }

    #[test]
    fn test_routing_disabled_uses_default_endpoint() {
        let mut config = MediatorConfig::default();
        config.proxy.default_endpoint = Some("http://default.local".to_string());
        let table = build_route_table(&config).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.default_endpoint(), Some("http://default.local"));
    }
}
