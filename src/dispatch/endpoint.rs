//! Endpoint resolution and authentication headers.
//!
//! # Responsibilities
//! - Look up endpoints by name, or accept an absolute URL as an ad-hoc endpoint
//! - Build the authentication header for an endpoint's auth type
//!
//! # Design Decisions
//! - Registry is read-only after construction and shared across workers
//! - Declaring an auth type without its credentials is a fatal
//!   authentication error, raised per message, never a silent unauthenticated call

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::schema::{AuthType, EndpointConfig};
use crate::error::DispatchError;

pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// A resolved endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Registry name, or the URL itself for ad-hoc endpoints.
    pub name: String,
    pub config: EndpointConfig,
}

/// Named endpoints available to routes.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, EndpointConfig>,
}

impl EndpointRegistry {
    pub fn new(endpoints: BTreeMap<String, EndpointConfig>) -> Self {
        Self { endpoints }
    }

    pub fn get(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Resolve a name or absolute http(s) URL.
    pub fn resolve(&self, reference: &str) -> Result<Endpoint, DispatchError> {
        if let Some(config) = self.endpoints.get(reference) {
            return Ok(Endpoint {
                name: reference.to_string(),
                config: config.clone(),
            });
        }
        match url::Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Endpoint {
                name: reference.to_string(),
                config: EndpointConfig::new(reference),
            }),
            _ => Err(DispatchError::Configuration(format!(
                "endpoint '{}' not found in configuration",
                reference
            ))),
        }
    }
}

/// Authentication header for `endpoint`, if it declares an auth type.
pub fn auth_header(endpoint: &Endpoint) -> Result<Option<(String, String)>, DispatchError> {
    let config = &endpoint.config;
    let Some(auth_type) = config.auth_type else {
        return Ok(None);
    };
    let missing = |what: &str| DispatchError::Authentication {
        endpoint: endpoint.name.clone(),
        reason: format!("{} auth requires {}", auth_type_name(auth_type), what),
    };
    let token = config.auth_token.as_deref().filter(|t| !t.is_empty());

    let header = match auth_type {
        AuthType::Bearer => {
            let token = token.ok_or_else(|| missing("auth_token"))?;
            ("Authorization".to_string(), format!("Bearer {}", token))
        }
        AuthType::ApiKey => {
            let token = token.ok_or_else(|| missing("auth_token"))?;
            let name = config
                .auth_header_name
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string());
            (name, token.to_string())
        }
        AuthType::Basic => {
            let (Some(user), Some(pass)) = (&config.auth_username, &config.auth_password) else {
                return Err(missing("auth_username and auth_password"));
            };
            let encoded = STANDARD.encode(format!("{}:{}", user, pass));
            ("Authorization".to_string(), format!("Basic {}", encoded))
        }
        AuthType::Custom => {
            let token = token.ok_or_else(|| missing("auth_token"))?;
            let name = config
                .auth_header_name
                .clone()
                .ok_or_else(|| missing("auth_header_name"))?;
            (name, token.to_string())
        }
    };
    Ok(Some(header))
}

fn auth_type_name(auth_type: AuthType) -> &'static str {
    match auth_type {
        AuthType::Bearer => "bearer",
        AuthType::Basic => "basic",
        AuthType::ApiKey => "api_key",
        AuthType::Custom => "custom",
    }
}
