//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing service endpoints)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Endpoint shape (url/urls) is checked again by the resolver at policy
//!   construction, which is the authoritative check

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::new("listeners", "at least one listener is required"));
    }

    let mut listener_names = HashSet::new();
    for (i, listener) in config.listeners.iter().enumerate() {
        let field = format!("listeners[{}]", i);
        if listener.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                format!("{}.bind_address", field),
                format!("invalid socket address '{}'", listener.bind_address),
            ));
        }
        if listener.max_connections == 0 {
            errors.push(ValidationError::new(
                format!("{}.max_connections", field),
                "must be greater than 0",
            ));
        }
        if !listener_names.insert(listener.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate listener name '{}'", listener.name),
            ));
        }
    }

    for (name, endpoint) in &config.service_endpoints {
        if endpoint.url.is_none() && endpoint.urls.as_ref().map_or(true, Vec::is_empty) {
            errors.push(ValidationError::new(
                format!("service_endpoints.{}", name),
                "either `url` or a non-empty `urls` list is required",
            ));
        }
    }

    let mut route_names = HashSet::new();
    for route in &config.routes {
        let field = format!("routes.{}", route.name);
        if !route_names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(field.clone(), "duplicate route name"));
        }
        if !config
            .service_endpoints
            .contains_key(&route.proxy.service_endpoint)
        {
            errors.push(ValidationError::new(
                format!("{}.proxy.service_endpoint", field),
                format!(
                    "service endpoint '{}' does not exist",
                    route.proxy.service_endpoint
                ),
            ));
        }
        if let Some(prefix) = &route.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::new(
                    format!("{}.path_prefix", field),
                    "must start with '/'",
                ));
            }
        }
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_secs", timeouts.connect_secs),
        ("timeouts.upstream_secs", timeouts.upstream_secs),
        ("timeouts.request_secs", timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "invalid socket address '{}'",
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
