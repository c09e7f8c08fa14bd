//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listeners to bind (e.g. one public, one internal).
    pub listeners: Vec<ListenerConfig>,

    /// Named logical backends referenced by proxy policies.
    #[serde(alias = "serviceEndpoints")]
    pub service_endpoints: HashMap<String, ServiceEndpointConfig>,

    /// Route definitions, each carrying one proxy policy.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenerConfig::default()],
            service_endpoints: HashMap::new(),
            routes: Vec::new(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Name used in logs.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// A named service endpoint.
///
/// `url` takes precedence over `urls`. At least one of them must be set.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceEndpointConfig {
    /// Single backend URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Ordered backend URLs for load balancing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    /// Balancing strategy name (default: "round-robin").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl ServiceEndpointConfig {
    /// Endpoint with a single fixed backend.
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Endpoint balanced over `urls` with the default strategy.
    pub fn balanced<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: Some(urls.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

/// Route configuration mapping requests to a proxy policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Proxy policy parameters.
    pub proxy: ProxyPolicyConfig,
}

/// Parameters of the `proxy` policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyPolicyConfig {
    /// Name of the service endpoint to forward to.
    #[serde(alias = "serviceEndpoint")]
    pub service_endpoint: String,

    /// Rewrite the Host header to the target authority.
    #[serde(default, alias = "changeOrigin")]
    pub change_origin: bool,

    /// Proxy WebSocket upgrades arriving on the same listeners.
    #[serde(default)]
    pub ws: bool,

    /// Add X-Forwarded-* headers.
    #[serde(default)]
    pub xfwd: bool,

    /// Path prefix rewrites applied before forwarding (prefix -> replacement).
    #[serde(default, alias = "pathRewrite")]
    pub path_rewrite: BTreeMap<String, String>,
}

impl ProxyPolicyConfig {
    pub fn new(service_endpoint: impl Into<String>) -> Self {
        Self {
            service_endpoint: service_endpoint.into(),
            ..Self::default()
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for a backend to produce response headers (or finish an
    /// upgrade handshake) in seconds.
    pub upstream_secs: u64,

    /// Total time for the gateway to produce a response head in seconds.
    pub request_secs: u64,

    /// Time to wait for in-flight connections on shutdown in seconds.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn upstream(&self) -> Duration {
        Duration::from_secs(self.upstream_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            upstream_secs: 30,
            request_secs: 60,
            drain_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [service_endpoints.api]
            urls = ["http://a:1", "http://b:1"]

            [[routes]]
            name = "api"
            path_prefix = "/api"
            proxy = { service_endpoint = "api", ws = true }
            "#,
        )
        .unwrap();

        assert_eq!(config.listeners.len(), 1);
        assert_eq!(config.timeouts.connect_secs, 5);
        let api = &config.service_endpoints["api"];
        assert_eq!(api.urls.as_ref().unwrap().len(), 2);
        assert!(api.strategy.is_none());
        assert!(config.routes[0].proxy.ws);
        assert!(!config.routes[0].proxy.change_origin);
    }

    #[test]
    fn camel_case_aliases_are_accepted() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "serviceEndpoints": { "backend": { "url": "http://localhost:3000" } },
                "routes": [{
                    "name": "all",
                    "proxy": { "serviceEndpoint": "backend", "changeOrigin": true }
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.service_endpoints["backend"],
            ServiceEndpointConfig::single("http://localhost:3000")
        );
        assert!(config.routes[0].proxy.change_origin);
    }
}
