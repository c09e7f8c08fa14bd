//! Service endpoint resolution.
//!
//! Pure lookup of a named endpoint in the gateway configuration, run once
//! per policy construction.

use url::Url;

use crate::config::{GatewayConfig, ServiceEndpointConfig};
use crate::load_balancer::DEFAULT_STRATEGY;
use crate::proxy::errors::ConfigurationError;

/// A resolved service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEndpoint {
    /// A single `url`; no balancing involved.
    Single(Url),
    /// Ordered, non-empty `urls` balanced by the named strategy.
    Balanced { urls: Vec<Url>, strategy: String },
}

/// Look up `name` in `config.service_endpoints`.
pub fn resolve(name: &str, config: &GatewayConfig) -> Result<ServiceEndpoint, ConfigurationError> {
    let endpoint = config
        .service_endpoints
        .get(name)
        .ok_or_else(|| ConfigurationError::UnknownEndpoint(name.to_string()))?;

    resolve_endpoint(name, endpoint)
}

fn resolve_endpoint(
    name: &str,
    endpoint: &ServiceEndpointConfig,
) -> Result<ServiceEndpoint, ConfigurationError> {
    if let Some(url) = &endpoint.url {
        return Ok(ServiceEndpoint::Single(parse_target(name, url)?));
    }

    let urls = endpoint
        .urls
        .as_ref()
        .ok_or_else(|| ConfigurationError::MissingUrl(name.to_string()))?;
    if urls.is_empty() {
        return Err(ConfigurationError::EmptyUrls(name.to_string()));
    }

    let urls = urls
        .iter()
        .map(|url| parse_target(name, url))
        .collect::<Result<Vec<_>, _>>()?;
    let strategy = endpoint
        .strategy
        .clone()
        .unwrap_or_else(|| DEFAULT_STRATEGY.to_string());

    Ok(ServiceEndpoint::Balanced { urls, strategy })
}

/// Parse a backend URL. `ws` targets are carried as `http`.
fn parse_target(endpoint: &str, raw: &str) -> Result<Url, ConfigurationError> {
    let mut url = Url::parse(raw).map_err(|source| ConfigurationError::InvalidUrl {
        endpoint: endpoint.to_string(),
        url: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "http" => {}
        "ws" => {
            let _ = url.set_scheme("http");
        }
        other => {
            return Err(ConfigurationError::UnsupportedScheme {
                endpoint: endpoint.to_string(),
                scheme: other.to_string(),
            })
        }
    }

    if url.host_str().is_none() {
        return Err(ConfigurationError::InvalidUrl {
            endpoint: endpoint.to_string(),
            url: raw.to_string(),
            source: url::ParseError::EmptyHost,
        });
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(name: &str, endpoint: ServiceEndpointConfig) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.service_endpoints.insert(name.to_string(), endpoint);
        config
    }

    #[test]
    fn single_url_resolves_to_single() {
        let config = config_with("backend", ServiceEndpointConfig::single("http://localhost:3000"));
        assert_eq!(
            resolve("backend", &config).unwrap(),
            ServiceEndpoint::Single(Url::parse("http://localhost:3000").unwrap())
        );
    }

    #[test]
    fn url_takes_precedence_over_urls() {
        let config = config_with(
            "backend",
            ServiceEndpointConfig {
                url: Some("http://primary:1".into()),
                urls: Some(vec!["http://a:1".into(), "http://b:1".into()]),
                strategy: None,
            },
        );
        assert!(matches!(
            resolve("backend", &config).unwrap(),
            ServiceEndpoint::Single(url) if url.host_str() == Some("primary")
        ));
    }

    #[test]
    fn urls_default_to_round_robin() {
        let config = config_with(
            "api",
            ServiceEndpointConfig::balanced(["http://a:1", "http://b:1"]),
        );
        match resolve("api", &config).unwrap() {
            ServiceEndpoint::Balanced { urls, strategy } => {
                assert_eq!(urls.len(), 2);
                assert_eq!(strategy, "round-robin");
            }
            other => panic!("expected balanced endpoint, got {:?}", other),
        }
    }

    #[test]
    fn unknown_endpoint_is_configuration_error() {
        let err = resolve("nope", &GatewayConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownEndpoint(ref n) if n == "nope"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn endpoint_without_urls_is_configuration_error() {
        let config = config_with("empty", ServiceEndpointConfig::default());
        assert!(matches!(
            resolve("empty", &config),
            Err(ConfigurationError::MissingUrl(_))
        ));

        let config = config_with("empty", ServiceEndpointConfig::balanced(Vec::<String>::new()));
        assert!(matches!(
            resolve("empty", &config),
            Err(ConfigurationError::EmptyUrls(_))
        ));
    }

    #[test]
    fn ws_scheme_is_normalized_and_https_rejected() {
        let config = config_with("ws", ServiceEndpointConfig::single("ws://chat:9000/socket"));
        assert_eq!(
            resolve("ws", &config).unwrap(),
            ServiceEndpoint::Single(Url::parse("http://chat:9000/socket").unwrap())
        );

        let config = config_with("tls", ServiceEndpointConfig::single("https://secure:443"));
        assert!(matches!(
            resolve("tls", &config),
            Err(ConfigurationError::UnsupportedScheme { ref scheme, .. }) if scheme == "https"
        ));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let config = config_with("bad", ServiceEndpointConfig::balanced(["http://a:1", "::nope"]));
        assert!(matches!(
            resolve("bad", &config),
            Err(ConfigurationError::InvalidUrl { ref url, .. }) if url == "::nope"
        ));
    }
}
