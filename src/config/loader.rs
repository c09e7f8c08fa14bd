//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML or JSON file.
///
/// Files ending in `.json` are parsed as JSON, everything else as TOML.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config: GatewayConfig = if is_json {
        serde_json::from_str(&content)?
    } else {
        toml::from_str(&content)?
    };

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_toml() {
        let file = write_temp(
            ".toml",
            r#"
            [[listeners]]
            name = "public"
            bind_address = "127.0.0.1:0"
            max_connections = 16

            [service_endpoints.api]
            url = "http://127.0.0.1:3000"

            [[routes]]
            name = "api"
            [routes.proxy]
            service_endpoint = "api"
            "#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listeners[0].name, "public");
        assert_eq!(config.routes[0].proxy.service_endpoint, "api");
    }

    #[test]
    fn loads_json() {
        let file = write_temp(
            ".json",
            r#"{
                "serviceEndpoints": { "api": { "urls": ["http://a:1", "http://b:1"] } },
                "routes": [{ "name": "api", "proxy": { "serviceEndpoint": "api" } }]
            }"#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(
            config.service_endpoints["api"].urls.as_deref(),
            Some(&["http://a:1".to_string(), "http://b:1".to_string()][..])
        );
    }

    #[test]
    fn rejects_dangling_endpoint_reference() {
        let file = write_temp(
            ".toml",
            r#"
            [[routes]]
            name = "api"
            proxy = { service_endpoint = "nowhere" }
            "#,
        );

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().contains("nowhere"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
