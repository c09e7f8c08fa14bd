//! Error types of the proxy policy and the standard error hook.
//!
//! # Taxonomy
//! - `ConfigurationError`: missing or malformed endpoint configuration.
//!   Fatal at policy construction, never retried.
//! - `ForwardError`: anything that goes wrong while proxying to the chosen
//!   backend. Recovered per request through the error hook.
//! - `ProxyError`: what reaches the server layer. Only upgrade failures
//!   (no HTTP response to answer with) propagate this far.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};

use crate::http::response::ResponseWriter;
use crate::load_balancer::StrategyError;
use crate::observability::metrics;
use crate::proxy::forwarder::RequestSummary;

/// Body sent with a 502 when a backend fails before any header went out.
pub const BAD_GATEWAY_BODY: &str = "Bad gateway.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("service endpoint '{0}' (referenced in 'proxy' policy configuration) does not exist")]
    UnknownEndpoint(String),

    #[error("service endpoint '{0}' has neither `url` nor `urls` configured")]
    MissingUrl(String),

    #[error("service endpoint '{0}' has an empty `urls` list")]
    EmptyUrls(String),

    #[error("service endpoint '{endpoint}' has an invalid url '{url}': {source}")]
    InvalidUrl {
        endpoint: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(
        "service endpoint '{endpoint}' uses unsupported scheme '{scheme}' (expected http or ws)"
    )]
    UnsupportedScheme { endpoint: String, scheme: String },

    #[error("service endpoint '{endpoint}': {source}")]
    Strategy {
        endpoint: String,
        #[source]
        source: StrategyError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    #[error("backend request failed: {0}")]
    Upstream(#[source] hyper_util::client::legacy::Error),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),

    #[error("backend body failed: {0}")]
    Body(#[source] axum::Error),

    #[error("backend connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("upgrade handshake failed: {0}")]
    Handshake(String),

    #[error("client upgrade failed: {0}")]
    ClientUpgrade(#[source] hyper::Error),

    #[error("client went away")]
    ClientGone,

    #[error("response headers already sent")]
    HeadersSent,
}

impl ForwardError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::InvalidRequest(_) => "invalid_request",
            ForwardError::Upstream(_) => "upstream",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Body(_) => "body",
            ForwardError::Io(_) => "io",
            ForwardError::Handshake(_) => "handshake",
            ForwardError::ClientUpgrade(_) => "client_upgrade",
            ForwardError::ClientGone => "client_gone",
            ForwardError::HeadersSent => "headers_sent",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("upgrade failed: {0}")]
    Protocol(#[source] ForwardError),

    #[error("upgrade aborted after a handled error")]
    UpgradeAborted,
}

/// Callback invoked by a forwarding engine whenever an exchange fails.
///
/// `response` is `None` for upgrades, which have no HTTP response to write.
/// Returning `Err` re-raises the error to the caller.
pub type ErrorHook = Arc<
    dyn Fn(ForwardError, &RequestSummary, Option<&mut ResponseWriter>) -> Result<(), ForwardError>
        + Send
        + Sync,
>;

/// The standard error hook.
///
/// - no response object: the error is handed back to the caller
/// - headers not sent yet: `502 Bad Gateway` with a short text body
/// - headers already sent: the response stream is ended as-is
pub fn translate_error(
    err: ForwardError,
    summary: &RequestSummary,
    response: Option<&mut ResponseWriter>,
) -> Result<(), ForwardError> {
    tracing::warn!(
        method = %summary.method,
        uri = %summary.uri,
        target = %summary.target,
        error = %err,
        "Proxy error"
    );
    metrics::record_forward_error(err.kind());

    let Some(response) = response else {
        return Err(err);
    };

    if response.headers_sent() {
        response.end();
        return Ok(());
    }

    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Err(e) = response.send(StatusCode::BAD_GATEWAY, BAD_GATEWAY_BODY) {
        tracing::debug!(uri = %summary.uri, error = %e, "Could not deliver 502 to client");
    }
    Ok(())
}

/// `translate_error` as an [`ErrorHook`].
pub fn default_hook() -> ErrorHook {
    Arc::new(translate_error)
}
