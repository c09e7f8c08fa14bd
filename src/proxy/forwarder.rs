//! Forwarding engine.
//!
//! # Responsibilities
//! - Build the outbound request for a chosen target (URI join, Host,
//!   hop-by-hop stripping, X-Forwarded-*)
//! - Proxy plain requests through a pooled hyper client, streaming the
//!   backend body into the client's [`ResponseWriter`]
//! - Proxy upgrade requests (see `http::websocket`)
//! - Report every failure to the single error hook registered with
//!   [`HttpForwarder::on_error`]
//!
//! # Design Decisions
//! - `forward_http` never blocks the caller; the exchange runs in its own task
//! - No retries: a failed backend yields an error response, not another pick

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{
    header, request::Parts, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri,
};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::config::{ProxyPolicyConfig, TimeoutConfig};
use crate::http::response::{strip_hop_by_hop, ResponseWriter};
use crate::http::websocket::{self, ClientSocket};
use crate::observability::metrics;
use crate::proxy::errors::{default_hook, ErrorHook, ForwardError, ProxyError};

/// Pooled client shared by every forwarder.
pub type HttpClient = Client<HttpConnector, Body>;

/// Build the shared backend client.
pub fn build_client(timeouts: &TimeoutConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(timeouts.connect()));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

/// What an exchange was about, for logs and the error hook.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: Method,
    pub uri: Uri,
    pub target: Url,
}

impl RequestSummary {
    pub fn new(parts: &Parts, target: &Url) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            target: target.clone(),
        }
    }
}

/// The byte-level proxying collaborator of a proxy policy.
pub trait ForwardingEngine: Send + Sync + 'static {
    /// Forward a plain request. Returns immediately; the response is
    /// delivered through `response`.
    fn forward_http(&self, request: Request<Body>, response: ResponseWriter, target: Url);

    /// Forward an upgrade request. Resolves to the handshake response for
    /// the client once the backend has answered.
    fn forward_upgrade(
        &self,
        parts: Parts,
        socket: ClientSocket,
        target: Url,
    ) -> BoxFuture<'static, Result<Response<Body>, ProxyError>>;
}

/// Per-policy forwarding options.
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    /// Rewrite `Host` to the target authority.
    pub change_origin: bool,
    /// Add `X-Forwarded-*` headers.
    pub xfwd: bool,
    /// Connect timeout for upgrade connections.
    pub connect_timeout: Duration,
    /// Deadline for the backend's response head.
    pub upstream_timeout: Duration,
}

impl ForwardOptions {
    pub fn new(policy: &ProxyPolicyConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            change_origin: policy.change_origin,
            xfwd: policy.xfwd,
            connect_timeout: timeouts.connect(),
            upstream_timeout: timeouts.upstream(),
        }
    }
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self::new(&ProxyPolicyConfig::default(), &TimeoutConfig::default())
    }
}

/// Forwarding engine backed by hyper.
#[derive(Clone)]
pub struct HttpForwarder {
    inner: Arc<ForwarderInner>,
}

struct ForwarderInner {
    client: HttpClient,
    options: ForwardOptions,
    on_error: ErrorHook,
}

impl HttpForwarder {
    /// Forwarder using the standard error hook.
    pub fn new(client: HttpClient, options: ForwardOptions) -> Self {
        Self {
            inner: Arc::new(ForwarderInner {
                client,
                options,
                on_error: default_hook(),
            }),
        }
    }

    /// Register the error hook. One hook per forwarder; the last call wins.
    pub fn on_error(self, hook: ErrorHook) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => ForwarderInner {
                on_error: hook,
                ..inner
            },
            Err(shared) => ForwarderInner {
                client: shared.client.clone(),
                options: shared.options.clone(),
                on_error: hook,
            },
        };
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl fmt::Debug for HttpForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpForwarder")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ForwardingEngine for HttpForwarder {
    fn forward_http(&self, request: Request<Body>, mut response: ResponseWriter, target: Url) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let (parts, body) = request.into_parts();
            let summary = RequestSummary::new(&parts, &target);
            let start = Instant::now();

            match inner.relay(parts, body, &target, &mut response).await {
                Ok(status) => {
                    let method = summary.method.as_str();
                    metrics::record_request(method, status, target.as_str(), start);
                }
                Err(err) => {
                    if let Err(err) = (inner.on_error)(err, &summary, Some(&mut response)) {
                        tracing::error!(uri = %summary.uri, error = %err, "Unhandled proxy error");
                    }
                    let status = delivered_status(&response);
                    let method = summary.method.as_str();
                    metrics::record_request(method, status, target.as_str(), start);
                }
            }
        });
    }

    fn forward_upgrade(
        &self,
        parts: Parts,
        socket: ClientSocket,
        target: Url,
    ) -> BoxFuture<'static, Result<Response<Body>, ProxyError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let summary = RequestSummary::new(&parts, &target);
            let handshake = websocket::handshake(&parts, &target, &inner.options).await;

            match handshake {
                Ok(backend) => {
                    metrics::record_upgrade(target.as_str(), backend.accepted());
                    let on_error = inner.on_error.clone();
                    Ok(backend.into_client_response(socket, move |err| {
                        // Piping failures have no response to write to.
                        if let Err(err) = on_error(err, &summary, None) {
                            tracing::debug!(
                                uri = %summary.uri,
                                error = %err,
                                "Upgraded connection closed"
                            );
                        }
                    }))
                }
                Err(err) => {
                    metrics::record_upgrade(target.as_str(), false);
                    (inner.on_error)(err, &summary, None).map_err(ProxyError::Protocol)?;
                    Err(ProxyError::UpgradeAborted)
                }
            }
        })
    }
}

impl ForwarderInner {
    /// Proxy one plain exchange, returning the backend status.
    async fn relay(
        &self,
        parts: Parts,
        body: Body,
        target: &Url,
        response: &mut ResponseWriter,
    ) -> Result<u16, ForwardError> {
        let outbound = build_outbound(parts, body, target, &self.options)?;

        let request = self.client.request(outbound);
        let backend = tokio::time::timeout(self.options.upstream_timeout, request)
            .await
            .map_err(|_| ForwardError::Timeout(self.options.upstream_timeout))?
            .map_err(ForwardError::Upstream)?;

        let (mut head, body) = backend.into_parts();
        let status = head.status;
        strip_hop_by_hop(&mut head.headers);
        response.set_status(status)?;
        *response.headers_mut() = head.headers;
        response.send_head()?;

        let mut stream = Body::new(body).into_data_stream();
        while let Some(chunk) = stream.next().await {
            response.write(chunk.map_err(ForwardError::Body)?).await?;
        }
        response.end();

        Ok(status.as_u16())
    }
}

/// Status the client sees once a failed exchange has been handed to the
/// error hook. A writer that never sent its head turns into a 502.
fn delivered_status(response: &ResponseWriter) -> u16 {
    if response.headers_sent() {
        response.status().as_u16()
    } else {
        StatusCode::BAD_GATEWAY.as_u16()
    }
}

/// Outbound URI: target scheme and authority, target base path, then the
/// request's path and query.
pub fn outbound_uri(target: &Url, request_uri: &Uri) -> Result<Uri, ForwardError> {
    let authority = target_authority(target)?;
    let base = target.path().trim_end_matches('/');
    let path_and_query = request_uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}{}", target.scheme(), authority, base, path_and_query)
        .parse()
        .map_err(|e| ForwardError::InvalidRequest(format!("{}", e)))
}

/// `host[:port]` of a target, as it should appear in `Host`.
pub fn target_authority(target: &Url) -> Result<String, ForwardError> {
    let host = target
        .host_str()
        .ok_or_else(|| ForwardError::InvalidRequest(format!("target {} has no host", target)))?;
    Ok(match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Socket address to dial for a target.
pub fn target_addr(target: &Url) -> Result<(String, u16), ForwardError> {
    let host = target
        .host_str()
        .ok_or_else(|| ForwardError::InvalidRequest(format!("target {} has no host", target)))?;
    let port = target.port_or_known_default().unwrap_or(80);
    Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
}

/// Apply `Host` and `X-Forwarded-*` rules to outbound headers.
pub fn apply_forwarding_headers(
    headers: &mut HeaderMap,
    parts: &Parts,
    target: &Url,
    options: &ForwardOptions,
) -> Result<(), ForwardError> {
    let original_host = parts.headers.get(header::HOST).cloned();

    if options.change_origin || original_host.is_none() {
        let authority = target_authority(target)?;
        let value = HeaderValue::from_str(&authority)
            .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;
        headers.insert(header::HOST, value);
    }

    if options.xfwd {
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            let forwarded_for = match headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
            {
                Some(existing) => format!("{}, {}", existing, peer.ip()),
                None => peer.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert("x-forwarded-for", value);
            }
        }
        if let Some(host) = original_host {
            headers.insert("x-forwarded-host", host);
        }
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }

    Ok(())
}

fn build_outbound(
    parts: Parts,
    body: Body,
    target: &Url,
    options: &ForwardOptions,
) -> Result<Request<Body>, ForwardError> {
    let uri = outbound_uri(target, &parts.uri)?;

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    apply_forwarding_headers(&mut headers, &parts, target, options)?;

    let mut outbound = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .body(body)
        .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}
