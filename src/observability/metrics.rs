//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): plain requests by method, status, target
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upgrades_total` (counter): upgrade handshakes by target, outcome
//! - `proxy_forward_errors_total` (counter): forwarding errors by kind
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "proxy_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "proxy_request_duration_seconds";
pub const UPGRADES_TOTAL: &str = "proxy_upgrades_total";
pub const FORWARD_ERRORS_TOTAL: &str = "proxy_forward_errors_total";

/// Install the Prometheus recorder and its scrape listener on `addr`.
/// Must run inside the tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

/// Record a completed plain request.
pub fn record_request(method: &str, status: u16, target: &str, start: Instant) {
    ::metrics::counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string(),
        "target" => target.to_string()
    )
    .increment(1);
    ::metrics::histogram!(REQUEST_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
}

/// Record an upgrade handshake.
pub fn record_upgrade(target: &str, accepted: bool) {
    let outcome = if accepted { "switched" } else { "refused" };
    ::metrics::counter!(
        UPGRADES_TOTAL,
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_forward_error(kind: &'static str) {
    ::metrics::counter!(FORWARD_ERRORS_TOTAL, "kind" => kind).increment(1);
}
