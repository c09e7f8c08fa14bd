//! Load-balanced reverse-proxy gateway.
//!
//! Named service endpoints resolve to one or more backend URLs; every route
//! owns a `proxy` policy that picks a backend per request (round-robin by
//! default), forwards plain requests and WebSocket upgrades, and answers
//! backend failures with `502 Bad Gateway`.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::ProxyPolicy;
