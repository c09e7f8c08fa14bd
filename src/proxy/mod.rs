//! Load-balanced reverse-proxy policy.
//!
//! # Data Flow
//! ```text
//! GatewayConfig
//!     → endpoint.rs (resolve service endpoint, once per policy)
//!     → load_balancer (strategy built once, reused per request)
//!     → policy.rs (ProxyPolicy::handle, per request)
//!     → forwarder.rs (ForwardingEngine, async, per request)
//!     → errors.rs (error hook: 502 / end stream / re-raise)
//!
//! Upgrades:
//!     listener upgrade event → upgrade.rs (one handler per listener)
//!     → ProxyPolicy → ForwardingEngine::forward_upgrade
//! ```
//!
//! # Design Decisions
//! - Configuration errors are raised at construction, never per request
//! - Backend failures never crash the process and are never retried

pub mod endpoint;
pub mod errors;
pub mod forwarder;
pub mod policy;
pub mod rewrite;
pub mod upgrade;

pub use endpoint::ServiceEndpoint;
pub use errors::{translate_error, ConfigurationError, ErrorHook, ForwardError, ProxyError};
pub use forwarder::{build_client, ForwardOptions, ForwardingEngine, HttpClient, HttpForwarder};
pub use policy::{Dispatch, Exchange, ProxyPolicy, Target};
pub use upgrade::{UpgradeHandler, UpgradeSubscriber};
