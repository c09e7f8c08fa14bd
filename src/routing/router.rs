//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Compile configured routes into proxy policies
//! - Look up the policy for a request
//! - Subscribe WebSocket-enabled policies to listeners
//!
//! # Design Decisions
//! - Immutable after construction; a reload builds a new `Router`
//! - Higher priority first, configuration order among equals
//! - Explicit `None` rather than a silent default route

use std::sync::Arc;

use axum::http::request::Parts;

use crate::config::GatewayConfig;
use crate::load_balancer::StrategyRegistry;
use crate::net::listener::ListenerHandle;
use crate::proxy::errors::ConfigurationError;
use crate::proxy::forwarder::HttpClient;
use crate::proxy::policy::ProxyPolicy;

#[derive(Debug, Default)]
pub struct Router {
    policies: Vec<Arc<ProxyPolicy>>,
}

impl Router {
    pub fn new(mut policies: Vec<Arc<ProxyPolicy>>) -> Self {
        // Stable sort keeps configuration order among equal priorities.
        policies.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { policies }
    }

    /// Build one policy per configured route. The first route whose
    /// endpoint does not resolve fails the whole router.
    pub fn build(
        config: &GatewayConfig,
        client: &HttpClient,
        registry: &StrategyRegistry,
    ) -> Result<Self, ConfigurationError> {
        let policies = config
            .routes
            .iter()
            .map(|route| ProxyPolicy::with_client(route, config, registry, client.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(routes = policies.len(), "Router compiled");
        Ok(Self::new(policies))
    }

    /// First policy whose route matches.
    pub fn match_request(&self, parts: &Parts) -> Option<&Arc<ProxyPolicy>> {
        self.policies.iter().find(|p| p.matches(parts))
    }

    /// Subscribe every WebSocket-enabled policy to `listener`.
    /// Returns how many subscriptions were new.
    pub fn attach_listener(&self, listener: &ListenerHandle) -> usize {
        self.policies
            .iter()
            .filter(|p| p.subscribe(listener))
            .count()
    }

    pub fn policies(&self) -> &[Arc<ProxyPolicy>] {
        &self.policies
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
