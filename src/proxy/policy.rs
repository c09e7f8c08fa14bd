//! The `proxy` policy: the request entry point of a route.
//!
//! # Data Flow
//! ```text
//! Construction (once):  RouteConfig + GatewayConfig
//!     → endpoint::resolve → Target::Fixed | Target::Balanced(strategy)
//!
//! Per request:          Exchange::Http | Exchange::Upgrade
//!     → pick target → path rewrite → ForwardingEngine
//! ```
//!
//! # Design Decisions
//! - `handle` never awaits and never fails; backend failures surface
//!   through the engine's error hook
//! - Each policy owns its strategy, so balancing state is per endpoint

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{request::Parts, Request, Response};
use futures_util::future::BoxFuture;
use url::Url;

use crate::config::{GatewayConfig, RouteConfig};
use crate::http::response::ResponseWriter;
use crate::http::websocket::ClientSocket;
use crate::load_balancer::{BalancingStrategy, StrategyRegistry};
use crate::net::listener::ListenerHandle;
use crate::proxy::endpoint::{self, ServiceEndpoint};
use crate::proxy::errors::{ConfigurationError, ProxyError};
use crate::proxy::forwarder::{ForwardOptions, ForwardingEngine, HttpClient, HttpForwarder};
use crate::proxy::rewrite::{NoRewrite, PathRewrite, PrefixRewrite};
use crate::proxy::upgrade::{UpgradeHandler, UpgradeSubscriber};
use crate::routing::matcher::{AndMatcher, Matcher};

/// Where a policy sends its requests.
#[derive(Debug)]
pub enum Target {
    /// Endpoint configured with a single `url`; no strategy involved.
    Fixed(Url),
    Balanced(Box<dyn BalancingStrategy>),
}

impl Target {
    fn from_endpoint(
        name: &str,
        endpoint: ServiceEndpoint,
        registry: &StrategyRegistry,
    ) -> Result<Self, ConfigurationError> {
        match endpoint {
            ServiceEndpoint::Single(url) => Ok(Target::Fixed(url)),
            ServiceEndpoint::Balanced { urls, strategy } => registry
                .build(&strategy, urls)
                .map(Target::Balanced)
                .map_err(|source| ConfigurationError::Strategy {
                    endpoint: name.to_string(),
                    source,
                }),
        }
    }

    /// The target for the next request.
    pub fn next(&self) -> &Url {
        match self {
            Target::Fixed(url) => url,
            Target::Balanced(strategy) => strategy.next_target(),
        }
    }
}

/// One exchange handed to a policy.
#[derive(Debug)]
pub enum Exchange {
    Http {
        request: Request<Body>,
        response: ResponseWriter,
    },
    Upgrade {
        parts: Parts,
        socket: ClientSocket,
    },
}

/// What `handle` started.
pub enum Dispatch {
    /// The engine owns the exchange and answers through the `ResponseWriter`.
    Forwarding,
    /// Resolves to the handshake response for the client.
    Upgrading(BoxFuture<'static, Result<Response<Body>, ProxyError>>),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Forwarding => f.write_str("Forwarding"),
            Dispatch::Upgrading(_) => f.write_str("Upgrading"),
        }
    }
}

pub struct ProxyPolicy {
    name: String,
    priority: u32,
    matcher: AndMatcher,
    target: Target,
    rewrite: Box<dyn PathRewrite>,
    ws: bool,
    engine: Arc<dyn ForwardingEngine>,
    subscriber: UpgradeSubscriber,
}

impl ProxyPolicy {
    /// Build the policy of `route`. Fails when its endpoint does not resolve
    /// or names an unknown strategy.
    pub fn new(
        route: &RouteConfig,
        config: &GatewayConfig,
        registry: &StrategyRegistry,
        engine: Arc<dyn ForwardingEngine>,
    ) -> Result<Arc<Self>, ConfigurationError> {
        let endpoint_name = &route.proxy.service_endpoint;
        let endpoint = endpoint::resolve(endpoint_name, config)?;
        let target = Target::from_endpoint(endpoint_name, endpoint, registry)?;

        let prefix_rewrite = PrefixRewrite::new(&route.proxy.path_rewrite);
        let rewrite: Box<dyn PathRewrite> = if prefix_rewrite.is_empty() {
            Box::new(NoRewrite)
        } else {
            Box::new(prefix_rewrite)
        };

        tracing::debug!(
            route = %route.name,
            endpoint = %endpoint_name,
            target = ?target,
            ws = route.proxy.ws,
            "Proxy policy created"
        );

        Ok(Arc::new(Self {
            name: route.name.clone(),
            priority: route.priority,
            matcher: AndMatcher::from_route(route),
            target,
            rewrite,
            ws: route.proxy.ws,
            engine,
            subscriber: UpgradeSubscriber::new(),
        }))
    }

    /// Build the policy with an [`HttpForwarder`] over the shared client.
    pub fn with_client(
        route: &RouteConfig,
        config: &GatewayConfig,
        registry: &StrategyRegistry,
        client: HttpClient,
    ) -> Result<Arc<Self>, ConfigurationError> {
        let options = ForwardOptions::new(&route.proxy, &config.timeouts);
        let engine: Arc<dyn ForwardingEngine> = Arc::new(HttpForwarder::new(client, options));
        Self::new(route, config, registry, engine)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn ws_enabled(&self) -> bool {
        self.ws
    }

    /// Whether the route's conditions accept the request.
    pub fn matches(&self, parts: &Parts) -> bool {
        self.matcher.matches(parts)
    }

    /// Dispatch one exchange.
    pub fn handle(self: &Arc<Self>, exchange: Exchange) -> Dispatch {
        match exchange {
            Exchange::Http { request, response } => {
                if let Some(listener) = request.extensions().get::<ListenerHandle>() {
                    self.subscribe(listener);
                }

                let target = self.target.next().clone();
                let (mut parts, body) = request.into_parts();
                tracing::debug!(
                    policy = %self.name,
                    method = %parts.method,
                    url = %parts.uri,
                    target = %target,
                    "Forwarding request"
                );
                self.rewrite.rewrite(&mut parts);
                self.engine
                    .forward_http(Request::from_parts(parts, body), response, target);
                Dispatch::Forwarding
            }
            Exchange::Upgrade { parts, socket } => Dispatch::Upgrading(self.upgrade(parts, socket)),
        }
    }

    /// Attach this policy to `listener`'s upgrade event, once. No-op unless
    /// the policy proxies WebSockets.
    pub fn subscribe(self: &Arc<Self>, listener: &ListenerHandle) -> bool {
        if !self.ws {
            return false;
        }
        let handler: Arc<dyn UpgradeHandler> = self.clone();
        self.subscriber.ensure_subscribed(listener, &handler)
    }

    fn upgrade(
        &self,
        mut parts: Parts,
        socket: ClientSocket,
    ) -> BoxFuture<'static, Result<Response<Body>, ProxyError>> {
        let target = self.target.next().clone();
        tracing::debug!(
            policy = %self.name,
            method = %parts.method,
            url = %parts.uri,
            target = %target,
            "Forwarding upgrade"
        );
        self.rewrite.rewrite(&mut parts);
        self.engine.forward_upgrade(parts, socket, target)
    }
}

impl UpgradeHandler for ProxyPolicy {
    fn claims(&self, parts: &Parts) -> bool {
        self.ws && self.matcher.matches(parts)
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn on_upgrade(
        &self,
        parts: Parts,
        socket: ClientSocket,
    ) -> BoxFuture<'static, Result<Response<Body>, ProxyError>> {
        self.upgrade(parts, socket)
    }
}

impl fmt::Debug for ProxyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPolicy")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("target", &self.target)
            .field("ws", &self.ws)
            .finish_non_exhaustive()
    }
}
