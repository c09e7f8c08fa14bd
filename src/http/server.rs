//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Accept connections on every listener and serve HTTP/1.1 and h2c
//! - Emit upgrade requests on the listener's upgrade event
//! - Dispatch plain requests through the Axum router to the matched policy
//! - Wire up middleware (request ID, tracing, timeout)
//! - Swap the compiled routes on configuration reload
//! - Drain connections on shutdown

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::http::request::{is_upgrade_request, propagate_request_id_layer, set_request_id_layer};
use crate::http::response::ResponseWriter;
use crate::load_balancer::StrategyRegistry;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError, ListenerHandle};
use crate::observability::metrics;
use crate::proxy::errors::{ConfigurationError, ProxyError};
use crate::proxy::forwarder::{build_client, HttpClient};
use crate::proxy::policy::Exchange;
use crate::routing::Router as ProxyRouter;

/// State shared by every connection.
struct ServerState {
    routes: ArcSwap<ProxyRouter>,
    client: HttpClient,
    registry: StrategyRegistry,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl ServerState {
    /// Subscribe the policies of `routes` to every known listener, then
    /// make them current.
    fn install(&self, routes: ProxyRouter) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            routes.attach_listener(listener);
        }
        self.routes.store(Arc::new(routes));
    }

    fn add_listener(&self, listener: ListenerHandle) {
        self.routes.load().attach_listener(&listener);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

/// HTTP server hosting the proxy policies.
pub struct HttpServer {
    state: Arc<ServerState>,
    app: Router,
    drain_timeout: Duration,
}

impl HttpServer {
    /// Build the server and every route's policy. Fails when a route's
    /// endpoint does not resolve.
    pub fn new(config: &GatewayConfig) -> Result<Self, ConfigurationError> {
        Self::with_registry(config, StrategyRegistry::default())
    }

    /// Like [`HttpServer::new`], with additional balancing strategies.
    pub fn with_registry(
        config: &GatewayConfig,
        registry: StrategyRegistry,
    ) -> Result<Self, ConfigurationError> {
        let client = build_client(&config.timeouts);
        let routes = ProxyRouter::build(config, &client, &registry)?;

        let state = Arc::new(ServerState {
            routes: ArcSwap::from_pointee(routes),
            client,
            registry,
            listeners: Mutex::new(Vec::new()),
        });
        let app = Self::build_router(state.clone(), config.timeouts.request());

        Ok(Self {
            state,
            app,
            drain_timeout: config.timeouts.drain(),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: Arc<ServerState>, request_timeout: Duration) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Rebuild the policies from `config` and swap them in. On error the
    /// current routes stay active.
    ///
    /// Listeners, timeouts and the backend client are fixed at startup.
    pub fn reload(&self, config: &GatewayConfig) -> Result<(), ConfigurationError> {
        let routes = ProxyRouter::build(config, &self.state.client, &self.state.registry)?;
        self.state.install(routes);
        Ok(())
    }

    /// Number of routes currently active.
    pub fn route_count(&self) -> usize {
        self.state.routes.load().len()
    }

    /// Serve `listeners` until `shutdown` fires, applying configuration
    /// updates as they arrive, then drain open connections.
    pub async fn run(
        self,
        listeners: Vec<Listener>,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let tracker = ConnectionTracker::new();
        let mut accept_tasks = Vec::with_capacity(listeners.len());

        for listener in listeners {
            let addr = listener.local_addr()?;
            tracing::info!(
                listener = %listener.handle().name(),
                address = %addr,
                "HTTP server starting"
            );
            self.state.add_listener(listener.handle().clone());

            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                self.app.clone(),
                tracker.clone(),
                shutdown.resubscribe(),
            )));
        }

        let mut updates_open = true;
        loop {
            tokio::select! {
                update = config_updates.recv(), if updates_open => match update {
                    Some(config) => match self.reload(&config) {
                        Ok(()) => {
                            tracing::info!(routes = self.route_count(), "Configuration reloaded")
                        }
                        Err(e) => tracing::error!(
                            error = %e,
                            "Reload rejected, keeping current configuration"
                        ),
                    },
                    None => updates_open = false,
                },
                _ = shutdown.recv() => break,
            }
        }

        for task in accept_tasks {
            let _ = task.await;
        }

        tracing::info!(active = tracker.active_count(), "Draining connections");
        if !tracker.drain(self.drain_timeout).await {
            tracing::warn!(
                active = tracker.active_count(),
                "Drain deadline reached, closing remaining connections"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn accept_loop(
    listener: Listener,
    app: Router,
    tracker: ConnectionTracker,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer, permit)) => {
                    let guard = tracker.track();
                    let handle = listener.handle().clone();
                    let app = app.clone();
                    let shutdown = shutdown.resubscribe();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let served = serve_connection(stream, peer, handle, app, shutdown).await;
                        if let Err(e) = served {
                            tracing::debug!(
                                connection_id = %guard.id(),
                                peer_addr = %peer,
                                error = %e,
                                "Connection error"
                            );
                        }
                    });
                }
                Err(ListenerError::Closed) => break,
                Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::info!(listener = %listener.handle().name(), "Listener stopped accepting");
}

/// Serve one connection. Upgrade requests go to the listener's upgrade
/// event; a failed upgrade closes the connection without a response. An
/// upgrade no handler claims is dispatched like any other request.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    listener: ListenerHandle,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = stream.set_nodelay(true);
    let io = TokioIo::new(stream);

    let service = service_fn(move |mut req: Request<Incoming>| {
        let listener = listener.clone();
        let app = app.clone();
        async move {
            req.extensions_mut().insert(ConnectInfo(peer));

            if is_upgrade_request(&req) {
                let uri = req.uri().clone();
                req = match listener.emit_upgrade(req) {
                    Ok(upgrade) => {
                        return upgrade.await.map_err(|e| {
                            tracing::debug!(
                                peer_addr = %peer,
                                uri = %uri,
                                error = %e,
                                "Upgrade failed, closing connection"
                            );
                            e
                        });
                    }
                    // Unclaimed upgrades are ordinary requests.
                    Err(unclaimed) => unclaimed,
                };
            }

            req.extensions_mut().insert(listener);
            app.oneshot(req.map(Body::new))
                .await
                .map_err(|never: Infallible| -> ProxyError { match never {} })
        }
    });

    let builder = AutoBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => return result,
        _ = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
        }
    }
    conn.await
}

/// Matches the route and hands the exchange to its policy.
async fn proxy_handler(State(state): State<Arc<ServerState>>, request: Request<Body>) -> Response {
    let routes = state.routes.load_full();
    let (parts, body) = request.into_parts();

    let Some(policy) = routes.match_request(&parts).cloned() else {
        tracing::warn!(method = %parts.method, uri = %parts.uri, "No route matched");
        metrics::record_request(parts.method.as_str(), 404, "none", Instant::now());
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    let (writer, pending) = ResponseWriter::channel();
    policy.handle(Exchange::Http {
        request: Request::from_parts(parts, body),
        response: writer,
    });
    pending.into_response().await
}
