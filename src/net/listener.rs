//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to configured address(es)
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Own the listener's upgrade event: handlers attach to a
//!   [`ListenerHandle`], upgrade requests are emitted to one of them

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use axum::body::Body;
use axum::http::{request::Parts, Request, Response};
use futures_util::future::BoxFuture;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::http::websocket::ClientSocket;
use crate::proxy::errors::ProxyError;
use crate::proxy::upgrade::UpgradeHandler;

/// Handshake answer of a claimed upgrade.
pub type UpgradeFuture = BoxFuture<'static, Result<Response<Body>, ProxyError>>;

/// Relaxed ordering is enough; ids only need to be unique.
static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("listener is closed")]
    Closed,
}

/// Identity of one connection-accepting listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Shared handle to a listener's identity and upgrade event.
///
/// Handlers are held weakly: a policy dropped by a configuration reload
/// stops receiving upgrades without having to detach.
#[derive(Clone)]
pub struct ListenerHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: ListenerId,
    name: String,
    handlers: RwLock<Vec<Weak<dyn UpgradeHandler>>>,
}

impl ListenerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: ListenerId::new(),
                name: name.into(),
                handlers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attach an upgrade handler. Callers deduplicate (see `UpgradeSubscriber`).
    pub fn attach(&self, handler: &Arc<dyn UpgradeHandler>) {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        handlers.retain(|h| h.strong_count() > 0);
        handlers.push(Arc::downgrade(handler));
        tracing::debug!(
            listener = %self.inner.name,
            handlers = handlers.len(),
            "Upgrade handler attached"
        );
    }

    /// Number of attached handlers still alive.
    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| h.strong_count() > 0)
            .count()
    }

    /// Emit an upgrade event for `req`.
    ///
    /// The highest-priority live handler claiming the request receives it;
    /// on equal priority the earliest attached wins. When nothing claims
    /// it, the request is handed back untouched so it can be served as a
    /// plain request.
    pub fn emit_upgrade<B>(&self, req: Request<B>) -> Result<UpgradeFuture, Request<B>> {
        let (parts, body) = req.into_parts();

        let Some(handler) = self.claiming_handler(&parts) else {
            tracing::debug!(
                listener = %self.inner.name,
                uri = %parts.uri,
                "No upgrade handler claimed request"
            );
            return Err(Request::from_parts(parts, body));
        };

        let mut req = Request::from_parts(parts, body);
        let on_upgrade = hyper::upgrade::on(&mut req);
        let (parts, _body) = req.into_parts();
        Ok(handler.on_upgrade(parts, ClientSocket::new(on_upgrade)))
    }

    fn claiming_handler(&self, parts: &Parts) -> Option<Arc<dyn UpgradeHandler>> {
        let handlers = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut best: Option<Arc<dyn UpgradeHandler>> = None;
        for handler in handlers.iter().filter_map(Weak::upgrade) {
            if !handler.claims(parts) {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |b| handler.priority() > b.priority());
            if better {
                best = Some(handler);
            }
        }
        best
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, new connections wait until a slot frees up.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    handle: ListenerHandle,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(
            listener = %config.name,
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            handle: ListenerHandle::new(config.name.clone()),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn handle(&self) -> &ListenerHandle {
        &self.handle
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot, released on drop (also when the handler panics).
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
