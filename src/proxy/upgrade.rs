//! Upgrade subscription.
//!
//! Upgrade requests arrive on the listener, which is shared by every request
//! and every policy. A policy attaches its handler to each listener at most
//! once, however many requests reach it before the first upgrade.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{request::Parts, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::http::websocket::ClientSocket;
use crate::net::listener::{ListenerHandle, ListenerId};
use crate::proxy::errors::ProxyError;

/// Receives upgrade events from listeners.
///
/// Each invocation gets its own request and socket; implementations keep no
/// per-event state between calls.
pub trait UpgradeHandler: Send + Sync + 'static {
    /// Whether this handler wants the upgrade request.
    fn claims(&self, parts: &Parts) -> bool;

    /// Larger wins when several handlers claim the same request.
    fn priority(&self) -> u32 {
        0
    }

    /// Handle one upgrade. Resolves to the handshake response for the client.
    fn on_upgrade(
        &self,
        parts: Parts,
        socket: ClientSocket,
    ) -> BoxFuture<'static, Result<Response<Body>, ProxyError>>;
}

/// Set of listeners one handler has been attached to.
#[derive(Debug, Default)]
pub struct UpgradeSubscriber {
    subscribed: DashMap<ListenerId, ()>,
}

impl UpgradeSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `on_upgrade` to `listener` unless already done.
    ///
    /// Returns `true` when this call attached the handler. The check and
    /// the attach happen under the same entry lock.
    pub fn ensure_subscribed(
        &self,
        listener: &ListenerHandle,
        on_upgrade: &Arc<dyn UpgradeHandler>,
    ) -> bool {
        match self.subscribed.entry(listener.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                listener.attach(on_upgrade);
                slot.insert(());
                tracing::debug!(
                    listener = %listener.name(),
                    id = %listener.id(),
                    "Subscribed to upgrade events"
                );
                true
            }
        }
    }

    pub fn is_subscribed(&self, listener: ListenerId) -> bool {
        self.subscribed.contains_key(&listener)
    }

    /// Number of listeners subscribed to.
    pub fn len(&self) -> usize {
        self.subscribed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty()
    }
}
