//! Response handling.
//!
//! # Responsibilities
//! - Give forwarding code a writable response object with explicit
//!   "headers sent" state (status can only change before the head goes out)
//! - Stream backend bodies to the client without buffering them
//! - Strip hop-by-hop headers from backend responses
//!
//! # Data Flow
//! ```text
//! forwarding task ── ResponseWriter ──(head: oneshot)──▶ PendingResponse ──▶ axum handler
//!                                   ──(body: mpsc)────▶ Body::from_stream
//! ```

use axum::body::{Body, Bytes};
use axum::http::{response, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::proxy::errors::{ForwardError, BAD_GATEWAY_BODY};

/// Body chunks buffered between the forwarding task and the client.
const BODY_CHANNEL_CAPACITY: usize = 16;

type Chunk = Result<Bytes, ForwardError>;

/// Hop-by-hop headers, never forwarded in either direction.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(axum::http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(axum::http::header::UPGRADE);
}

/// Writable side of a client response.
#[derive(Debug)]
pub struct ResponseWriter {
    head_tx: Option<oneshot::Sender<response::Parts>>,
    body_tx: Option<mpsc::Sender<Chunk>>,
    status: StatusCode,
    headers: HeaderMap,
}

/// Readable side of a client response, turned into the axum response.
#[derive(Debug)]
pub struct PendingResponse {
    head_rx: oneshot::Receiver<response::Parts>,
    body_rx: mpsc::Receiver<Chunk>,
}

impl ResponseWriter {
    /// Create a connected writer / pending response pair.
    pub fn channel() -> (ResponseWriter, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        (
            ResponseWriter {
                head_tx: Some(head_tx),
                body_tx: Some(body_tx),
                status: StatusCode::OK,
                headers: HeaderMap::new(),
            },
            PendingResponse { head_rx, body_rx },
        )
    }

    /// Whether status and headers have already gone out.
    pub fn headers_sent(&self) -> bool {
        self.head_tx.is_none()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), ForwardError> {
        if self.headers_sent() {
            return Err(ForwardError::HeadersSent);
        }
        self.status = status;
        Ok(())
    }

    /// Headers to send. Changes after the head went out have no effect.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Send status and headers now.
    pub fn send_head(&mut self) -> Result<(), ForwardError> {
        let head_tx = self.head_tx.take().ok_or(ForwardError::HeadersSent)?;
        let (mut parts, ()) = Response::new(()).into_parts();
        parts.status = self.status;
        parts.headers = std::mem::take(&mut self.headers);
        head_tx.send(parts).map_err(|_| ForwardError::ClientGone)
    }

    /// Write a body chunk, sending the head first if needed.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), ForwardError> {
        if !self.headers_sent() {
            self.send_head()?;
        }
        let body_tx = self.body_tx.as_ref().ok_or(ForwardError::ClientGone)?;
        body_tx
            .send(Ok(chunk))
            .await
            .map_err(|_| ForwardError::ClientGone)
    }

    /// Send a complete response: status, content length and body.
    pub fn send(&mut self, status: StatusCode, body: impl Into<Bytes>) -> Result<(), ForwardError> {
        let body = body.into();
        self.set_status(status)?;
        self.headers
            .insert(axum::http::header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.send_head()?;
        if !body.is_empty() {
            if let Some(body_tx) = &self.body_tx {
                // Nothing was written before the head, so the channel is empty
                // and has room for this chunk.
                body_tx
                    .try_send(Ok(body))
                    .map_err(|_| ForwardError::ClientGone)?;
            }
        }
        self.end();
        Ok(())
    }

    /// Finish the response. Sends the head if it has not gone out yet.
    pub fn end(&mut self) {
        if !self.headers_sent() {
            let _ = self.send_head();
        }
        self.body_tx = None;
    }
}

impl PendingResponse {
    /// Wait for the head and build the response streaming the body.
    ///
    /// A writer dropped before sending anything yields a 502.
    pub async fn into_response(self) -> Response<Body> {
        let PendingResponse { head_rx, body_rx } = self;
        match head_rx.await {
            Ok(parts) => {
                let stream = futures_util::stream::unfold(body_rx, |mut rx| async move {
                    rx.recv().await.map(|chunk| (chunk, rx))
                });
                Response::from_parts(parts, Body::from_stream(stream))
            }
            Err(_) => {
                let mut response = Response::new(Body::from(BAD_GATEWAY_BODY));
                *response.status_mut() = StatusCode::BAD_GATEWAY;
                response
            }
        }
    }
}
