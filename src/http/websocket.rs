//! Upgrade (WebSocket) proxying.
//!
//! # Responsibilities
//! - Replay the client's upgrade request on a fresh backend connection
//! - Relay the backend's handshake answer to the client
//! - Pipe bytes both ways once both sides have switched protocols
//!
//! # Design Decisions
//! - The backend handshake is spoken directly over TCP so the raw stream is
//!   available after `101 Switching Protocols`
//! - Bytes the backend sent right after its handshake head are written to
//!   the client before piping starts
//! - A refused upgrade is relayed with the backend's status, headers and
//!   body; the body is read in full (bounded) before answering the client

use std::fmt;

use axum::body::{Body, Bytes};
use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use url::Url;

use crate::proxy::errors::ForwardError;
use crate::proxy::forwarder::{apply_forwarding_headers, outbound_uri, target_addr, ForwardOptions};

/// Largest backend handshake head accepted.
const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Largest body relayed for a refused upgrade.
const MAX_REFUSED_BODY: usize = 1024 * 1024;

/// Headers that never describe the upgraded stream.
const FRAMING_HEADERS: [HeaderName; 2] = [header::CONTENT_LENGTH, header::TRANSFER_ENCODING];

/// The client side of an upgrade: resolves to the raw connection once the
/// handshake response has been written.
pub struct ClientSocket(OnUpgrade);

impl ClientSocket {
    pub fn new(on_upgrade: OnUpgrade) -> Self {
        Self(on_upgrade)
    }

    /// Wait for hyper to hand over the connection.
    pub async fn accept(self) -> Result<TokioIo<Upgraded>, ForwardError> {
        self.0
            .await
            .map(TokioIo::new)
            .map_err(ForwardError::ClientUpgrade)
    }
}

impl fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSocket")
    }
}

/// The backend's answer to a replayed upgrade request.
#[derive(Debug)]
pub struct BackendHandshake {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Bytes received after a `101` head.
    pub leftover: Bytes,
    /// Body of a refused upgrade, already de-framed.
    pub body: Bytes,
    stream: TcpStream,
}

impl BackendHandshake {
    pub fn accepted(&self) -> bool {
        self.status == StatusCode::SWITCHING_PROTOCOLS
    }

    /// Response to send to the client. When the backend switched protocols,
    /// a task pipes both connections until either side closes.
    pub fn into_client_response<F>(self, socket: ClientSocket, on_error: F) -> Response<Body>
    where
        F: FnOnce(ForwardError) + Send + 'static,
    {
        let BackendHandshake {
            status,
            mut headers,
            leftover,
            body,
            stream,
        } = self;
        for name in FRAMING_HEADERS {
            headers.remove(name);
        }

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        if status == StatusCode::SWITCHING_PROTOCOLS {
            tokio::spawn(async move {
                if let Err(err) = pipe(socket, stream, leftover).await {
                    on_error(err);
                }
            });
        }

        response
    }
}

async fn pipe(
    socket: ClientSocket,
    mut backend: TcpStream,
    leftover: Bytes,
) -> Result<(), ForwardError> {
    let mut client = socket.accept().await?;
    if !leftover.is_empty() {
        client.write_all(&leftover).await?;
    }

    let (to_backend, to_client) = tokio::io::copy_bidirectional(&mut client, &mut backend).await?;
    tracing::debug!(to_backend, to_client, "Upgraded connection closed");
    Ok(())
}

/// Connect to `target`, replay the upgrade request and read the answer head.
pub async fn handshake(
    parts: &Parts,
    target: &Url,
    options: &ForwardOptions,
) -> Result<BackendHandshake, ForwardError> {
    let request = handshake_request(parts, target, options)?;
    let (host, port) = target_addr(target)?;

    let connect = TcpStream::connect((host.as_str(), port));
    let mut stream = tokio::time::timeout(options.connect_timeout, connect)
        .await
        .map_err(|_| ForwardError::Timeout(options.connect_timeout))??;
    let _ = stream.set_nodelay(true);
    stream.write_all(&request).await?;

    tokio::time::timeout(options.upstream_timeout, read_head(stream))
        .await
        .map_err(|_| ForwardError::Timeout(options.upstream_timeout))?
}

async fn read_head(mut stream: TcpStream) -> Result<BackendHandshake, ForwardError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ForwardError::Handshake(
                "backend closed the connection before answering".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((status, headers, consumed)) = parse_response_head(&buf)? {
            let after_head = Bytes::copy_from_slice(&buf[consumed..]);
            if status == StatusCode::SWITCHING_PROTOCOLS {
                return Ok(BackendHandshake {
                    status,
                    headers,
                    leftover: after_head,
                    body: Bytes::new(),
                    stream,
                });
            }

            let body = read_refused_body(status, &headers, after_head, &mut stream).await?;
            return Ok(BackendHandshake {
                status,
                headers,
                leftover: Bytes::new(),
                body,
                stream,
            });
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(ForwardError::Handshake("backend handshake head too large".into()));
        }
    }
}

/// Read the body of a non-`101` answer, framed by `Transfer-Encoding`,
/// `Content-Length` or connection close.
async fn read_refused_body(
    status: StatusCode,
    headers: &HeaderMap,
    after_head: Bytes,
    stream: &mut TcpStream,
) -> Result<Bytes, ForwardError> {
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(Bytes::new());
    }

    let mut reader = BufReader::new(std::io::Cursor::new(after_head).chain(stream));
    let chunked = headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());

    let body = if chunked {
        read_chunked(&mut reader).await?
    } else if let Some(len) = content_length {
        if len > MAX_REFUSED_BODY {
            return Err(refused_body_too_large());
        }
        let mut body = vec![0; len];
        reader.read_exact(&mut body).await?;
        body
    } else {
        let mut body = Vec::new();
        (&mut reader)
            .take(MAX_REFUSED_BODY as u64 + 1)
            .read_to_end(&mut body)
            .await?;
        if body.len() > MAX_REFUSED_BODY {
            return Err(refused_body_too_large());
        }
        body
    };
    Ok(Bytes::from(body))
}

async fn read_chunked<R>(reader: &mut R) -> Result<Vec<u8>, ForwardError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        reader.read_line(&mut line).await?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| ForwardError::Handshake(format!("invalid chunk size: {:?}", size)))?;
        if size == 0 {
            break;
        }
        if size > MAX_REFUSED_BODY - body.len() {
            return Err(refused_body_too_large());
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        line.clear();
        reader.read_line(&mut line).await?;
    }

    // Trailers, up to the blank line.
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
    }
    Ok(body)
}

fn refused_body_too_large() -> ForwardError {
    ForwardError::Handshake("refused upgrade body too large".into())
}

/// Serialize the upgrade request for the backend.
///
/// `Connection` and `Upgrade` are kept; the other hop-by-hop headers are not.
pub fn handshake_request(
    parts: &Parts,
    target: &Url,
    options: &ForwardOptions,
) -> Result<Vec<u8>, ForwardError> {
    let uri = outbound_uri(target, &parts.uri)?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let mut headers = parts.headers.clone();
    for name in ["keep-alive", "proxy-connection", "proxy-authorization", "te", "trailer"] {
        headers.remove(name);
    }
    for name in FRAMING_HEADERS {
        headers.remove(name);
    }
    apply_forwarding_headers(&mut headers, parts, target, options)?;

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", parts.method, path).as_bytes());
    for (name, value) in &headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Parse a response head. `Ok(None)` means more bytes are needed; on success
/// the number of bytes the head occupied is returned alongside it.
pub fn parse_response_head(
    buf: &[u8],
) -> Result<Option<(StatusCode, HeaderMap, usize)>, ForwardError> {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..end])
        .map_err(|_| ForwardError::Handshake("backend handshake head is not UTF-8".into()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut fields = status_line.splitn(3, ' ');
    let version = fields.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ForwardError::Handshake(format!("unexpected status line: {}", status_line)));
    }
    let status = fields
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| {
            ForwardError::Handshake(format!("unexpected status line: {}", status_line))
        })?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            headers.append(name, value);
        }
    }

    Ok(Some((status, headers, end + 4)))
}
