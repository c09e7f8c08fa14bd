//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper auto connection, HTTP/1.1 + h2c)
//!     ├─ upgrade request → listener upgrade event → websocket.rs
//!     └─ plain request → request.rs (request ID) → Axum router
//!                      → proxy policy → response.rs (ResponseWriter)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{is_upgrade_request, X_REQUEST_ID};
pub use response::{PendingResponse, ResponseWriter};
pub use server::HttpServer;
pub use websocket::ClientSocket;
