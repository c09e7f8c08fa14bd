//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (policy lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched ProxyPolicy or None
//!
//! Route Compilation (startup and every reload):
//!     RouteConfig[]
//!     → ProxyPolicy per route (endpoint resolved, strategy built)
//!     → Sort by priority
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use router::Router;
