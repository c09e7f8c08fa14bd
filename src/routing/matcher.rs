//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive, port ignored)
//! - Match path prefix (case-sensitive)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Matchers inspect `request::Parts` so plain requests and upgrade
//!   requests (whose body is never read) go through the same rules
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::http::{header, request::Parts};

use crate::config::RouteConfig;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, parts: &Parts) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()));

        host.map(|h| {
            let h = h.to_lowercase();
            h == self.expected_host || unbracket(strip_port(&h)) == unbracket(&self.expected_host)
        })
        .unwrap_or(false)
    }
}

/// Host without its `:port` suffix. Bracketed IPv6 literals keep their colons.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

fn unbracket(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        parts.uri.path().starts_with(&self.prefix)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    /// Compile the conditions of a route.
    pub fn from_route(route: &RouteConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &route.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }
        if let Some(prefix) = &route.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
        }
        Self::new(matchers)
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(parts))
    }
}
