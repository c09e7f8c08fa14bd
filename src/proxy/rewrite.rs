//! Request rewriting applied before a request is forwarded.
//!
//! Policies accept any [`PathRewrite`]; the configured one is a prefix map.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::{request::Parts, uri::PathAndQuery, Uri};

/// Rewrites the request target in place.
pub trait PathRewrite: Send + Sync + fmt::Debug {
    fn rewrite(&self, parts: &mut Parts);
}

/// Leaves requests untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewrite;

impl PathRewrite for NoRewrite {
    fn rewrite(&self, _parts: &mut Parts) {}
}

/// Replaces the first matching path prefix.
///
/// Rules are tried longest prefix first. The query string is preserved.
#[derive(Debug, Clone, Default)]
pub struct PrefixRewrite {
    rules: Vec<(String, String)>,
}

impl PrefixRewrite {
    pub fn new(rules: &BTreeMap<String, String>) -> Self {
        let mut rules: Vec<_> = rules
            .iter()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rewrite_path(&self, path: &str) -> Option<String> {
        self.rules.iter().find_map(|(from, to)| {
            path.strip_prefix(from.as_str()).map(|rest| {
                let rewritten = format!("{}{}", to, rest);
                if rewritten.starts_with('/') {
                    rewritten
                } else {
                    format!("/{}", rewritten)
                }
            })
        })
    }
}

impl PathRewrite for PrefixRewrite {
    fn rewrite(&self, parts: &mut Parts) {
        let Some(path) = self.rewrite_path(parts.uri.path()) else {
            return;
        };
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };

        let mut uri_parts = parts.uri.clone().into_parts();
        match PathAndQuery::try_from(path_and_query.as_str()) {
            Ok(pq) => uri_parts.path_and_query = Some(pq),
            Err(e) => {
                tracing::debug!(
                    uri = %parts.uri,
                    error = %e,
                    "Path rewrite produced an invalid path"
                );
                return;
            }
        }
        if let Ok(uri) = Uri::from_parts(uri_parts) {
            tracing::trace!(from = %parts.uri, to = %uri, "Path rewritten");
            parts.uri = uri;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str) -> Parts {
        Request::builder().uri(uri).body(()).unwrap().into_parts().0
    }

    fn rewrite(rules: &[(&str, &str)]) -> PrefixRewrite {
        PrefixRewrite::new(
            &rules
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        )
    }

    #[test]
    fn strips_prefix_and_keeps_query() {
        let mut p = parts("/api/items?page=2");
        rewrite(&[("/api", "")]).rewrite(&mut p);
        assert_eq!(p.uri, "/items?page=2");
    }

    #[test]
    fn stripping_everything_leaves_root() {
        let mut p = parts("/api");
        rewrite(&[("/api", "")]).rewrite(&mut p);
        assert_eq!(p.uri.path(), "/");
    }

    #[test]
    fn longest_prefix_wins() {
        let rules = rewrite(&[("/api", "/v1"), ("/api/legacy", "/old")]);
        let mut p = parts("/api/legacy/users");
        rules.rewrite(&mut p);
        assert_eq!(p.uri.path(), "/old/users");
    }

    #[test]
    fn unmatched_paths_are_untouched() {
        let mut p = parts("/static/app.js");
        rewrite(&[("/api", "")]).rewrite(&mut p);
        assert_eq!(p.uri, "/static/app.js");

        let mut p = parts("/static/app.js");
        NoRewrite.rewrite(&mut p);
        assert_eq!(p.uri, "/static/app.js");
    }
}
