//! Caller origin authorization and the CORS headers that go with it
//!
//! Matching is exact and case-sensitive. A wildcard is never emitted:
//! allowed callers get their own origin reflected back, denied callers get
//! the first allow-list entry, which tells them nothing about themselves.

use std::sync::Arc;

pub const ALLOW_HEADERS: &str = "Content-Type,Origin,Accept";
pub const ALLOW_METHODS: &str = "GET,OPTIONS";
pub const MAX_AGE_SECS: &str = "300";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    Allowed,
    Denied,
}

/// `Allowed` iff `origin` is present and an exact member of `allow_list`.
pub fn check(origin: Option<&str>, allow_list: &[String]) -> OriginDecision {
    match origin {
        Some(origin) if allow_list.iter().any(|allowed| allowed == origin) => {
            OriginDecision::Allowed
        }
        _ => OriginDecision::Denied,
    }
}

/// The CORS header set for a response to `origin`.
pub fn cors_headers(origin: Option<&str>, allow_list: &[String]) -> Vec<(&'static str, String)> {
    let allow_origin = match (check(origin, allow_list), origin) {
        (OriginDecision::Allowed, Some(origin)) => Some(origin.to_string()),
        _ => allow_list.first().cloned(),
    };

    let mut headers = Vec::with_capacity(5);
    if let Some(value) = allow_origin {
        headers.push(("access-control-allow-origin", value));
        headers.push(("vary", "Origin".to_string()));
    }
    headers.push(("access-control-allow-headers", ALLOW_HEADERS.to_string()));
    headers.push(("access-control-allow-methods", ALLOW_METHODS.to_string()));
    headers.push(("access-control-max-age", MAX_AGE_SECS.to_string()));
    headers
}

/// The deployment's allow-list, shared read-only across requests.
#[derive(Debug, Clone)]
pub struct OriginGuard {
    allow_list: Arc<[String]>,
}

impl OriginGuard {
    pub fn new(allow_list: Vec<String>) -> Self {
        Self {
            allow_list: allow_list.into(),
        }
    }

    pub fn check(&self, origin: Option<&str>) -> OriginDecision {
        check(origin, &self.allow_list)
    }

    pub fn cors_headers(&self, origin: Option<&str>) -> Vec<(&'static str, String)> {
        cors_headers(origin, &self.allow_list)
    }
}
