//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact match, case-insensitive)
//! - Match path prefix (case-sensitive)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - The `Host` header wins over the URI host, since the URI may already
//!   point at the connection address
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)

use axum::http::header::HOST;

use crate::message::headers::split_host_port;
use crate::message::Request;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request) -> bool;
}

/// Matches the requested host, ignoring any port.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    /// IPv6 literals may be given with or without brackets.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: unbracket(&host.into()).to_lowercase(),
        }
    }
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request) -> bool {
        let header_host = req
            .headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(|h| split_host_port(h).0);

        match header_host.or_else(|| req.uri.host_str()) {
            Some(host) => unbracket(host).eq_ignore_ascii_case(&self.expected_host),
            None => false,
        }
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request) -> bool {
        req.uri.path().starts_with(&self.prefix)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Method};

    fn request(uri: &str, host: Option<&'static str>) -> Request {
        let mut req = Request::from_uri(Method::GET, uri).unwrap();
        if let Some(host) = host {
            req.headers.insert(HOST, HeaderValue::from_static(host));
        }
        req
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");

        assert!(matcher.matches(&request("http://127.0.0.1/", Some("example.com"))));
        assert!(matcher.matches(&request("http://127.0.0.1/", Some("EXAMPLE.COM:8080"))));
        assert!(matcher.matches(&request("http://example.com/", None)));
        assert!(!matcher.matches(&request("http://example.com/", Some("other.com"))));
    }

    #[test]
    fn test_host_matcher_ipv6() {
        let matcher = HostMatcher::new("::1");

        assert!(matcher.matches(&request("http://127.0.0.1/", Some("[::1]"))));
        assert!(matcher.matches(&request("http://127.0.0.1/", Some("[::1]:8080"))));
        assert!(matcher.matches(&request("http://[::1]:8080/", None)));
        assert!(HostMatcher::new("[::1]").matches(&request("http://127.0.0.1/", Some("[::1]"))));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");

        assert!(matcher.matches(&request("http://example.com/api/v1", None)));
        assert!(!matcher.matches(&request("http://example.com/images", None)));
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::new(vec![
            Box::new(HostMatcher::new("example.com")),
            Box::new(PathPrefixMatcher::new("/api")),
        ]);
        assert!(matcher.matches(&request("http://example.com/api/x", None)));
        assert!(!matcher.matches(&request("http://example.com/web", None)));
        assert!(AndMatcher::new(Vec::new()).matches(&request("http://a/", None)));
    }
}
