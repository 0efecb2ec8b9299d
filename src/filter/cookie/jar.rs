//! Server-side cookie store for managed cookies.
//!
//! # Responsibilities
//! - Accept cookies according to a `CookiePolicy`
//! - Default the domain to the request host and the path to the request
//!   directory
//! - Expire cookies through `Max-Age`/`Expires`; `Max-Age=0` deletes
//! - Select cookies for a URI by domain, path and the secure flag

use std::time::SystemTime;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::message::Cookie;

/// Which cookies a jar accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookiePolicy {
    AcceptAll,
    /// Only cookies whose domain matches the host that set them.
    #[default]
    AcceptOriginalServer,
    AcceptNone,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CookieKey {
    domain: String,
    path: String,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredCookie {
    cookie: Cookie,
    host_only: bool,
    expires_at: Option<SystemTime>,
}

/// Cookies captured on behalf of one session.
#[derive(Debug, Default)]
pub struct CookieJar {
    policy: CookiePolicy,
    cookies: DashMap<CookieKey, StoredCookie>,
}

impl CookieJar {
    pub fn new(policy: CookiePolicy) -> Self {
        Self {
            policy,
            cookies: DashMap::new(),
        }
    }

    pub fn policy(&self) -> CookiePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&self) {
        self.cookies.clear();
    }

    /// Store a cookie received in a response to `uri`. Returns false when
    /// the policy rejected it.
    pub fn store(&self, uri: &Url, mut cookie: Cookie, now: SystemTime) -> bool {
        let host = match uri.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => return false,
        };

        let (domain, host_only) = match cookie.domain.as_deref() {
            Some(domain) => (domain.trim_start_matches('.').to_ascii_lowercase(), false),
            None => (host.clone(), true),
        };

        let accepted = match self.policy {
            CookiePolicy::AcceptAll => true,
            CookiePolicy::AcceptOriginalServer => domain_matches(&host, &domain),
            CookiePolicy::AcceptNone => false,
        };
        if !accepted {
            tracing::debug!(cookie = %cookie.name, host = %host, "Cookie rejected by policy");
            return false;
        }

        let path = match cookie.path.as_deref() {
            Some(path) if path.starts_with('/') => path.to_string(),
            _ => default_path(uri.path()),
        };
        cookie.domain = Some(domain.clone());
        cookie.path = Some(path.clone());

        let key = CookieKey {
            domain,
            path,
            name: cookie.name.clone(),
        };
        let expires_at = cookie.expiry(now);
        if matches!(expires_at, Some(at) if at <= now) {
            self.cookies.remove(&key);
            return true;
        }

        self.cookies.insert(
            key,
            StoredCookie {
                cookie,
                host_only,
                expires_at,
            },
        );
        true
    }

    /// Cookies to send with a request to `uri`, longest path first.
    pub fn cookies_for(&self, uri: &Url, now: SystemTime) -> Vec<Cookie> {
        self.cookies
            .retain(|_, stored| !matches!(stored.expires_at, Some(at) if at <= now));

        let host = match uri.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => return Vec::new(),
        };
        let secure = uri.scheme() == "https";

        let mut selected: Vec<(usize, Cookie)> = self
            .cookies
            .iter()
            .filter(|entry| {
                let key = entry.key();
                let stored = entry.value();
                let domain_ok = if stored.host_only {
                    host == key.domain
                } else {
                    domain_matches(&host, &key.domain)
                };
                domain_ok
                    && path_matches(uri.path(), &key.path)
                    && (secure || !stored.cookie.secure)
            })
            .map(|entry| (entry.key().path.len(), entry.value().cookie.clone()))
            .collect();

        selected.sort_by(|a, b| b.0.cmp(&a.0));
        selected.into_iter().map(|(_, cookie)| cookie).collect()
    }
}

/// RFC 6265 domain matching.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.parse::<std::net::IpAddr>().is_err()
        && host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// RFC 6265 path matching.
pub fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

/// Directory of the request path, used when a cookie names no path.
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_matching_helpers() {
        assert!(domain_matches("www.example.com", "example.com"));
        assert!(!domain_matches("badexample.com", "example.com"));
        assert!(!domain_matches("10.0.0.1", "0.0.1"));
        assert!(path_matches("/app/x", "/app"));
        assert!(path_matches("/app/x", "/app/"));
        assert!(!path_matches("/application", "/app"));
        assert_eq!(default_path("/app/login"), "/app");
        assert_eq!(default_path("/login"), "/");
    }

    #[test]
    fn test_original_server_policy() {
        let jar = CookieJar::new(CookiePolicy::AcceptOriginalServer);
        let now = SystemTime::now();
        let origin = url("http://www.example.com/");
        assert!(jar.store(&origin, Cookie::new("ok", "1").with_domain(".example.com"), now));
        assert!(!jar.store(&origin, Cookie::new("evil", "1").with_domain("other.org"), now));
        assert_eq!(jar.len(), 1);

        let sent = jar.cookies_for(&url("http://api.example.com/x"), now);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, "ok");
    }

    #[test]
    fn test_host_only_path_and_secure() {
        let jar = CookieJar::new(CookiePolicy::AcceptAll);
        let now = SystemTime::now();
        let origin = url("https://example.com/app/login");
        jar.store(&origin, Cookie::new("sid", "a"), now);
        jar.store(&origin, Cookie::new("tls", "b").with_path("/").with_secure(true), now);

        let names = |u: &str| -> Vec<String> {
            jar.cookies_for(&url(u), now).into_iter().map(|c| c.name).collect()
        };
        assert_eq!(names("https://example.com/app/home"), vec!["sid", "tls"]);
        assert_eq!(names("http://example.com/app/home"), vec!["sid"]);
        assert!(names("https://sub.example.com/app/home").is_empty());
        assert_eq!(names("https://example.com/other"), vec!["tls"]);
    }

    #[test]
    fn test_expiry_and_deletion() {
        let jar = CookieJar::new(CookiePolicy::AcceptAll);
        let now = SystemTime::now();
        let origin = url("http://example.com/");
        jar.store(&origin, Cookie::new("short", "1").with_max_age(10), now);
        jar.store(&origin, Cookie::new("gone", "1"), now);
        jar.store(&origin, Cookie::new("gone", "").with_max_age(0), now);
        assert_eq!(jar.len(), 1);

        let later = now + Duration::from_secs(11);
        assert!(jar.cookies_for(&origin, later).is_empty());
        assert!(jar.is_empty());
    }

    #[test]
    fn test_huge_max_age_is_kept() {
        let jar = CookieJar::new(CookiePolicy::AcceptAll);
        let now = SystemTime::now();
        let origin = url("http://example.com/");
        assert!(jar.store(&origin, Cookie::new("SID", "x").with_max_age(i64::MAX), now));

        let sent = jar.cookies_for(&origin, now + Duration::from_secs(86_400 * 365));
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn test_accept_none() {
        let jar = CookieJar::new(CookiePolicy::AcceptNone);
        assert!(!jar.store(&url("http://example.com/"), Cookie::new("a", "1"), SystemTime::now()));
        assert!(jar.is_empty());
    }
}
