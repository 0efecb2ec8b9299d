//! Cookie management filter.
//!
//! # Data Flow
//! ```text
//! request:  Cookie header
//!     → drop SUPPRESS and MANAGE pairs (with their $Path/$Domain tokens)
//!     → add the session jar's cookies for the effective URI
//!     → next
//! response: Set-Cookie / Set-Cookie2
//!     → MANAGE cookies stored in the jar
//!     → SUPPRESS and MANAGE cookies removed, RELAY cookies passed on
//! ```
//!
//! # Design Decisions
//! - Every cookie name falls in exactly one of MANAGE, SUPPRESS or RELAY:
//!   the explicit name sets first, then the default action
//! - The jar lives in the session and is created through
//!   `get_or_insert_with`, so concurrent requests of one user agent share a
//!   single jar
//! - The effective URI takes host and port from the `Host` header when it
//!   parses, and falls back to the connection URI otherwise

pub mod jar;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::header::{COOKIE, HOST, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::context::Context;
use crate::error::GatewayError;
use crate::handler::{Filter, Handler, Next, ResponsePromise};
use crate::message::cookie::{parse_set_cookie, set_cookie_name, split_set_cookie2};
use crate::message::headers::{all_values, first_value, split_host_port};
use crate::message::{CookieHeader, Request, Response};
use crate::promise::Promise;
use crate::session::{SessionContext, SessionValue};

pub use jar::{CookieJar, CookiePolicy};

/// Session key holding the jar.
pub const JAR_KEY: &str = "cookie-filter:jar";

const SET_COOKIE2: HeaderName = HeaderName::from_static("set-cookie2");

/// What the filter does with a cookie of a given name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieAction {
    /// Kept server-side in the session jar, never shown to the user agent.
    #[default]
    Manage,
    /// Removed in both directions.
    Suppress,
    /// Passed through untouched.
    Relay,
}

/// Intercepts, suppresses or relays cookies by name.
#[derive(Debug, Clone)]
pub struct CookieFilter {
    managed: HashSet<String>,
    suppressed: HashSet<String>,
    relayed: HashSet<String>,
    default_action: CookieAction,
    policy: CookiePolicy,
}

impl CookieFilter {
    pub fn new(default_action: CookieAction, policy: CookiePolicy) -> Self {
        Self {
            managed: HashSet::new(),
            suppressed: HashSet::new(),
            relayed: HashSet::new(),
            default_action,
            policy,
        }
    }

    pub fn managing<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.managed.extend(names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()));
        self
    }

    pub fn suppressing<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.suppressed.extend(names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()));
        self
    }

    pub fn relaying<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.relayed.extend(names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()));
        self
    }

    /// Classify a cookie name (case-insensitive).
    pub fn action(&self, name: &str) -> CookieAction {
        let name = name.to_ascii_lowercase();
        if self.managed.contains(&name) {
            CookieAction::Manage
        } else if self.suppressed.contains(&name) {
            CookieAction::Suppress
        } else if self.relayed.contains(&name) {
            CookieAction::Relay
        } else {
            self.default_action
        }
    }

    fn jar(&self, context: &Context) -> Result<Arc<CookieJar>, GatewayError> {
        let session = &context.as_context::<SessionContext>()?.session;
        let policy = self.policy;
        let value = session.get_or_insert_with(JAR_KEY, &mut || -> SessionValue {
            Arc::new(CookieJar::new(policy))
        });
        value
            .downcast::<CookieJar>()
            .map_err(|_| GatewayError::Internal(format!("session key {} does not hold a cookie jar", JAR_KEY)))
    }

    /// Rewrite the request `Cookie` headers: relayed pairs stay, jar
    /// cookies are appended, everything is sent as one header.
    fn rewrite_request(&self, headers: &mut HeaderMap, jar: &CookieJar, uri: &Url, now: SystemTime) {
        let mut header = CookieHeader::default();
        for value in all_values(headers, &COOKIE) {
            header.merge(CookieHeader::parse(&value));
        }
        header.retain(|pair| self.action(&pair.name) == CookieAction::Relay);

        for cookie in jar.cookies_for(uri, now) {
            if self.action(&cookie.name) == CookieAction::Manage {
                header.push(&cookie.name, &cookie.value);
            }
        }

        headers.remove(COOKIE);
        let value = match header.to_header_value() {
            Some(value) => value,
            None => return,
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Dropping unrepresentable Cookie header"),
        }
    }

    /// Capture managed cookies and strip non-relayed ones from the response.
    fn rewrite_response(&self, headers: &mut HeaderMap, jar: &CookieJar, uri: &Url, now: SystemTime) {
        let mut kept: Vec<HeaderValue> = Vec::new();
        for value in all_values(headers, &SET_COOKIE) {
            let name = match set_cookie_name(&value) {
                Some(name) => name,
                None => continue,
            };
            match self.action(name) {
                CookieAction::Relay => {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        kept.push(value);
                    }
                }
                CookieAction::Manage => {
                    if let Some(cookie) = parse_set_cookie(&value) {
                        tracing::debug!(cookie = %cookie.name, "Capturing managed cookie");
                        jar.store(uri, cookie, now);
                    }
                }
                CookieAction::Suppress => {
                    tracing::debug!(cookie = %name, "Suppressing response cookie");
                }
            }
        }
        headers.remove(SET_COOKIE);
        for value in kept {
            headers.append(SET_COOKIE, value);
        }

        let mut kept2: Vec<String> = Vec::new();
        for value in all_values(headers, &SET_COOKIE2) {
            for element in split_set_cookie2(&value) {
                let name = match set_cookie_name(&element) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                match self.action(&name) {
                    CookieAction::Relay => kept2.push(element),
                    CookieAction::Manage => {
                        if let Some(cookie) = parse_set_cookie(&element) {
                            jar.store(uri, cookie, now);
                        }
                    }
                    CookieAction::Suppress => {}
                }
            }
        }
        headers.remove(SET_COOKIE2);
        if !kept2.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&kept2.join(", ")) {
                headers.insert(SET_COOKIE2, value);
            }
        }
    }
}

impl Filter for CookieFilter {
    fn filter(&self, context: Context, mut request: Request, next: Next) -> ResponsePromise {
        let jar = match self.jar(&context) {
            Ok(jar) => jar,
            Err(e) => return Promise::exception(e),
        };
        let uri = effective_uri(&request);
        self.rewrite_request(&mut request.headers, &jar, &uri, SystemTime::now());

        let filter = self.clone();
        next.handle(context, request).map(move |mut response: Response| {
            filter.rewrite_response(&mut response.headers, &jar, &uri, SystemTime::now());
            response
        })
    }
}

/// Request URI with host and port taken from the `Host` header when valid.
pub fn effective_uri(request: &Request) -> Url {
    let host_header = match first_value(&request.headers, &HOST) {
        Some(host) => host,
        None => return request.uri.clone(),
    };
    let (host, port) = split_host_port(host_header);

    let mut uri = request.uri.clone();
    let port = match port {
        Some(port) => match port.parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => return request.uri.clone(),
        },
        None => None,
    };
    if uri.set_host(Some(host)).is_err() || uri.set_port(port).is_err() {
        return request.uri.clone();
    }
    uri
}
