//! Request message.
//!
//! # Responsibilities
//! - Method, mutable target URI, protocol version, headers and entity
//! - Cookie view computed on demand from the `Cookie` headers
//! - Independent copies for filters that send a request more than once

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, Method, Version};
use url::Url;

use crate::entity::{Entity, EntityError};
use crate::message::cookie::{Cookie, CookieHeader};
use crate::message::headers::all_values;

/// An HTTP request flowing through the pipeline.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Absolute target URI; components may be changed independently.
    pub uri: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub entity: Entity,
}

impl Request {
    pub fn new(method: Method, uri: Url) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            entity: Entity::empty(),
        }
    }

    /// Build a request from a textual URI.
    pub fn from_uri(method: Method, uri: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, Url::parse(uri)?))
    }

    /// Cookies sent by the user agent, in header order.
    pub fn cookies(&self) -> Vec<Cookie> {
        all_values(&self.headers, &COOKIE)
            .iter()
            .flat_map(|value| CookieHeader::parse(value).cookies())
            .collect()
    }

    /// First cookie named `name` (case-insensitive).
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies()
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// A copy with its own entity holding the remaining body bytes.
    ///
    /// The body is read under a branch, so this request stays positioned
    /// where it was.
    pub async fn try_copy(&mut self) -> Result<Request, EntityError> {
        Ok(Request {
            method: self.method.clone(),
            uri: self.uri.clone(),
            version: self.version,
            headers: self.headers.clone(),
            entity: self.entity.try_copy().await?,
        })
    }
}

crate::message::entity_accessors!(Request);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_view_spans_headers() {
        let mut req = Request::from_uri(Method::GET, "http://example.com/").unwrap();
        req.headers.append(COOKIE, HeaderValue::from_static("a=1; b=2"));
        req.headers.append(COOKIE, HeaderValue::from_static("c=3"));

        let names: Vec<_> = req.cookies().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(req.cookie("B").unwrap().value, "2");
    }

    #[test]
    fn test_uri_components_are_mutable() {
        let mut req = Request::from_uri(Method::GET, "http://example.com/app?x=1").unwrap();
        req.uri.set_host(Some("upstream.internal")).unwrap();
        req.uri.set_port(Some(8080)).unwrap();
        assert_eq!(req.uri.as_str(), "http://upstream.internal:8080/app?x=1");
    }

    #[tokio::test]
    async fn test_copy_leaves_original_readable() {
        let mut req = Request::from_uri(Method::POST, "http://example.com/login").unwrap();
        req.set_string("user=bjensen").unwrap();

        let mut copy = req.try_copy().await.unwrap();
        assert_eq!(copy.get_string(None).await.unwrap(), "user=bjensen");
        assert_eq!(req.get_string(None).await.unwrap(), "user=bjensen");
        assert_eq!(copy.method, Method::POST);
    }
}
