//! Handler answering every request with the same response.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::context::Context;
use crate::handler::{Handler, ResponsePromise};
use crate::message::{Request, Response};
use crate::promise::Promise;

/// Builds a fresh copy of a fixed response for each request.
#[derive(Debug, Clone)]
pub struct StaticResponseHandler {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl StaticResponseHandler {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn build(&self) -> Response {
        let mut response = Response::new(self.status);
        response.reason = self.reason.clone();
        response.headers = self.headers.clone();
        if let Some(body) = &self.body {
            response.set_bytes(body.clone());
        }
        response
    }
}

impl Handler for StaticResponseHandler {
    fn handle(&self, _context: Context, _request: Request) -> ResponsePromise {
        Promise::result(self.build())
    }
}
