//! Replays a login form when the user agent lands on an upstream login page.
//!
//! # Data Flow
//! ```text
//! request ── login page by request? ──yes, nothing to extract──→ login request
//!    │ no / extractions configured
//!    ▼
//! next.handle(original)
//!    → login page by request, or body matches the content marker?
//!         no  → original response
//!         yes → extract values into AttributesContext
//!             → [credentials filter] → login request → its response
//! ```
//!
//! # Design Decisions
//! - The login request is a fresh `Request` resolved against the original URI,
//!   carrying the original `Host`, `Cookie` and `User-Agent` headers
//! - Form values are expressions, so they can read attributes extracted from
//!   the login page (hidden fields, CSRF tokens)
//! - A body that cannot be decoded is treated as "not a login page"

use std::sync::Arc;

use axum::http::header::{CONTENT_TYPE, COOKIE, HOST, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue, Method};
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::context::{AttributesContext, Context};
use crate::error::GatewayError;
use crate::handler::{Condition, Expression, Filter, Handler, Next, ResponsePromise};
use crate::message::{Request, Response};
use crate::promise::{CancelToken, Promise};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A value pulled out of the login page with the first capture group of
/// `pattern` and stored as attribute `name`.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub name: String,
    pub pattern: Regex,
}

/// The request sent to authenticate the user agent.
#[derive(Clone)]
pub struct LoginRequest {
    pub method: Method,
    /// Absolute, or relative to the intercepted request's URI.
    pub uri: String,
    pub form: Vec<(String, Expression<String>)>,
}

impl LoginRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            form: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Expression<String>) -> Self {
        self.form.push((name.into(), value));
        self
    }

    fn build(
        &self,
        context: &Context,
        original_uri: &Url,
        original_headers: &HeaderMap,
    ) -> Result<Request, GatewayError> {
        let uri = original_uri
            .join(&self.uri)
            .map_err(|e| GatewayError::Internal(format!("invalid login URI {}: {}", self.uri, e)))?;
        let mut request = Request::new(self.method.clone(), uri);
        for name in [HOST, COOKIE, USER_AGENT] {
            for value in original_headers.get_all(&name) {
                request.headers.append(name.clone(), value.clone());
            }
        }

        let mut fields = Vec::with_capacity(self.form.len());
        for (name, value) in &self.form {
            let value = value.evaluate(context, &request).ok_or_else(|| {
                GatewayError::Internal(format!("login form field {} has no value", name))
            })?;
            fields.push((name.as_str(), value));
        }

        if self.method == Method::GET || self.method == Method::HEAD {
            if !fields.is_empty() {
                request.uri.query_pairs_mut().extend_pairs(fields);
            }
        } else {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields)
                .finish();
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
            request.set_bytes(body);
        }
        Ok(request)
    }
}

/// An expression over `template` where each `{name}` is replaced by the
/// string attribute `name`; `None` if a referenced attribute is missing.
pub fn attribute_template(template: &str) -> Expression<String> {
    let template = template.to_string();
    Expression::new(move |context: &Context, _: &Request| {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find('{') {
            let end = start + rest[start..].find('}')?;
            rendered.push_str(&rest[..start]);
            let name = &rest[start + 1..end];
            let value = context.as_context::<AttributesContext>().ok()?.get(name)?;
            match value {
                Value::String(s) => rendered.push_str(&s),
                other => rendered.push_str(&other.to_string()),
            }
            rest = &rest[end + 1..];
        }
        rendered.push_str(rest);
        Some(rendered)
    })
}

struct Inner {
    login_page: Option<Condition>,
    content_marker: Option<Regex>,
    extractions: Vec<Extraction>,
    login: LoginRequest,
    credentials: Option<Arc<dyn Filter>>,
}

/// Detects an upstream login page and answers it by sending the login form.
#[derive(Clone)]
pub struct PasswordReplayFilter {
    inner: Arc<Inner>,
}

impl PasswordReplayFilter {
    pub fn new(login: LoginRequest) -> Self {
        Self {
            inner: Arc::new(Inner {
                login_page: None,
                content_marker: None,
                extractions: Vec::new(),
                login,
                credentials: None,
            }),
        }
    }

    fn update(self, f: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => Inner {
                login_page: shared.login_page.clone(),
                content_marker: shared.content_marker.clone(),
                extractions: shared.extractions.clone(),
                login: shared.login.clone(),
                credentials: shared.credentials.clone(),
            },
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Recognise the login page from the request alone.
    pub fn with_login_page(self, condition: Condition) -> Self {
        self.update(|inner| inner.login_page = Some(condition))
    }

    /// Recognise the login page by a pattern in the response body.
    pub fn with_content_marker(self, marker: Regex) -> Self {
        self.update(|inner| inner.content_marker = Some(marker))
    }

    pub fn with_extraction(self, name: impl Into<String>, pattern: Regex) -> Self {
        let extraction = Extraction {
            name: name.into(),
            pattern,
        };
        self.update(|inner| inner.extractions.push(extraction))
    }

    /// Run `filter` in front of the login request, e.g. to look up the
    /// user's credentials.
    pub fn with_credentials_filter(self, filter: Arc<dyn Filter>) -> Self {
        self.update(|inner| inner.credentials = Some(filter))
    }
}

impl Inner {
    async fn replay(
        &self,
        context: Context,
        uri: &Url,
        headers: &HeaderMap,
        next: Next,
        cancel: CancelToken,
    ) -> Result<Response, GatewayError> {
        let login = self.login.build(&context, uri, headers)?;
        tracing::debug!(login_uri = %login.uri, "Replaying login form");
        let promise = match &self.credentials {
            Some(credentials) => credentials.filter(context, login, next),
            None => next.handle(context, login),
        };
        promise.linked_to(cancel).await
    }

    fn extract(&self, context: &Context, body: &str) -> Result<(), GatewayError> {
        let attributes = context.as_context::<AttributesContext>()?;
        for extraction in &self.extractions {
            match extraction.pattern.captures(body).and_then(|c| c.get(1)) {
                Some(found) => {
                    attributes.insert(
                        extraction.name.clone(),
                        Value::String(found.as_str().to_string()),
                    );
                }
                None => {
                    tracing::debug!(attribute = %extraction.name, "Login page value not found");
                }
            }
        }
        Ok(())
    }
}

impl Filter for PasswordReplayFilter {
    fn filter(&self, mut context: Context, request: Request, next: Next) -> ResponsePromise {
        let inner = self.inner.clone();
        let is_login_page = inner
            .login_page
            .as_ref()
            .is_some_and(|condition| condition.evaluate(&context, &request));

        if inner.login_page.is_none() && inner.content_marker.is_none() {
            return next.handle(context, request);
        }

        let token = CancelToken::new();
        let cancel = token.clone();
        Promise::with_token(
            async move {
                let uri = request.uri.clone();
                let headers = request.headers.clone();

                if is_login_page && inner.extractions.is_empty() {
                    return inner.replay(context, &uri, &headers, next, cancel).await;
                }

                let mut response = next
                    .handle(context.clone(), request)
                    .linked_to(cancel.clone())
                    .await?;

                let needs_body = !is_login_page || !inner.extractions.is_empty();
                let body = if needs_body {
                    match response.get_string(None).await {
                        Ok(body) => body,
                        Err(e) => {
                            tracing::debug!(error = %e, "Response body not inspectable");
                            return Ok(response);
                        }
                    }
                } else {
                    String::new()
                };

                let detected = is_login_page
                    || inner
                        .content_marker
                        .as_ref()
                        .is_some_and(|marker| marker.is_match(&body));
                if !detected {
                    return Ok(response);
                }

                if !inner.extractions.is_empty() {
                    if !context.contains_context::<AttributesContext>() {
                        context = context.push(AttributesContext::new());
                    }
                    inner.extract(&context, &body)?;
                }
                response.entity.close();
                inner.replay(context, &uri, &headers, next, cancel).await
            },
            token,
        )
    }
}
