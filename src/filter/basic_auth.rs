//! HTTP Basic authentication towards the upstream.
//!
//! # Data Flow
//! ```text
//! request (inbound Authorization removed)
//!     → cached credentials from the session, if any → next
//!     → 401? → fetch username/password → cache → retry once with a copy
//!     → still 401, or no credentials → failure handler
//! response: WWW-Authenticate removed
//! ```
//!
//! # Design Decisions
//! - The request body is copied under a branch before the first attempt, so
//!   the retry sends exactly the same content
//! - At most one retry per exchange; a failed retry clears the cache
//! - A username containing `:` cannot be encoded and yields a 500

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

use crate::context::Context;
use crate::error::GatewayError;
use crate::handler::{Expression, Filter, Handler, Next, ResponsePromise};
use crate::message::{Request, Response};
use crate::promise::{CancelToken, Promise};
use crate::session::{Session, SessionContext};

const SESSION_KEY_PREFIX: &str = "basic-auth:";

struct Inner {
    username: Expression<String>,
    password: Expression<String>,
    failure_handler: Arc<dyn Handler>,
    cache_header: bool,
}

/// Authenticates upstream requests with HTTP Basic credentials.
#[derive(Clone)]
pub struct HttpBasicAuthFilter {
    inner: Arc<Inner>,
}

impl HttpBasicAuthFilter {
    pub fn new(
        username: Expression<String>,
        password: Expression<String>,
        failure_handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                username,
                password,
                failure_handler,
                cache_header: true,
            }),
        }
    }

    /// Whether encoded credentials are kept in the session between requests.
    pub fn with_cache_header(self, cache_header: bool) -> Self {
        let inner = Inner {
            username: self.inner.username.clone(),
            password: self.inner.password.clone(),
            failure_handler: self.inner.failure_handler.clone(),
            cache_header,
        };
        Self {
            inner: Arc::new(inner),
        }
    }
}

/// `base64(username:password)`, or `None` if the username contains `:`.
pub fn encode_credentials(username: &str, password: &str) -> Option<String> {
    if username.contains(':') {
        return None;
    }
    Some(BASE64_STANDARD.encode(format!("{}:{}", username, password)))
}

fn session_key(request: &Request) -> String {
    format!(
        "{}{}:{}",
        SESSION_KEY_PREFIX,
        request.uri.host_str().unwrap_or_default(),
        request.uri.port_or_known_default().unwrap_or_default()
    )
}

fn authorize(request: &mut Request, encoded: &str) -> Result<(), GatewayError> {
    let value = HeaderValue::from_str(&format!("Basic {}", encoded))
        .map_err(|e| GatewayError::Internal(format!("invalid Authorization header: {}", e)))?;
    request.headers.insert(AUTHORIZATION, value);
    Ok(())
}

fn strip_challenge(mut response: Response) -> Response {
    response.headers.remove(WWW_AUTHENTICATE);
    response
}

impl Filter for HttpBasicAuthFilter {
    fn filter(&self, context: Context, mut request: Request, next: Next) -> ResponsePromise {
        request.headers.remove(AUTHORIZATION);

        let inner = self.inner.clone();
        let token = CancelToken::new();
        let cancel = token.clone();

        Promise::with_token(
            async move {
                let session: Option<Arc<dyn Session>> = if inner.cache_header {
                    context
                        .as_context::<SessionContext>()
                        .ok()
                        .map(|found| found.session.clone())
                } else {
                    None
                };
                let key = session_key(&request);

                if let Some(cached) = session.as_ref().and_then(|s| s.get_as::<String>(&key)) {
                    authorize(&mut request, &cached)?;
                }

                let mut retry = request.try_copy().await?;
                let first = next
                    .handle(context.clone(), request)
                    .linked_to(cancel.clone())
                    .await?;
                if first.status != StatusCode::UNAUTHORIZED {
                    return Ok(strip_challenge(first));
                }

                let credentials = (
                    inner.username.evaluate(&context, &retry),
                    inner.password.evaluate(&context, &retry),
                );
                let (username, password) = match credentials {
                    (Some(username), Some(password)) => (username, password),
                    _ => {
                        tracing::warn!("No basic auth credentials available");
                        if let Some(session) = &session {
                            session.remove(&key);
                        }
                        return inner
                            .failure_handler
                            .handle(context, retry)
                            .linked_to(cancel)
                            .await;
                    }
                };

                let encoded = match encode_credentials(&username, &password) {
                    Some(encoded) => encoded,
                    None => {
                        tracing::error!("Basic auth username contains ':'");
                        return Ok(Response::new_internal_server_error_with_cause(
                            GatewayError::Internal("username must not contain ':'".into()),
                        ));
                    }
                };
                if let Some(session) = &session {
                    session.put(&key, Arc::new(encoded.clone()));
                }

                authorize(&mut retry, &encoded)?;
                let mut for_failure = retry.try_copy().await?;
                for_failure.headers.remove(AUTHORIZATION);

                let second = next
                    .handle(context.clone(), retry)
                    .linked_to(cancel.clone())
                    .await?;
                if second.status != StatusCode::UNAUTHORIZED {
                    return Ok(strip_challenge(second));
                }

                tracing::warn!(user = %username, "Upstream rejected basic auth credentials");
                if let Some(session) = &session {
                    session.remove(&key);
                }
                inner
                    .failure_handler
                    .handle(context, for_failure)
                    .linked_to(cancel)
                    .await
            },
            token,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, StaticResponseHandler};
    use crate::session::{InMemorySessionManager, SessionManager};
    use axum::http::Method;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(Option<String>, String)>>>;

    /// Answers 401 unless the Authorization header equals `accept`.
    fn upstream(seen: Seen, accept: Option<&'static str>) -> Next {
        Next::to(Arc::new(handler_fn(move |_, mut request: Request| {
            let seen = seen.clone();
            Promise::from_future(async move {
                let auth = request
                    .headers
                    .get(AUTHORIZATION)
                    .map(|v| v.to_str().unwrap().to_string());
                let body = request.get_string(None).await?;
                seen.lock().unwrap().push((auth.clone(), body));

                if auth.is_some() && auth.as_deref() == accept {
                    Ok(Response::default())
                } else {
                    let mut response = Response::new(StatusCode::UNAUTHORIZED);
                    response
                        .headers
                        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"x\""));
                    Ok(response)
                }
            })
        })))
    }

    fn filter(username: &'static str) -> HttpBasicAuthFilter {
        HttpBasicAuthFilter::new(
            Expression::constant(username.to_string()),
            Expression::constant("pass".to_string()),
            Arc::new(StaticResponseHandler::new(StatusCode::FORBIDDEN).with_body("login page")),
        )
    }

    fn context() -> Context {
        let manager = InMemorySessionManager::default();
        let request = Request::from_uri(Method::GET, "http://example.com/").unwrap();
        Context::root().push(SessionContext::new(manager.load(&request).unwrap()))
    }

    fn request() -> Request {
        let mut request = Request::from_uri(Method::POST, "http://upstream:8080/api").unwrap();
        request.set_string("payload").unwrap();
        request
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Basic client-supplied"));
        request
    }

    #[test]
    fn test_encoding() {
        assert_eq!(encode_credentials("user", "pass").as_deref(), Some("dXNlcjpwYXNz"));
        assert!(encode_credentials("us:er", "pass").is_none());
    }

    #[tokio::test]
    async fn test_retry_once_with_same_body() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let response = filter("user")
            .filter(context(), request(), upstream(seen.clone(), Some("Basic dXNlcjpwYXNz")))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (None, "payload".to_string()));
        assert_eq!(
            seen[1],
            (Some("Basic dXNlcjpwYXNz".to_string()), "payload".to_string())
        );
    }

    #[tokio::test]
    async fn test_cached_credentials_skip_the_challenge() {
        let context = context();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let next = upstream(seen.clone(), Some("Basic dXNlcjpwYXNz"));
        let filter = filter("user");

        filter.filter(context.clone(), request(), next.clone()).await.unwrap();
        filter.filter(context, request(), next).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_second_401_goes_to_failure_handler() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let mut response = filter("user")
            .filter(context(), request(), upstream(seen.clone(), None))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(response.get_string(None).await.unwrap(), "login page");
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(response.headers.get(WWW_AUTHENTICATE).is_none());
    }

    #[tokio::test]
    async fn test_colon_in_username_is_500() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let response = filter("bad:user")
            .filter(context(), request(), upstream(seen.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
