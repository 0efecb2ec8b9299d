//! Lets a request through only when a condition holds.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::context::Context;
use crate::handler::{Condition, Filter, Handler, Next, ResponsePromise};
use crate::message::{Request, Response};
use crate::promise::Promise;

/// Forwards when `condition` holds; otherwise answers `403 Forbidden` or
/// hands the request to the failure handler.
pub struct ConditionEnforcementFilter {
    condition: Condition,
    failure_handler: Option<Arc<dyn Handler>>,
}

impl ConditionEnforcementFilter {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            failure_handler: None,
        }
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }
}

impl Filter for ConditionEnforcementFilter {
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise {
        if self.condition.evaluate(&context, &request) {
            return next.handle(context, request);
        }

        tracing::debug!(path = %request.uri.path(), "Condition not met, request denied");
        match &self.failure_handler {
            Some(handler) => handler.handle(context, request),
            None => Promise::result(Response::new(StatusCode::FORBIDDEN)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, StaticResponseHandler};
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderValue, Method};

    fn authorized() -> Condition {
        Condition::new(|_, request| request.headers.contains_key(AUTHORIZATION))
    }

    fn ok_next() -> Next {
        Next::to(Arc::new(handler_fn(|_, _| Promise::result(Response::default()))))
    }

    #[tokio::test]
    async fn test_denied_without_handler_is_403() {
        let filter = ConditionEnforcementFilter::new(authorized());
        let request = Request::from_uri(Method::GET, "http://example.com/").unwrap();
        let response = filter.filter(Context::root(), request, ok_next()).await.unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_failure_handler_and_pass_through() {
        let filter = ConditionEnforcementFilter::new(authorized()).with_failure_handler(Arc::new(
            StaticResponseHandler::new(StatusCode::UNAUTHORIZED),
        ));

        let denied = Request::from_uri(Method::GET, "http://example.com/").unwrap();
        let response = filter.filter(Context::root(), denied, ok_next()).await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);

        let mut allowed = Request::from_uri(Method::GET, "http://example.com/").unwrap();
        allowed
            .headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        let response = filter.filter(Context::root(), allowed, ok_next()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }
}
