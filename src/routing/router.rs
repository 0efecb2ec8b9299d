//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes, highest priority first
//! - Find the first route matching a request
//! - Rebase the request URI onto the route's upstream
//! - Record the match in a `UriRouterContext` for downstream stages
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order; ties keep declaration order
//! - Explicit 404 response rather than a silent default route

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use url::Url;

use crate::context::{Context, ContextData};
use crate::handler::{Handler, ResponsePromise};
use crate::message::{Request, Response};
use crate::promise::Promise;
use crate::routing::matcher::Matcher;

/// What the router matched for the current request.
#[derive(Debug, Clone)]
pub struct UriRouterContext {
    /// Name of the route that matched.
    pub route: String,
    /// Leading part of the path consumed by the route.
    pub matched_uri: String,
    /// Rest of the path after `matched_uri`.
    pub remaining_uri: String,
    /// Request URI before rebasing.
    pub original_uri: Url,
}

impl ContextData for UriRouterContext {
    const NAME: &'static str = "router";
}

/// A compiled route.
pub struct Route {
    name: String,
    matcher: Box<dyn Matcher>,
    path_prefix: String,
    upstream: Option<Url>,
    priority: u32,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn new(name: impl Into<String>, matcher: Box<dyn Matcher>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            matcher,
            path_prefix: String::new(),
            upstream: None,
            priority: 0,
            handler,
        }
    }

    /// Part of the path reported as matched in `UriRouterContext`.
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    /// Base URL the request is rebased onto before dispatch.
    pub fn with_upstream(mut self, upstream: Url) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("upstream", &self.upstream.as_ref().map(Url::as_str))
            .field("priority", &self.priority)
            .finish()
    }
}

/// Dispatches each request to the first matching route.
#[derive(Debug)]
pub struct DispatchHandler {
    routes: Vec<Route>,
}

impl DispatchHandler {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    fn find(&self, request: &Request) -> Option<&Route> {
        self.routes.iter().find(|route| route.matcher.matches(request))
    }
}

impl Handler for DispatchHandler {
    fn handle(&self, context: Context, mut request: Request) -> ResponsePromise {
        let route = match self.find(&request) {
            Some(route) => route,
            None => {
                tracing::warn!(path = %request.uri.path(), "No route matched");
                return Promise::result(Response::new(StatusCode::NOT_FOUND));
            }
        };

        let original_uri = request.uri.clone();
        let path = original_uri.path();
        let (matched, remaining) = match path.strip_prefix(route.path_prefix.as_str()) {
            Some(rest) => (route.path_prefix.clone(), rest.to_string()),
            None => (String::new(), path.to_string()),
        };

        if let Some(upstream) = &route.upstream {
            rebase(&mut request.uri, upstream);
        }

        tracing::debug!(
            route = %route.name,
            upstream = %request.uri,
            "Route matched"
        );

        let context = context.push(UriRouterContext {
            route: route.name.clone(),
            matched_uri: matched,
            remaining_uri: remaining,
            original_uri,
        });
        route.handler.handle(context, request)
    }
}

/// Point `uri` at `base`, prefixing the base path and keeping the query.
fn rebase(uri: &mut Url, base: &Url) {
    let base_path = base.path().trim_end_matches('/');
    let path = format!("{}{}", base_path, uri.path());
    let query = uri.query().map(str::to_string);

    let mut rebased = base.clone();
    rebased.set_path(&path);
    rebased.set_query(query.as_deref());
    *uri = rebased;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::routing::matcher::{HostMatcher, PathPrefixMatcher};
    use axum::http::Method;

    fn recording_handler() -> Arc<dyn Handler> {
        Arc::new(handler_fn(|context: Context, request: Request| {
            let routed = context.as_context::<UriRouterContext>().unwrap();
            let mut response = Response::default();
            response.set_bytes(format!("{} {} {}", routed.route, routed.remaining_uri, request.uri));
            Promise::result(response)
        }))
    }

    #[tokio::test]
    async fn test_first_match_by_priority_and_rebase() {
        let dispatch = DispatchHandler::new(vec![
            Route::new("catch-all", Box::new(PathPrefixMatcher::new("/")), recording_handler())
                .with_upstream(Url::parse("http://fallback:80").unwrap()),
            Route::new("api", Box::new(PathPrefixMatcher::new("/api")), recording_handler())
                .with_path_prefix("/api")
                .with_upstream(Url::parse("http://backend:9000/base/").unwrap())
                .with_priority(10),
        ]);

        let request = Request::from_uri(Method::GET, "http://gateway/api/users?id=1").unwrap();
        let mut response = dispatch.handle(Context::root(), request).await.unwrap();
        assert_eq!(
            response.get_string(None).await.unwrap(),
            "api /users http://backend:9000/base/api/users?id=1"
        );
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let dispatch = DispatchHandler::new(vec![Route::new(
            "only-example",
            Box::new(HostMatcher::new("example.com")),
            recording_handler(),
        )]);
        let request = Request::from_uri(Method::GET, "http://other.org/").unwrap();
        let response = dispatch.handle(Context::root(), request).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
