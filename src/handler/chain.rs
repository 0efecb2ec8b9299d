//! Ordered filters in front of a terminal handler.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::{Filter, Handler, ResponsePromise};
use crate::message::Request;

struct ChainInner {
    filters: Vec<Arc<dyn Filter>>,
    handler: Arc<dyn Handler>,
}

/// `[F0, .., Fn-1]` followed by a terminal handler.
#[derive(Clone)]
pub struct Chain {
    inner: Arc<ChainInner>,
}

impl Chain {
    pub fn new(filters: Vec<Arc<dyn Filter>>, handler: Arc<dyn Handler>) -> Self {
        Self {
            inner: Arc::new(ChainInner { filters, handler }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.filters.is_empty()
    }
}

impl Handler for Chain {
    fn handle(&self, context: Context, request: Request) -> ResponsePromise {
        Next {
            inner: self.inner.clone(),
            position: 0,
        }
        .handle(context, request)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("filters", &self.len()).finish()
    }
}

/// The rest of a chain, as seen by the filter at one position.
#[derive(Clone)]
pub struct Next {
    inner: Arc<ChainInner>,
    position: usize,
}

impl Next {
    /// A `Next` that goes straight to `handler`.
    pub fn to(handler: Arc<dyn Handler>) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                filters: Vec::new(),
                handler,
            }),
            position: 0,
        }
    }
}

impl Handler for Next {
    fn handle(&self, context: Context, request: Request) -> ResponsePromise {
        match self.inner.filters.get(self.position) {
            Some(filter) => {
                let next = Next {
                    inner: self.inner.clone(),
                    position: self.position + 1,
                };
                filter.filter(context, request, next)
            }
            None => self.inner.handler.handle(context, request),
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("position", &self.position)
            .field("filters", &self.inner.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{filter_fn, handler_fn};
    use crate::message::Response;
    use crate::promise::Promise;
    use axum::http::{Method, StatusCode};
    use std::future::IntoFuture;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn marking_filter(log: Log, name: &'static str) -> Arc<dyn Filter> {
        Arc::new(filter_fn(move |context, request, next: Next| {
            log.lock().unwrap().push(format!("{}-pre", name));
            let log = log.clone();
            next.handle(context, request).then_on_result(move |_| {
                log.lock().unwrap().push(format!("{}-post", name));
            })
        }))
    }

    fn request() -> Request {
        Request::from_uri(Method::GET, "http://example.com/").unwrap()
    }

    #[tokio::test]
    async fn test_filters_nest_in_declaration_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = log.clone();
        let handler: Arc<dyn Handler> = Arc::new(handler_fn(move |_, _| {
            handler_log.lock().unwrap().push("H".into());
            Promise::result(Response::default())
        }));
        let chain = Chain::new(
            vec![marking_filter(log.clone(), "F1"), marking_filter(log.clone(), "F2")],
            handler,
        );

        let response = chain.handle(Context::root(), request()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["F1-pre", "F2-pre", "H", "F2-post", "F1-post"]
        );
    }

    #[tokio::test]
    async fn test_filter_can_short_circuit() {
        let reached = Arc::new(Mutex::new(false));
        let flag = reached.clone();
        let handler: Arc<dyn Handler> = Arc::new(handler_fn(move |_, _| {
            *flag.lock().unwrap() = true;
            Promise::result(Response::default())
        }));
        let deny: Arc<dyn Filter> = Arc::new(filter_fn(|_, _, _| {
            Promise::result(Response::new(StatusCode::FORBIDDEN))
        }));

        let response = Chain::new(vec![deny], handler)
            .handle(Context::root(), request())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert!(!*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn test_chain_is_reentrant() {
        let handler: Arc<dyn Handler> = Arc::new(handler_fn(|_, request: Request| {
            let mut response = Response::default();
            response.set_bytes(request.uri.path().to_string());
            Promise::result(response)
        }));
        let chain = Chain::new(Vec::new(), handler);

        let a = chain.handle(
            Context::root(),
            Request::from_uri(Method::GET, "http://example.com/a").unwrap(),
        );
        let b = chain.handle(
            Context::root(),
            Request::from_uri(Method::GET, "http://example.com/b").unwrap(),
        );
        let (a, b) = tokio::join!(a.into_future(), b.into_future());
        assert_eq!(a.unwrap().get_string(None).await.unwrap(), "/a");
        assert_eq!(b.unwrap().get_string(None).await.unwrap(), "/b");
    }
}
