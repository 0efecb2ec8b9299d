//! Pipeline behaviour across several filters, without the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, SET_COOKIE};
use axum::http::{Method, StatusCode};

use filter_gateway::filter::{
    HttpBasicAuthFilter, RuntimeExceptionFilter, SessionFilter, TransactionIdContext,
    TransactionIdInboundFilter, TransactionIdOutboundFilter,
};
use filter_gateway::handler::{filter_fn, handler_fn, Expression, StaticResponseHandler};
use filter_gateway::promise::{deferred, Promise};
use filter_gateway::session::{InMemorySessionManager, Session, SessionContext};
use filter_gateway::{Chain, Context, Filter, GatewayError, Handler, Request, Response};

fn request() -> Request {
    Request::from_uri(Method::GET, "http://gateway.local/app").unwrap()
}

fn marker(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Filter> {
    Arc::new(filter_fn(move |context, request, next| {
        log.lock().unwrap().push(format!("{}-pre", name));
        let log = log.clone();
        next.handle(context, request).map(move |response| {
            log.lock().unwrap().push(format!("{}-post", name));
            response
        })
    }))
}

#[tokio::test]
async fn test_post_processing_runs_in_reverse() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();
    let chain = Chain::new(
        vec![marker("F1", log.clone()), marker("F2", log.clone())],
        Arc::new(handler_fn(move |_, _| {
            handler_log.lock().unwrap().push("H".to_string());
            Promise::result(Response::default())
        })),
    );

    chain.handle(Context::root(), request()).await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["F1-pre", "F2-pre", "H", "F2-post", "F1-post"]
    );
}

#[tokio::test]
async fn test_defect_is_500_and_session_still_saved() {
    let manager = Arc::new(InMemorySessionManager::default());
    let chain = Chain::new(
        vec![
            Arc::new(RuntimeExceptionFilter::new()),
            Arc::new(SessionFilter::new(manager.clone())),
            Arc::new(filter_fn(|context: Context, request, next: filter_gateway::Next| {
                let session = &context.as_context::<SessionContext>().unwrap().session;
                session.put("visited", Arc::new(true));
                next.handle(context, request)
            })),
        ],
        Arc::new(handler_fn(|_, _| -> filter_gateway::ResponsePromise {
            Promise::from_future(async { panic!("handler defect") })
        })),
    );

    let response = chain.handle(Context::root(), request()).await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers.get(SET_COOKIE).is_some());
    assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn test_typed_failure_passes_the_guard() {
    let chain = Chain::new(
        vec![Arc::new(RuntimeExceptionFilter::new())],
        Arc::new(handler_fn(|_, _| {
            Promise::exception(GatewayError::Timeout(Duration::from_secs(1)))
        })),
    );

    let outcome = chain.handle(Context::root(), request()).await;
    assert!(matches!(outcome, Err(GatewayError::Timeout(_))));
}

#[tokio::test]
async fn test_basic_auth_gives_up_after_one_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let chain = Chain::new(
        vec![
            Arc::new(SessionFilter::new(Arc::new(InMemorySessionManager::default()))),
            Arc::new(HttpBasicAuthFilter::new(
                Expression::constant("user".to_string()),
                Expression::constant("wrong".to_string()),
                Arc::new(StaticResponseHandler::new(StatusCode::FORBIDDEN)),
            )),
        ],
        Arc::new(handler_fn(move |_, request: Request| {
            let attempt = counted.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.headers.contains_key(AUTHORIZATION), attempt == 1);
            Promise::result(Response::new(StatusCode::UNAUTHORIZED))
        })),
    );

    let response = chain.handle(Context::root(), request()).await.unwrap();
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transaction_ids_flow_downstream() {
    let chain = Chain::new(
        vec![
            Arc::new(TransactionIdInboundFilter::default()),
            Arc::new(TransactionIdOutboundFilter::default()),
        ],
        Arc::new(handler_fn(|context: Context, request: Request| {
            let id = context.as_context::<TransactionIdContext>().unwrap();
            let sent = request.headers["x-transaction-id"].to_str().unwrap().to_string();
            assert_eq!(sent, format!("{}/0", id.transaction_id.value()));
            Promise::result(Response::default())
        })),
    );
    chain.handle(Context::root(), request()).await.unwrap();
}

#[tokio::test]
async fn test_cancelling_the_exchange_reaches_the_producer() {
    let observed = Arc::new(Mutex::new(None));
    let slot = observed.clone();
    let chain = Chain::new(
        vec![Arc::new(SessionFilter::new(Arc::new(InMemorySessionManager::default())))],
        Arc::new(handler_fn(move |_, _| {
            let (promise, completer) = deferred::<Response, GatewayError>();
            *slot.lock().unwrap() = Some(completer);
            promise
        })),
    );

    let promise = chain.handle(Context::root(), request());
    assert!(promise.cancel());

    let completer = observed.lock().unwrap().take().unwrap();
    assert!(completer.is_cancelled());
}
