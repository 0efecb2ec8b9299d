//! Outermost guard turning defects into `500` responses.
//!
//! A panic raised while building the downstream promise, or while it runs,
//! becomes an internal server error carrying the panic as its cause. Typed
//! failures pass through untouched.

use std::panic::AssertUnwindSafe;

use crate::context::Context;
use crate::error::GatewayError;
use crate::handler::{Filter, Handler, Next, ResponsePromise};
use crate::message::{Request, Response};
use crate::observability::metrics;
use crate::promise::{Promise, RuntimeException};

#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeExceptionFilter;

impl RuntimeExceptionFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for RuntimeExceptionFilter {
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise {
        guarded(next, context, request).then_catch_runtime_exception(|e| Ok(defect_response(e)))
    }
}

/// Call `next`, converting a panic raised before it returns a promise.
pub(crate) fn guarded(next: Next, context: Context, request: Request) -> ResponsePromise {
    match std::panic::catch_unwind(AssertUnwindSafe(|| next.handle(context, request))) {
        Ok(promise) => promise,
        Err(payload) => Promise::result(defect_response(RuntimeException::from_panic(&*payload))),
    }
}

/// A `500` response for a captured defect.
pub(crate) fn defect_response(e: RuntimeException) -> Response {
    tracing::error!(error = %e, "Runtime exception while handling request");
    metrics::record_runtime_exception();
    Response::new_internal_server_error_with_cause(GatewayError::Runtime(e))
}
