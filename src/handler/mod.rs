//! Handler and filter contracts.
//!
//! # Data Flow
//! ```text
//! boundary adapter
//!     → Chain::handle(context, request)
//!     → F0.filter(context, request, next@1)
//!     → F1.filter(context', request', next@2)
//!     → ... → terminal Handler::handle
//!     ← ResponsePromise composed back out through each filter
//! ```
//!
//! # Design Decisions
//! - Every stage returns a `ResponsePromise`; filters transform the promise
//!   they got from `next` instead of blocking on it
//! - `Next` is an owned, cloneable handle so a filter can call it again from
//!   inside a continuation (retry on 401, login replay)
//! - Chains are immutable and shared through `Arc`, so one chain serves any
//!   number of concurrent requests

pub mod chain;
pub mod client;
pub mod condition;
pub mod static_response;

use std::sync::Arc;

use crate::context::Context;
use crate::error::GatewayError;
use crate::message::{Request, Response};
use crate::promise::Promise;

pub use chain::{Chain, Next};
pub use client::ClientHandler;
pub use condition::{Condition, Expression};
pub use static_response::StaticResponseHandler;

/// The promise every pipeline stage returns.
pub type ResponsePromise = Promise<Response, GatewayError>;

/// Produces a response for a request.
pub trait Handler: Send + Sync {
    fn handle(&self, context: Context, request: Request) -> ResponsePromise;
}

/// A pipeline stage wrapping the rest of the chain.
///
/// A filter may forward to `next` (possibly with a different context or
/// request), short-circuit with its own response, and post-process
/// whatever `next` returns.
pub trait Filter: Send + Sync {
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle(&self, context: Context, request: Request) -> ResponsePromise {
        (**self).handle(context, request)
    }
}

impl<F: Filter + ?Sized> Filter for Arc<F> {
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise {
        (**self).filter(context, request, next)
    }
}

/// Handler built from a closure.
pub struct HandlerFn<F>(F);

impl<F> Handler for HandlerFn<F>
where
    F: Fn(Context, Request) -> ResponsePromise + Send + Sync,
{
    fn handle(&self, context: Context, request: Request) -> ResponsePromise {
        (self.0)(context, request)
    }
}

pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(Context, Request) -> ResponsePromise + Send + Sync,
{
    HandlerFn(f)
}

/// Filter built from a closure.
pub struct FilterFn<F>(F);

impl<F> Filter for FilterFn<F>
where
    F: Fn(Context, Request, Next) -> ResponsePromise + Send + Sync,
{
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise {
        (self.0)(context, request, next)
    }
}

pub fn filter_fn<F>(f: F) -> FilterFn<F>
where
    F: Fn(Context, Request, Next) -> ResponsePromise + Send + Sync,
{
    FilterFn(f)
}
