//! Predicates and value expressions evaluated against an exchange.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::message::Request;
use crate::routing::matcher::Matcher;

/// A boolean test over `(context, request)`.
#[derive(Clone)]
pub struct Condition {
    test: Arc<dyn Fn(&Context, &Request) -> bool + Send + Sync>,
}

impl Condition {
    pub fn new<F>(test: F) -> Self
    where
        F: Fn(&Context, &Request) -> bool + Send + Sync + 'static,
    {
        Self {
            test: Arc::new(test),
        }
    }

    pub fn always() -> Self {
        Self::new(|_, _| true)
    }

    pub fn never() -> Self {
        Self::new(|_, _| false)
    }

    /// Holds when `matcher` matches the request.
    pub fn matching(matcher: impl Matcher + 'static) -> Self {
        Self::new(move |_, request| matcher.matches(request))
    }

    pub fn evaluate(&self, context: &Context, request: &Request) -> bool {
        (self.test)(context, request)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Condition")
    }
}

/// Computes a value from `(context, request)`; `None` when it cannot.
pub struct Expression<T> {
    eval: Arc<dyn Fn(&Context, &Request) -> Option<T> + Send + Sync>,
}

impl<T> Expression<T> {
    pub fn new<F>(eval: F) -> Self
    where
        F: Fn(&Context, &Request) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            eval: Arc::new(eval),
        }
    }

    pub fn evaluate(&self, context: &Context, request: &Request) -> Option<T> {
        (self.eval)(context, request)
    }
}

impl<T: Clone + Send + Sync + 'static> Expression<T> {
    pub fn constant(value: T) -> Self {
        Self::new(move |_, _| Some(value.clone()))
    }
}

impl<T> Clone for Expression<T> {
    fn clone(&self) -> Self {
        Self {
            eval: self.eval.clone(),
        }
    }
}

impl<T> fmt::Debug for Expression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Expression")
    }
}
