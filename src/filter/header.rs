//! Add or remove headers on the request or the response.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::context::Context;
use crate::handler::{Filter, Handler, Next, ResponsePromise};
use crate::message::Request;

/// Which message a `HeaderFilter` edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
}

/// Removes then adds headers on one side of the exchange.
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    message_type: MessageType,
    remove: Vec<HeaderName>,
    add: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderFilter {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            remove: Vec::new(),
            add: Vec::new(),
        }
    }

    pub fn removing(mut self, name: HeaderName) -> Self {
        self.remove.push(name);
        self
    }

    pub fn adding(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.add.push((name, value));
        self
    }

    fn apply(remove: &[HeaderName], add: &[(HeaderName, HeaderValue)], headers: &mut HeaderMap) {
        for name in remove {
            headers.remove(name);
        }
        for (name, value) in add {
            headers.append(name.clone(), value.clone());
        }
    }
}

impl Filter for HeaderFilter {
    fn filter(&self, context: Context, mut request: Request, next: Next) -> ResponsePromise {
        match self.message_type {
            MessageType::Request => {
                Self::apply(&self.remove, &self.add, &mut request.headers);
                next.handle(context, request)
            }
            MessageType::Response => {
                let remove = self.remove.clone();
                let add = self.add.clone();
                next.handle(context, request).map(move |mut response| {
                    Self::apply(&remove, &add, &mut response.headers);
                    response
                })
            }
        }
    }
}
