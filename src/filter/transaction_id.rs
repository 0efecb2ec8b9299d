//! Transaction id propagation.
//!
//! # Data Flow
//! ```text
//! inbound:  X-Transaction-Id (valid?) or fresh UUID → TransactionIdContext
//! outbound: TransactionIdContext → "<id>/<n>" written to X-Transaction-Id
//! ```
//!
//! # Design Decisions
//! - An inbound value is trusted only if it is printable ASCII of at most
//!   255 characters; anything else is replaced, never echoed
//! - Sub-transaction numbers come from a counter shared by every copy of
//!   the same transaction id, so concurrent calls never reuse a number

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};

use crate::context::{Context, ContextData};
use crate::handler::{Filter, Handler, Next, ResponsePromise};
use crate::message::headers::first_value;
use crate::message::Request;

/// Default header carrying the transaction id.
pub const DEFAULT_HEADER: &str = "X-Transaction-Id";

const MAX_LENGTH: usize = 255;

/// A transaction id and the counter of its sub-transactions.
#[derive(Clone)]
pub struct TransactionId {
    value: String,
    sub_transactions: Arc<AtomicU64>,
}

impl TransactionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            sub_transactions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Next child id, `"<id>/<n>"` with `n` counting from 0.
    pub fn create_sub_transaction(&self) -> TransactionId {
        let n = self.sub_transactions.fetch_add(1, Ordering::Relaxed);
        TransactionId::new(format!("{}/{}", self.value, n))
    }

    /// True when `value` may be adopted as an inbound transaction id.
    pub fn is_valid(value: &str) -> bool {
        !value.is_empty()
            && value.len() <= MAX_LENGTH
            && value.bytes().all(|b| (0x20..=0x7e).contains(&b))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransactionId").field(&self.value).finish()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Transaction id of the current exchange.
#[derive(Debug, Clone)]
pub struct TransactionIdContext {
    pub transaction_id: TransactionId,
}

impl ContextData for TransactionIdContext {
    const NAME: &'static str = "transactionId";
}

/// Adopts or creates the transaction id of an inbound request.
#[derive(Debug, Clone)]
pub struct TransactionIdInboundFilter {
    header: HeaderName,
}

impl TransactionIdInboundFilter {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for TransactionIdInboundFilter {
    fn default() -> Self {
        Self::new(HeaderName::from_static("x-transaction-id"))
    }
}

impl Filter for TransactionIdInboundFilter {
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise {
        let transaction_id = match first_value(&request.headers, &self.header) {
            Some(value) if TransactionId::is_valid(value) => TransactionId::new(value),
            Some(value) => {
                tracing::debug!(
                    length = value.len(),
                    "Ignoring malformed inbound transaction id"
                );
                TransactionId::generate()
            }
            None => TransactionId::generate(),
        };

        tracing::debug!(transaction_id = %transaction_id, "Transaction started");
        let context = context.push(TransactionIdContext { transaction_id });
        next.handle(context, request)
    }
}

/// Stamps upstream requests with a sub-transaction id.
#[derive(Debug, Clone)]
pub struct TransactionIdOutboundFilter {
    header: HeaderName,
}

impl TransactionIdOutboundFilter {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for TransactionIdOutboundFilter {
    fn default() -> Self {
        Self::new(HeaderName::from_static("x-transaction-id"))
    }
}

impl Filter for TransactionIdOutboundFilter {
    fn filter(&self, context: Context, mut request: Request, next: Next) -> ResponsePromise {
        if let Ok(found) = context.as_context::<TransactionIdContext>() {
            let sub = found.transaction_id.create_sub_transaction();
            match HeaderValue::from_str(sub.value()) {
                Ok(value) => {
                    request.headers.insert(self.header.clone(), value);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Transaction id is not a valid header value");
                }
            }
        }
        next.handle(context, request)
    }
}
