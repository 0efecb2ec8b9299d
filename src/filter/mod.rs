//! Built-in filters.
//!
//! # Data Flow
//! ```text
//! Inbound request (default assembly order):
//!     → runtime_exception.rs (defects become 500)
//!     → transaction_id.rs (inbound id into context)
//!     → session.rs (load session, save on every exit)
//!     → throttle.rs (429 + Retry-After when the bucket is empty)
//!     → cookie/ (manage, suppress or relay cookies)
//!     → password_replay.rs (answer upstream login pages)
//!     → basic_auth.rs (retry once on 401)
//!     → transaction_id.rs (sub-transaction id on the upstream request)
//!     → routing
//! ```
//!
//! # Design Decisions
//! - Per-request state lives in the context or the session, never in the
//!   filter; the throttle buckets are the one shared mutable structure
//! - Filters that send a request more than once copy it first under a branch

pub mod basic_auth;
pub mod condition_enforcement;
pub mod cookie;
pub mod header;
pub mod password_replay;
pub mod runtime_exception;
pub mod session;
pub mod throttle;
pub mod transaction_id;

pub use basic_auth::HttpBasicAuthFilter;
pub use condition_enforcement::ConditionEnforcementFilter;
pub use cookie::{CookieAction, CookieFilter, CookieJar, CookiePolicy};
pub use header::{HeaderFilter, MessageType};
pub use password_replay::{attribute_template, LoginRequest, PasswordReplayFilter};
pub use runtime_exception::RuntimeExceptionFilter;
pub use session::SessionFilter;
pub use throttle::{Clock, MonotonicClock, ThrottlingFilter, TokenBucket};
pub use transaction_id::{
    TransactionId, TransactionIdContext, TransactionIdInboundFilter, TransactionIdOutboundFilter,
};
