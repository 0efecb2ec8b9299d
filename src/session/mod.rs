//! Per-user-agent session state.
//!
//! # Data Flow
//! ```text
//! SessionFilter
//!     → SessionManager::load(request) (cookie → stored state, or a new session)
//!     → SessionContext pushed for downstream stages
//!     → filters get/put/get_or_insert_with values
//!     → Session::save(response) exactly once, on every exit path
//! ```
//!
//! # Design Decisions
//! - Values are `Arc<dyn Any>` so filters can keep their own types (a cookie
//!   jar, cached credentials) without serializing them
//! - `get_or_insert_with` is atomic per key; concurrent requests of one user
//!   agent never both create the same value
//! - Storage is pluggable through `SessionManager`

pub mod memory;

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

use crate::context::ContextData;
use crate::message::{Request, Response};

pub use memory::InMemorySessionManager;

/// A value stored in a session.
pub type SessionValue = Arc<dyn Any + Send + Sync>;

/// Errors raised by session stores.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Store(String),

    #[error("session cookie could not be written: {0}")]
    Cookie(String),
}

/// Map-like state scoped to one user agent.
pub trait Session: Send + Sync {
    fn get(&self, key: &str) -> Option<SessionValue>;

    /// Store `value`, returning the previous one.
    fn put(&self, key: &str, value: SessionValue) -> Option<SessionValue>;

    fn remove(&self, key: &str) -> Option<SessionValue>;

    /// Current value under `key`, or the result of `init` stored atomically.
    fn get_or_insert_with(&self, key: &str, init: &mut dyn FnMut() -> SessionValue) -> SessionValue;

    fn keys(&self) -> Vec<String>;

    /// Drop every value; the session is invalidated on the next save.
    fn clear(&self);

    /// Commit pending state into the outgoing response.
    fn save(&self, response: &mut Response) -> Result<(), SessionError>;
}

impl dyn Session {
    /// Typed read of a value stored under `key`.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key)?.downcast::<T>().ok()
    }
}

/// Loads the session belonging to a request.
pub trait SessionManager: Send + Sync {
    fn load(&self, request: &Request) -> Result<Arc<dyn Session>, SessionError>;
}

/// Session of the current exchange.
#[derive(Clone)]
pub struct SessionContext {
    pub session: Arc<dyn Session>,
}

impl SessionContext {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }
}

impl ContextData for SessionContext {
    const NAME: &'static str = "session";
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("keys", &self.session.keys())
            .finish()
    }
}
