//! Session loading and the save-always contract.
//!
//! # Data Flow
//! ```text
//! request → SessionManager::load → SessionContext pushed → next
//!     ← response, typed failure, or defect
//!     → failure/defect converted to an error response
//!     → Session::save(response) exactly once; a save failure is logged
//! ```

use std::sync::Arc;

use crate::context::Context;
use crate::error::GatewayError;
use crate::filter::runtime_exception::{defect_response, guarded};
use crate::handler::{Filter, Next, ResponsePromise};
use crate::message::{Request, Response};
use crate::observability::metrics;
use crate::promise::Promise;
use crate::session::{SessionContext, SessionManager};

/// Loads the user agent's session and saves it on every exit path.
pub struct SessionFilter {
    manager: Arc<dyn SessionManager>,
}

impl SessionFilter {
    pub fn new(manager: Arc<dyn SessionManager>) -> Self {
        Self { manager }
    }
}

impl Filter for SessionFilter {
    fn filter(&self, context: Context, request: Request, next: Next) -> ResponsePromise {
        let session = match self.manager.load(&request) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load session");
                return Promise::result(Response::new_internal_server_error_with_cause(
                    GatewayError::from(e),
                ));
            }
        };
        let context = context.push(SessionContext::new(session.clone()));

        guarded(next, context, request)
            .then_catch_runtime_exception(|e| Ok(defect_response(e)))
            .then_catch(|e: GatewayError| {
                tracing::warn!(error = %e, "Request failed, answering with error response");
                Ok::<_, GatewayError>(e.into_response())
            })
            .map(move |mut response| {
                if let Err(e) = session.save(&mut response) {
                    tracing::warn!(error = %e, "Failed to save session");
                    metrics::record_session_save_failure();
                }
                response
            })
    }
}
