//! Failure channel of the request pipeline.
//!
//! Expected HTTP-level outcomes (an upstream 404, a throttled 429) are
//! ordinary `Response` values. `GatewayError` is for everything that kept a
//! response from being produced at all.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::context::ContextError;
use crate::entity::EntityError;
use crate::message::Response;
use crate::promise::{PromiseAbandoned, RuntimeException};
use crate::session::SessionError;

/// Application-wide pipeline error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("entity error: {0}")]
    Entity(#[from] EntityError),

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("request processing cancelled")]
    Cancelled,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeException),
}

impl GatewayError {
    /// Status reported to the client when this error reaches the boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Entity(EntityError::Overflow { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Entity(_)
            | GatewayError::Context(_)
            | GatewayError::Session(_)
            | GatewayError::Cancelled
            | GatewayError::Internal(_)
            | GatewayError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Normalize into a response value carrying this error as its cause.
    pub fn into_response(self) -> Response {
        Response::new(self.status_code()).with_cause(self)
    }
}

impl From<PromiseAbandoned> for GatewayError {
    fn from(e: PromiseAbandoned) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Upstream("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(1)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::Entity(EntityError::Overflow { limit: 10 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayError::Runtime(RuntimeException::new("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response_keeps_cause() {
        let response = GatewayError::BadRequest("no host".into()).into_response();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response.cause.as_ref().map(|c| c.to_string()),
            Some("bad request: no host".to_string())
        );
    }
}
