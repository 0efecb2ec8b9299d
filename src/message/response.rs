//! Response message.
//!
//! # Responsibilities
//! - Status, optional reason phrase, headers and entity
//! - Carry the cause of a normalized error response, so failures can flow
//!   through the success channel as ordinary values

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode, Version};

use crate::entity::Entity;

/// Shared error attached to an error response.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// An HTTP response flowing back through the pipeline.
pub struct Response {
    pub status: StatusCode,
    /// Reason phrase override; the canonical phrase is used when absent.
    pub reason: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub entity: Entity,
    pub cause: Option<Cause>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            entity: Entity::empty(),
            cause: None,
        }
    }

    /// A `500 Internal Server Error` with no cause.
    pub fn new_internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// A `500 Internal Server Error` remembering what went wrong.
    pub fn new_internal_server_error_with_cause(
        cause: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::new_internal_server_error().with_cause(cause)
    }

    pub fn with_cause(mut self, cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Reason phrase to put on the wire.
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    /// True for client (4xx) and server (5xx) errors.
    pub fn is_error(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("entity", &self.entity)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

crate::message::entity_accessors!(Response);
