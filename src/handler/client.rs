//! Terminal handler forwarding requests to an upstream server.
//!
//! # Responsibilities
//! - Send the request to the host named by its URI
//! - Bound the exchange by the upstream timeout
//! - Abort the exchange when the promise is cancelled
//!
//! The transport is injected: the handler owns the client it is given and
//! never looks one up globally.

use std::time::Duration;

use axum::body::Body;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::context::Context;
use crate::entity::SpillLimits;
use crate::error::GatewayError;
use crate::handler::{Handler, ResponsePromise};
use crate::http::convert::{upstream_request, upstream_response};
use crate::message::Request;
use crate::promise::{CancelToken, Promise};

/// Upstream HTTP client handler.
#[derive(Clone)]
pub struct ClientHandler {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    limits: SpillLimits,
}

impl ClientHandler {
    /// A handler with its own connection pool.
    pub fn new(timeout: Duration, limits: SpillLimits) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self::with_client(client, timeout, limits)
    }

    pub fn with_client(
        client: Client<HttpConnector, Body>,
        timeout: Duration,
        limits: SpillLimits,
    ) -> Self {
        Self {
            client,
            timeout,
            limits,
        }
    }
}

impl Handler for ClientHandler {
    fn handle(&self, _context: Context, request: Request) -> ResponsePromise {
        let client = self.client.clone();
        let timeout = self.timeout;
        let limits = self.limits;
        let token = CancelToken::new();
        let cancelled = token.clone();

        Promise::with_token(
            async move {
                let target = request.uri.to_string();
                let method = request.method.clone();
                let outbound = upstream_request(request)?;

                tracing::debug!(method = %method, upstream = %target, "Forwarding request");

                let exchange = tokio::time::timeout(timeout, client.request(outbound));
                let upstream = tokio::select! {
                    _ = cancelled.cancelled() => {
                        tracing::debug!(upstream = %target, "Upstream exchange cancelled");
                        return Err(GatewayError::Cancelled);
                    }
                    result = exchange => match result {
                        Err(_) => {
                            tracing::warn!(upstream = %target, timeout = ?timeout, "Upstream timed out");
                            return Err(GatewayError::Timeout(timeout));
                        }
                        Ok(Err(e)) => {
                            tracing::error!(upstream = %target, error = %e, "Upstream error");
                            return Err(GatewayError::Upstream(e.to_string()));
                        }
                        Ok(Ok(response)) => response,
                    },
                };

                Ok(upstream_response(upstream, limits))
            },
            token,
        )
    }
}

impl std::fmt::Debug for ClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandler")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
