//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with a catch-all handler
//! - Wire up middleware (tracing, boundary timeout)
//! - Adapt each wire request into a `Request` plus root `Context`
//! - Run the exchange through the current pipeline and write the response
//! - Swap in a rebuilt pipeline when the configuration changes
//!
//! # Design Decisions
//! - The pipeline sits behind `ArcSwap`; in-flight exchanges finish on the
//!   chain they started with
//! - A failure that escapes the chain is answered here with a plain 500,
//!   never with an error page from the framework
//! - Dropping the handler future (client disconnect, boundary timeout)
//!   cancels the exchange's promise

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{self, header::USER_AGENT},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::context::{AttributesContext, ClientContext, Context};
use crate::entity::SpillLimits;
use crate::handler::{Chain, Handler};
use crate::http::convert::{client_response, inbound_request};
use crate::message::Response;
use crate::lifecycle::startup::{build_pipeline, build_session_manager, StartupError};
use crate::observability::metrics;
use crate::promise::CancelToken;
use crate::session::SessionManager;

/// Everything an exchange needs from the current configuration.
struct Pipeline {
    chain: Chain,
    limits: SpillLimits,
}

/// Application state injected into handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<ArcSwap<Pipeline>>,
    local_address: Option<SocketAddr>,
}

/// HTTP front end of the gateway.
#[derive(Clone)]
pub struct HttpServer {
    pipeline: Arc<ArcSwap<Pipeline>>,
    sessions: Arc<dyn SessionManager>,
    config: Arc<GatewayConfig>,
}

impl HttpServer {
    /// Create a server whose pipeline is built from `config`.
    pub fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let sessions = build_session_manager(&config);
        let chain = build_pipeline(&config, sessions.clone())?;
        Ok(Self {
            pipeline: Arc::new(ArcSwap::from_pointee(Pipeline {
                chain,
                limits: config.entity.limits(),
            })),
            sessions,
            config: Arc::new(config),
        })
    }

    /// Rebuild the pipeline from `config` and swap it in. Sessions survive.
    pub fn reload(&self, config: &GatewayConfig) -> Result<(), StartupError> {
        let chain = build_pipeline(config, self.sessions.clone())?;
        self.pipeline.store(Arc::new(Pipeline {
            chain,
            limits: config.entity.limits(),
        }));
        tracing::info!(routes = config.routes.len(), "Pipeline reloaded");
        Ok(())
    }

    /// The Axum router serving this gateway.
    ///
    /// `local_address` is the address requests arrive on; it becomes the
    /// authority of each request's URI.
    #[allow(deprecated)]
    pub fn router(&self, local_address: Option<SocketAddr>) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
            local_address,
        };
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(self.config.timeouts.request())),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires. Configurations received on `updates` replace the
    /// pipeline; those that fail to build are logged and ignored.
    pub async fn run(
        self,
        listener: TcpListener,
        mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let server = self.clone();
        tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                if let Err(e) = server.reload(&config) {
                    tracing::error!(error = %e, "Rejected new configuration");
                }
            }
        });

        let app = self
            .router(Some(addr))
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Cancels the exchange if the handler future is dropped before the
/// pipeline completed.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.0.cancel() {
            tracing::debug!("Exchange abandoned before completion, cancelled");
        }
    }
}

async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: http::Request<Body>,
) -> axum::response::Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let pipeline = state.pipeline.load_full();

    let client = ClientContext {
        remote_address: Some(remote),
        local_address: state.local_address,
        user_agent: request
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        is_secure: false,
    };
    let context = Context::root().push(client).push(AttributesContext::new());
    let request_id = context.root_context().id().unwrap_or_default().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        "Handling request"
    );

    let response = match inbound_request(request, state.local_address, false, pipeline.limits) {
        Ok(request) => {
            let promise = pipeline.chain.handle(context, request);
            let _guard = CancelOnDrop(promise.cancel_token());
            match promise.await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Failure reached the boundary");
                    Response::new_internal_server_error_with_cause(e)
                }
            }
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Malformed request");
            e.into_response()
        }
    };

    tracing::debug!(
        request_id = %request_id,
        status = response.status.as_u16(),
        "Request complete"
    );
    metrics::record_request(&method, response.status.as_u16(), start);
    client_response(response)
}
