//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated `GatewayConfig` into the request pipeline
//! - Assemble filters in their fixed order in front of the dispatcher
//! - Build one upstream client shared by every route
//!
//! # Design Decisions
//! - Fail fast: anything the validator let through but that still does not
//!   build is a `StartupError`
//! - The shared session store outlives pipeline rebuilds, so a config
//!   reload does not log every user out

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, Method, StatusCode};
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, ThrottlePartition};
use crate::context::ClientContext;
use crate::filter::{
    attribute_template, CookieFilter, HttpBasicAuthFilter, LoginRequest, PasswordReplayFilter,
    RuntimeExceptionFilter, SessionFilter, ThrottlingFilter, TransactionIdInboundFilter,
    TransactionIdOutboundFilter,
};
use crate::handler::{Chain, ClientHandler, Condition, Expression, Filter, Handler, StaticResponseHandler};
use crate::routing::{AndMatcher, DispatchHandler, HostMatcher, Matcher, PathPrefixMatcher, Route};
use crate::session::{InMemorySessionManager, SessionManager};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },
}

fn invalid(field: &str, message: impl ToString) -> StartupError {
    StartupError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Session store built from `[session]`.
pub fn build_session_manager(config: &GatewayConfig) -> Arc<dyn SessionManager> {
    Arc::new(InMemorySessionManager::new(
        config.session.cookie_name.clone(),
        Duration::from_secs(config.session.idle_timeout_secs),
    ))
}

/// Build the request pipeline for `config` around `sessions`.
///
/// Order: runtime-exception guard, inbound transaction id, session,
/// throttle, cookies, password replay, basic auth, outbound transaction id,
/// then the route dispatcher.
pub fn build_pipeline(
    config: &GatewayConfig,
    sessions: Arc<dyn SessionManager>,
) -> Result<Chain, StartupError> {
    let mut filters: Vec<Arc<dyn Filter>> = vec![Arc::new(RuntimeExceptionFilter::new())];

    let transaction_header = if config.transaction_id.enabled {
        let header = HeaderName::try_from(config.transaction_id.header.as_str())
            .map_err(|e| invalid("transaction_id.header", e))?;
        filters.push(Arc::new(TransactionIdInboundFilter::new(header.clone())));
        Some(header)
    } else {
        None
    };

    filters.push(Arc::new(SessionFilter::new(sessions)));

    if config.throttle.enabled {
        let duration = Duration::from_millis(config.throttle.duration_ms);
        let throttle = match config.throttle.partition {
            ThrottlePartition::None => ThrottlingFilter::global(config.throttle.requests, duration),
            ThrottlePartition::ClientIp => ThrottlingFilter::new(
                config.throttle.requests,
                duration,
                Expression::new(|context, _| {
                    context.as_context::<ClientContext>().ok()?.remote_ip()
                }),
            ),
        };
        filters.push(Arc::new(throttle));
    }

    if config.cookies.enabled {
        let cookies = CookieFilter::new(config.cookies.default_action, config.cookies.policy)
            .managing(&config.cookies.managed)
            .suppressing(&config.cookies.suppressed)
            .relaying(&config.cookies.relayed);
        filters.push(Arc::new(cookies));
    }

    if config.password_replay.enabled {
        filters.push(Arc::new(build_password_replay(config)?));
    }

    if config.basic_auth.enabled {
        let basic = HttpBasicAuthFilter::new(
            Expression::constant(config.basic_auth.username.clone()),
            Expression::constant(config.basic_auth.password.clone()),
            Arc::new(
                StaticResponseHandler::new(StatusCode::UNAUTHORIZED)
                    .with_body("Upstream authentication failed"),
            ),
        )
        .with_cache_header(config.basic_auth.cache_header);
        filters.push(Arc::new(basic));
    }

    if let Some(header) = transaction_header {
        filters.push(Arc::new(TransactionIdOutboundFilter::new(header)));
    }

    let dispatcher = build_dispatcher(config)?;
    tracing::debug!(
        filters = filters.len(),
        routes = dispatcher.routes().len(),
        "Pipeline assembled"
    );
    Ok(Chain::new(filters, Arc::new(dispatcher)))
}

fn build_password_replay(config: &GatewayConfig) -> Result<PasswordReplayFilter, StartupError> {
    let replay = &config.password_replay;
    let method = replay
        .login_method
        .parse::<Method>()
        .map_err(|e| invalid("password_replay.login_method", e))?;

    let mut login = LoginRequest::new(method, replay.login_uri.clone());
    for field in &replay.form {
        login = login.with_field(field.name.clone(), attribute_template(&field.value));
    }

    let mut filter = PasswordReplayFilter::new(login);
    if let Some(path) = &replay.login_path {
        filter = filter.with_login_page(Condition::matching(PathPrefixMatcher::new(path.clone())));
    }
    if let Some(marker) = &replay.content_marker {
        let marker =
            Regex::new(marker).map_err(|e| invalid("password_replay.content_marker", e))?;
        filter = filter.with_content_marker(marker);
    }
    for extraction in &replay.extractions {
        let pattern = Regex::new(&extraction.pattern)
            .map_err(|e| invalid("password_replay.extractions", e))?;
        filter = filter.with_extraction(extraction.name.clone(), pattern);
    }
    Ok(filter)
}

fn build_dispatcher(config: &GatewayConfig) -> Result<DispatchHandler, StartupError> {
    let client: Arc<dyn Handler> = Arc::new(ClientHandler::new(
        config.timeouts.upstream(),
        config.entity.limits(),
    ));

    let mut routes = Vec::with_capacity(config.routes.len());
    for route in &config.routes {
        let upstream = Url::parse(&route.upstream).map_err(|e| invalid("routes.upstream", e))?;

        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &route.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }
        if let Some(prefix) = &route.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
        }

        let mut built = Route::new(route.name.clone(), Box::new(AndMatcher::new(matchers)), client.clone())
            .with_upstream(upstream)
            .with_priority(route.priority);
        if let Some(prefix) = &route.path_prefix {
            built = built.with_path_prefix(prefix.clone());
        }
        routes.push(built);
    }
    if routes.is_empty() {
        tracing::warn!("No routes configured; every request will be answered with 404");
    }
    Ok(DispatchHandler::new(routes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_default_pipeline() {
        let config = GatewayConfig::default();
        let chain = build_pipeline(&config, build_session_manager(&config)).unwrap();
        // guard, transaction id in, session, transaction id out
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_every_filter_enabled() {
        let config = parse_config(
            r#"
            [throttle]
            enabled = true
            partition = "client_ip"

            [cookies]
            enabled = true

            [basic_auth]
            enabled = true
            username = "svc"
            password = "secret"

            [password_replay]
            enabled = true
            login_path = "/signin"
            form = [{ name = "user", value = "bjensen" }]

            [[routes]]
            name = "api"
            host = "api.example.com"
            path_prefix = "/api"
            upstream = "http://127.0.0.1:3000"
            "#,
        )
        .unwrap();

        let chain = build_pipeline(&config, build_session_manager(&config)).unwrap();
        assert_eq!(chain.len(), 8);
    }
}
