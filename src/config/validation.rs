//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that URLs, addresses and regexes parse
//! - Validate value ranges (throttle rate > 0)
//! - Detect cookie names classified twice
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use axum::http::{HeaderName, Method};
use regex::Regex;
use url::Url;

use crate::config::schema::GatewayConfig;

/// One problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `routes[0].upstream`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `config`, returning every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.upstream_secs == 0 {
        errors.push(ValidationError::new("timeouts.upstream_secs", "must be greater than 0"));
    }
    if (config.entity.memory_limit as u64) > config.entity.file_limit {
        errors.push(ValidationError::new(
            "entity.memory_limit",
            "must not exceed entity.file_limit",
        ));
    }

    if config.transaction_id.enabled
        && HeaderName::try_from(config.transaction_id.header.as_str()).is_err()
    {
        errors.push(ValidationError::new("transaction_id.header", "not a valid header name"));
    }

    if config.throttle.enabled {
        if config.throttle.requests == 0 {
            errors.push(ValidationError::new("throttle.requests", "must be greater than 0"));
        }
        if config.throttle.duration_ms == 0 {
            errors.push(ValidationError::new("throttle.duration_ms", "must be greater than 0"));
        }
    }

    if config.cookies.enabled {
        let mut seen: HashMap<String, &str> = HashMap::new();
        let lists = [
            ("managed", &config.cookies.managed),
            ("suppressed", &config.cookies.suppressed),
            ("relayed", &config.cookies.relayed),
        ];
        for (list, names) in lists {
            for name in names {
                let key = name.to_ascii_lowercase();
                match seen.get(&key) {
                    Some(first) if *first != list => errors.push(ValidationError::new(
                        format!("cookies.{}", list),
                        format!("cookie {} is also listed in cookies.{}", name, first),
                    )),
                    _ => {
                        seen.insert(key, list);
                    }
                }
            }
        }
    }

    if config.basic_auth.enabled {
        if config.basic_auth.username.is_empty() {
            errors.push(ValidationError::new("basic_auth.username", "must not be empty"));
        }
        if config.basic_auth.username.contains(':') {
            errors.push(ValidationError::new("basic_auth.username", "must not contain ':'"));
        }
    }

    if config.password_replay.enabled {
        validate_password_replay(config, &mut errors);
    }

    for (i, route) in config.routes.iter().enumerate() {
        let field = format!("routes[{}]", i);
        if route.name.is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        }
        if route.upstream.is_empty() {
            errors.push(ValidationError::new(format!("{}.upstream", field), "must not be empty"));
        } else {
            match Url::parse(&route.upstream) {
                Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
                Ok(_) => errors.push(ValidationError::new(
                    format!("{}.upstream", field),
                    "must be an http URL with a host",
                )),
                Err(e) => errors.push(ValidationError::new(
                    format!("{}.upstream", field),
                    format!("invalid URL {}: {}", route.upstream, e),
                )),
            }
        }
        if let Some(prefix) = &route.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::new(
                    format!("{}.path_prefix", field),
                    "must start with '/'",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_password_replay(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let replay = &config.password_replay;
    if replay.login_path.is_none() && replay.content_marker.is_none() {
        errors.push(ValidationError::new(
            "password_replay",
            "needs login_path or content_marker",
        ));
    }
    if let Some(marker) = &replay.content_marker {
        if let Err(e) = Regex::new(marker) {
            errors.push(ValidationError::new(
                "password_replay.content_marker",
                format!("invalid regex: {}", e),
            ));
        }
    }
    if replay.login_method.parse::<Method>().is_err() {
        errors.push(ValidationError::new("password_replay.login_method", "not an HTTP method"));
    }
    if let Err(e) = Url::parse("http://localhost/").and_then(|base| base.join(&replay.login_uri)) {
        errors.push(ValidationError::new(
            "password_replay.login_uri",
            format!("invalid URI: {}", e),
        ));
    }
    for (i, extraction) in replay.extractions.iter().enumerate() {
        match Regex::new(&extraction.pattern) {
            Ok(regex) if regex.captures_len() < 2 => errors.push(ValidationError::new(
                format!("password_replay.extractions[{}].pattern", i),
                "needs one capture group",
            )),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new(
                format!("password_replay.extractions[{}].pattern", i),
                format!("invalid regex: {}", e),
            )),
        }
    }
}
