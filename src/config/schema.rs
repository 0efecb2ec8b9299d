//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::spill::{SpillLimits, DEFAULT_FILE_LIMIT, DEFAULT_MEMORY_LIMIT};
use crate::filter::cookie::{CookieAction, CookiePolicy};
use crate::filter::transaction_id::DEFAULT_HEADER;
use crate::session::memory::DEFAULT_COOKIE_NAME;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Boundary and upstream timeouts.
    pub timeouts: TimeoutConfig,

    /// Body buffering limits.
    pub entity: EntityConfig,

    /// Session store settings.
    pub session: SessionConfig,

    pub transaction_id: TransactionIdConfig,

    /// Token-bucket throttling.
    pub throttle: ThrottleConfig,

    /// Cookie management.
    pub cookies: CookieConfig,

    /// HTTP Basic credentials sent upstream.
    pub basic_auth: BasicAuthConfig,

    /// Login form replay.
    pub password_replay: PasswordReplayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Route definitions mapping requests to upstreams.
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for one exchange at the boundary, in seconds.
    pub request_secs: u64,

    /// Time allowed for the upstream to answer, in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn upstream(&self) -> Duration {
        Duration::from_secs(self.upstream_secs)
    }
}

/// Entity buffering limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Bytes kept in memory per buffer before spilling to a temporary file.
    pub memory_limit: usize,

    /// Maximum bytes a buffer may hold in total.
    pub file_limit: u64,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            file_limit: DEFAULT_FILE_LIMIT,
        }
    }
}

impl EntityConfig {
    pub fn limits(&self) -> SpillLimits {
        SpillLimits {
            memory_limit: self.memory_limit,
            file_limit: self.file_limit,
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session id.
    pub cookie_name: String,

    /// Sessions idle for longer than this are discarded, in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            idle_timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionIdConfig {
    pub enabled: bool,

    /// Header carrying the id in both directions.
    pub header: String,
}

impl Default for TransactionIdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header: DEFAULT_HEADER.to_string(),
        }
    }
}

/// How requests are grouped into buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePartition {
    /// One bucket for all traffic.
    #[default]
    None,
    /// One bucket per remote IP address.
    ClientIp,
}

/// Throttling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,

    /// Requests allowed per window.
    pub requests: u64,

    /// Window length in milliseconds.
    pub duration_ms: u64,

    pub partition: ThrottlePartition,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests: 100,
            duration_ms: 1000,
            partition: ThrottlePartition::None,
        }
    }
}

/// Cookie filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CookieConfig {
    pub enabled: bool,

    /// Cookie names kept server-side in the session jar.
    pub managed: Vec<String>,

    /// Cookie names removed in both directions.
    pub suppressed: Vec<String>,

    /// Cookie names passed through untouched.
    pub relayed: Vec<String>,

    /// Action for names in none of the lists.
    pub default_action: CookieAction,

    pub policy: CookiePolicy,
}

/// Basic auth configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BasicAuthConfig {
    pub enabled: bool,
    pub username: String,
    pub password: String,

    /// Keep encoded credentials in the session between requests.
    pub cache_header: bool,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            username: String::new(),
            password: String::new(),
            cache_header: true,
        }
    }
}

/// One login form field. `{name}` in `value` is replaced by the extracted
/// attribute `name`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormFieldConfig {
    pub name: String,
    pub value: String,
}

/// A value captured from the login page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    pub name: String,

    /// Regex whose first capture group is the value.
    pub pattern: String,
}

/// Password replay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordReplayConfig {
    pub enabled: bool,

    /// Requests under this path are login pages.
    pub login_path: Option<String>,

    /// Responses whose body matches this regex are login pages.
    pub content_marker: Option<String>,

    /// Where the login form is sent, absolute or relative to the request.
    pub login_uri: String,

    pub login_method: String,

    pub form: Vec<FormFieldConfig>,

    pub extractions: Vec<ExtractionConfig>,
}

impl Default for PasswordReplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            login_path: None,
            content_marker: None,
            login_uri: "/login".to_string(),
            login_method: "POST".to_string(),
            form: Vec::new(),
            extractions: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Route configuration mapping requests to an upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Host header to match (exact match, port ignored).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Upstream base URL (e.g., "http://127.0.0.1:3000"); its path is
    /// prepended to the request path.
    pub upstream: String,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}
