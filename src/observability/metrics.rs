//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, throttling, defects)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_throttled_total` (counter): rejected requests by partition
//! - `gateway_runtime_exceptions_total` (counter): defects turned into 500s
//! - `gateway_session_save_failures_total` (counter): failed session saves
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps tests quiet

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its HTTP listener on `addr`.
///
/// Must be called from within the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install Prometheus recorder");
        }
    }
}

fn describe_metrics() {
    describe_counter!("gateway_requests_total", "Total number of requests handled");
    describe_histogram!(
        "gateway_request_duration_seconds",
        "Time from receiving a request to producing its response"
    );
    describe_counter!("gateway_throttled_total", "Requests rejected by the throttle");
    describe_counter!(
        "gateway_runtime_exceptions_total",
        "Defects converted into 500 responses"
    );
    describe_counter!(
        "gateway_session_save_failures_total",
        "Session saves that failed and were logged"
    );
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_throttled(partition: &str) {
    counter!("gateway_throttled_total", "partition" => partition.to_string()).increment(1);
}

pub fn record_runtime_exception() {
    counter!("gateway_runtime_exceptions_total").increment(1);
}

pub fn record_session_save_failure() {
    counter!("gateway_session_save_failures_total").increment(1);
}
