//! Prometheus metrics.
//!
//! Exposed on a dedicated listener when `METRICS_PORT` is non-zero.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Requests through the pipeline (labels: endpoint, method, status)
//! - `gateway_rate_limit_decisions_total` - Limiter outcomes (label: decision)
//! - `gateway_cooldowns_started_total` - Cooldowns imposed by the limiter
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - Request duration (labels: endpoint, method, status)
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "gateway_rate_limit_decisions_total";
    pub const COOLDOWNS_STARTED_TOTAL: &str = "gateway_cooldowns_started_total";
}

/// Install the Prometheus exporter listening on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Total number of requests handled by the gateway pipeline"
    );
    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limiter outcomes (allowed, delayed, rejected, bypassed)"
    );
    describe_counter!(
        names::COOLDOWNS_STARTED_TOTAL,
        "Total number of client/endpoint cooldowns started"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialise metrics, logging failures instead of returning them.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a finished request.
pub fn record_request(endpoint: &str, method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record a rate limiter outcome.
pub fn record_rate_limit_decision(decision: &'static str) {
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "decision" => decision).increment(1);
}

pub fn record_cooldown_started() {
    counter!(names::COOLDOWNS_STARTED_TOTAL).increment(1);
}
