//! Clock and identity helpers shared by the logger, the rate limiter and the
//! request pipeline, plus process signal handling.

use chrono::{DateTime, FixedOffset, Offset, TimeDelta, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::signal;
use tracing::{error, warn};
use uuid::Uuid;

/// Offset used for every human-readable timestamp (IST, +05:30).
const DISPLAY_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Layout of formatted timestamps, millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn display_offset() -> FixedOffset {
    FixedOffset::east_opt(DISPLAY_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Format a UTC instant in the display offset, e.g. `2024-08-05 15:30:45.123`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&display_offset())
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Current wall-clock time, formatted.
pub fn current_datetime() -> String {
    format_timestamp(Utc::now())
}

/// Formatted wall-clock time `minutes` from now.
pub fn add_minutes(minutes: i64) -> String {
    format_timestamp(Utc::now() + TimeDelta::minutes(minutes))
}

/// Absolute distance between two instants in seconds, rounded to milliseconds.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds().unsigned_abs();
    millis as f64 / 1000.0
}

/// Fresh request id (UUID v4).
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Random alphanumeric identifier of `len` characters.
pub fn generate_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is a critical
/// initialization failure that should halt the application.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                panic!("Critical: cannot install Ctrl+C signal handler");
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                panic!("Critical: cannot install SIGTERM signal handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
