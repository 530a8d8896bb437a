//! Shared application state for Axum handlers and the gateway pipeline.
//!
//! # Structured Concurrency
//!
//! Cooldown resets scheduled by the rate limiter run on the state's
//! `TaskTracker` and stop on its `CancellationToken`. Call `shutdown()` to
//! cancel and await them before exit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::Config;
use crate::logging::LoggerConfig;
use crate::middleware::auth::Authenticator;
use crate::middleware::rate_limit::RateLimiter;

/// Shared application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
    pub authenticator: Arc<Authenticator>,
    pub logger: Arc<LoggerConfig>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let rate_limiter = RateLimiter::with_tasks(
            config.rate_limit,
            config.environment.is_development(),
            task_tracker.clone(),
            cancellation_token.clone(),
        );
        let authenticator = Authenticator::new(&config.secret_key, config.access_token_ttl);
        let logger = LoggerConfig::from_config(&config);

        Self {
            config: Arc::new(config),
            rate_limiter,
            authenticator: Arc::new(authenticator),
            logger: Arc::new(logger),
            task_tracker,
            cancellation_token,
        }
    }

    /// Cancel pending cooldown resets and wait for them to finish.
    pub async fn shutdown(&self) {
        info!(
            pending = self.task_tracker.len(),
            "Initiating graceful shutdown of background tasks"
        );

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RateLimitSettings;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_cooldowns() {
        let config = Config {
            rate_limit: RateLimitSettings {
                requests_limit: 1,
                time_window: Duration::from_secs(1),
                wait_request_limit: 0,
                cooldown_minutes: 30,
            },
            ..Config::default()
        };
        let state = AppState::new(config);

        state.rate_limiter.check("c", "/e", false).await.unwrap();
        assert!(state.rate_limiter.check("c", "/e", false).await.is_err());
        assert_eq!(state.rate_limiter.pending_resets(), 1);

        let start = tokio::time::Instant::now();
        state.shutdown().await;

        assert_eq!(state.rate_limiter.pending_resets(), 0);
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
