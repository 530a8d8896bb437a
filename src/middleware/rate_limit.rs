//! Per-client, per-endpoint rate limiting with wait and cooldown escalation.
//!
//! # Algorithm
//!
//! Each `(client, endpoint)` pair has its own counters. A request is
//!
//! 1. **allowed** while fewer than `requests_limit` requests have been admitted,
//! 2. then **delayed** by `time_window` and admitted, up to `wait_request_limit`
//!    times,
//! 3. then **rejected**, which starts a cooldown. Every request for the pair
//!    is rejected until the cooldown ends and the counters reset to zero.
//!
//! Counters only ever reset through a cooldown; there is no sliding window.
//!
//! ```text
//!   count < limit ──► Allowed
//!        │
//!   wait < wait_limit ──► sleep(time_window) ──► AllowedAfterWait
//!        │
//!   cooldown ──► 429 ... cooldown_minutes ... ──► counters reset
//! ```
//!
//! # Concurrency
//!
//! Decisions are taken under a single mutex that is never held across an
//! await: a delayed request releases it before sleeping. The cooldown reset
//! runs as a detached task on the shared [`TaskTracker`]; only one is ever
//! scheduled per pair and cooldown, since the pair rejects outright until it
//! ends. If a request arrives after the cooldown expired but before the reset
//! task ran, the counters are reset inline.
//!
//! # Bypass
//!
//! In development, and for requests whose user agent is the configured
//! automated agent, the limiter admits everything and records nothing.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{Environment, RateLimitSettings};
use crate::metrics;
use crate::utils::add_minutes;

/// Bucket key: one client on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientEndpointKey {
    pub client: String,
    pub endpoint: String,
}

impl ClientEndpointKey {
    pub fn new(client: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Counters for a single bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateState {
    pub request_count: u32,
    pub wait_count: u32,
    pub cooldown_until: Option<Instant>,
}

impl RateState {
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// How a request got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Limiter skipped (development or automated agent).
    Bypassed,
    Allowed,
    /// Admitted after sleeping one time window.
    AllowedAfterWait,
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The pair is already cooling down.
    CooldownActive,
    /// This request exhausted the wait allowance and started a cooldown.
    CooldownStarted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::CooldownActive => write!(f, "cooldown active"),
            RejectReason::CooldownStarted => write!(f, "wait limit reached, cooldown started"),
        }
    }
}

/// Rejection raised by [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded for {client} on {endpoint}: {reason}")]
pub struct RateLimited {
    pub client: String,
    pub endpoint: String,
    pub reason: RejectReason,
}

enum Decision {
    Allow,
    Wait,
    Reject(RejectReason),
}

/// Shared rate limiter. Cloning shares the counters.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    bypass_all: bool,
    state: Arc<Mutex<HashMap<ClientEndpointKey, RateState>>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl RateLimiter {
    /// Limiter with its own task tracker. Bypasses everything in development.
    pub fn new(settings: RateLimitSettings, environment: Environment) -> Self {
        Self::with_tasks(
            settings,
            environment.is_development(),
            TaskTracker::new(),
            CancellationToken::new(),
        )
    }

    /// Limiter whose cooldown resets run on `tasks` and stop on `cancel`.
    pub fn with_tasks(
        settings: RateLimitSettings,
        bypass_all: bool,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            bypass_all,
            state: Arc::new(Mutex::new(HashMap::new())),
            tasks,
            cancel,
        }
    }

    /// Admit or reject one request from `client` on `endpoint`.
    ///
    /// May sleep for one time window before admitting.
    pub async fn check(
        &self,
        client: &str,
        endpoint: &str,
        automated: bool,
    ) -> Result<Admission, RateLimited> {
        if self.bypass_all || automated {
            debug!(client, endpoint, "Rate limiter bypassed");
            metrics::record_rate_limit_decision("bypassed");
            return Ok(Admission::Bypassed);
        }

        let key = ClientEndpointKey::new(client, endpoint);
        match self.decide(&key) {
            Decision::Allow => {
                metrics::record_rate_limit_decision("allowed");
                Ok(Admission::Allowed)
            }
            Decision::Wait => {
                debug!(
                    client,
                    endpoint,
                    wait_secs = self.settings.time_window.as_secs(),
                    "Request limit reached, delaying request"
                );
                metrics::record_rate_limit_decision("delayed");
                sleep(self.settings.time_window).await;
                Ok(Admission::AllowedAfterWait)
            }
            Decision::Reject(reason) => {
                warn!(client, endpoint, %reason, "Request rejected by rate limiter");
                metrics::record_rate_limit_decision("rejected");
                Err(RateLimited {
                    client: key.client,
                    endpoint: key.endpoint,
                    reason,
                })
            }
        }
    }

    fn decide(&self, key: &ClientEndpointKey) -> Decision {
        let now = Instant::now();
        let mut buckets = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = buckets.entry(key.clone()).or_default();

        if state.in_cooldown(now) {
            return Decision::Reject(RejectReason::CooldownActive);
        }
        if state.cooldown_until.is_some() {
            // Expired before its reset task got to it.
            *state = RateState::default();
        }

        if state.request_count < self.settings.requests_limit {
            state.request_count += 1;
            return Decision::Allow;
        }
        if state.wait_count < self.settings.wait_request_limit {
            state.wait_count += 1;
            return Decision::Wait;
        }

        let until = now + self.settings.cooldown();
        state.cooldown_until = Some(until);
        drop(buckets);

        self.schedule_reset(key.clone(), until);
        Decision::Reject(RejectReason::CooldownStarted)
    }

    fn schedule_reset(&self, key: ClientEndpointKey, until: Instant) {
        info!(
            client = %key.client,
            endpoint = %key.endpoint,
            cooldown_minutes = self.settings.cooldown_minutes,
            until = %add_minutes(i64::from(self.settings.cooldown_minutes)),
            "Cooldown started"
        );
        metrics::record_cooldown_started();

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(client = %key.client, endpoint = %key.endpoint, "Cooldown reset cancelled");
                }
                () = sleep_until(until) => {
                    let mut buckets = state.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(bucket) = buckets.get_mut(&key)
                        && bucket.cooldown_until == Some(until)
                    {
                        *bucket = RateState::default();
                        info!(client = %key.client, endpoint = %key.endpoint, "Cooldown over, counters reset");
                    }
                }
            }
        });
    }

    /// Current counters for a pair, if it has been seen.
    pub fn snapshot(&self, client: &str, endpoint: &str) -> Option<RateState> {
        let buckets = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        buckets
            .get(&ClientEndpointKey::new(client, endpoint))
            .copied()
    }

    /// Number of pairs with counters.
    pub fn tracked_keys(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cooldown resets scheduled and not yet finished.
    pub fn pending_resets(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use tokio::task::JoinSet;

    use super::*;

    fn settings(requests_limit: u32, wait_request_limit: u32) -> RateLimitSettings {
        RateLimitSettings {
            requests_limit,
            time_window: Duration::from_secs(60),
            wait_request_limit,
            cooldown_minutes: 1,
        }
    }

    fn limiter(requests_limit: u32, wait_request_limit: u32) -> RateLimiter {
        RateLimiter::new(
            settings(requests_limit, wait_request_limit),
            Environment::Production,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit_then_delays() {
        let limiter = limiter(2, 1);

        for _ in 0..2 {
            let start = Instant::now();
            assert_eq!(
                limiter.check("1.2.3.4", "/demo", false).await,
                Ok(Admission::Allowed)
            );
            assert_eq!(start.elapsed(), Duration::ZERO);
        }

        let start = Instant::now();
        assert_eq!(
            limiter.check("1.2.3.4", "/demo", false).await,
            Ok(Admission::AllowedAfterWait)
        );
        assert!(start.elapsed() >= Duration::from_secs(60));

        let state = limiter.snapshot("1.2.3.4", "/demo").unwrap();
        assert_eq!(state.request_count, 2);
        assert_eq!(state.wait_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_wait_starts_single_cooldown() {
        let limiter = limiter(1, 1);

        limiter.check("c", "/e", false).await.unwrap();
        limiter.check("c", "/e", false).await.unwrap();

        let err = limiter.check("c", "/e", false).await.unwrap_err();
        assert_eq!(err.reason, RejectReason::CooldownStarted);
        assert_eq!(limiter.pending_resets(), 1);

        for _ in 0..5 {
            let err = limiter.check("c", "/e", false).await.unwrap_err();
            assert_eq!(err.reason, RejectReason::CooldownActive);
        }
        assert_eq!(limiter.pending_resets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_reset_after_cooldown() {
        let limiter = limiter(1, 0);

        limiter.check("c", "/e", false).await.unwrap();
        assert!(limiter.check("c", "/e", false).await.is_err());
        assert!(
            limiter
                .snapshot("c", "/e")
                .unwrap()
                .in_cooldown(Instant::now())
        );

        sleep(Duration::from_secs(61)).await;

        assert_eq!(limiter.snapshot("c", "/e").unwrap(), RateState::default());
        assert_eq!(limiter.pending_resets(), 0);
        assert_eq!(
            limiter.check("c", "/e", false).await,
            Ok(Admission::Allowed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cooldown_resets_inline() {
        let tasks = TaskTracker::new();
        let cancel = CancellationToken::new();
        let limiter = RateLimiter::with_tasks(settings(1, 0), false, tasks.clone(), cancel.clone());

        limiter.check("c", "/e", false).await.unwrap();
        assert!(limiter.check("c", "/e", false).await.is_err());

        // Stop the reset task so only the inline path can clear the cooldown.
        cancel.cancel();
        tasks.close();
        tasks.wait().await;
        sleep(Duration::from_secs(61)).await;

        assert_eq!(
            limiter.check("c", "/e", false).await,
            Ok(Admission::Allowed)
        );
        assert_eq!(limiter.snapshot("c", "/e").unwrap().request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buckets_are_isolated() {
        let limiter = limiter(1, 0);

        limiter.check("a", "/one", false).await.unwrap();
        assert!(limiter.check("a", "/one", false).await.is_err());

        assert_eq!(
            limiter.check("a", "/two", false).await,
            Ok(Admission::Allowed)
        );
        assert_eq!(
            limiter.check("b", "/one", false).await,
            Ok(Admission::Allowed)
        );
        assert_eq!(limiter.tracked_keys(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_development_and_automated_agent_bypass() {
        let dev = RateLimiter::new(settings(1, 0), Environment::Development);
        for _ in 0..10 {
            assert_eq!(
                dev.check("c", "/e", false).await,
                Ok(Admission::Bypassed)
            );
        }
        assert_eq!(dev.tracked_keys(), 0);

        let prod = limiter(1, 0);
        for _ in 0..10 {
            assert_eq!(
                prod.check("c", "/e", true).await,
                Ok(Admission::Bypassed)
            );
        }
        assert!(prod.snapshot("c", "/e").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_respect_limits() {
        let limiter = limiter(30, 10);
        let mut set = JoinSet::new();

        for _ in 0..45 {
            let limiter = limiter.clone();
            set.spawn(async move { limiter.check("10.0.0.1", "/backend/demo", false).await });
        }

        let mut allowed = 0;
        let mut delayed = 0;
        let mut rejected = 0;
        while let Some(result) = set.join_next().await {
            match result.unwrap() {
                Ok(Admission::Allowed) => allowed += 1,
                Ok(Admission::AllowedAfterWait) => delayed += 1,
                Ok(Admission::Bypassed) => panic!("limiter should not bypass"),
                Err(_) => rejected += 1,
            }
        }

        assert_eq!(allowed, 30);
        assert_eq!(delayed, 10);
        assert_eq!(rejected, 5);
    }

    #[test]
    fn test_rate_limited_display() {
        let err = RateLimited {
            client: "1.2.3.4".to_string(),
            endpoint: "/demo".to_string(),
            reason: RejectReason::CooldownActive,
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for 1.2.3.4 on /demo: cooldown active"
        );
    }
}
