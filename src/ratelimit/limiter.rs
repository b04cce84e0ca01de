//! Per-platform adaptive rate limiter
//!
//! One [`RateLimiter`] owns one platform's [`RateLimitState`]. Callers suspend in
//! [`RateLimiter::acquire`] until the current window has budget; throttling
//! signals from the platform raise a backoff multiplier that shrinks the next
//! windows' budget, and a run of successes decays it back toward 1.0.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backoff::BackoffPolicy;
use crate::config::{RateLimitConfig, RetryConfig};
use crate::error::{PlatformError, RetryableError};
use crate::models::RateLimitState;

/// Multiplier growth per observed throttle
const THROTTLE_GROWTH: f64 = 2.0;

#[derive(Debug)]
struct LimiterInner {
    state: RateLimitState,
    success_streak: u32,
}

/// Rate limiter for one platform
#[derive(Debug)]
pub struct RateLimiter {
    platform: String,
    limits: RateLimitConfig,
    retry: RetryConfig,
    backoff: BackoffPolicy,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    /// Create a limiter for `platform`
    pub fn new(platform: impl Into<String>, limits: RateLimitConfig, retry: RetryConfig) -> Self {
        let state = RateLimitState::new(limits.requests_per_interval);
        Self {
            platform: platform.into(),
            backoff: BackoffPolicy::from_config(&retry),
            limits,
            retry,
            inner: Mutex::new(LimiterInner {
                state,
                success_streak: 0,
            }),
        }
    }

    /// Create a limiter with default limits
    pub fn with_defaults(platform: impl Into<String>) -> Self {
        Self::new(platform, RateLimitConfig::default(), RetryConfig::default())
    }

    /// Platform tag this limiter belongs to
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Retry settings used by [`RateLimiter::retry`]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Snapshot of the current state
    pub fn state(&self) -> RateLimitState {
        self.lock().state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LimiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Budget for a fresh window under the current multiplier
    fn effective_budget(state: &RateLimitState) -> u32 {
        let scaled = (state.requests_limit as f64 / state.current_backoff_multiplier).floor();
        (scaled as u32).clamp(1, state.requests_limit)
    }

    /// Start a new window; limits lowered by platform headers last one window
    fn refill(&self, state: &mut RateLimitState, now: Instant) {
        state.requests_limit = self.limits.requests_per_interval.max(1);
        state.requests_remaining = Self::effective_budget(state);
        state.reset_at = now + self.limits.interval();
    }

    /// Wait for a slot in the current window and consume it
    ///
    /// Never fails; only suspends until the window resets.
    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut inner = self.lock();
                let now = Instant::now();
                if now >= inner.state.reset_at {
                    self.refill(&mut inner.state, now);
                }
                if inner.state.requests_remaining > 0 {
                    inner.state.requests_remaining -= 1;
                    inner.state.total_requests += 1;
                    return;
                }
                inner.state.reset_at
            };

            debug!(
                platform = %self.platform,
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate limit budget exhausted, waiting for window reset"
            );
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Reconcile with the platform's own rate-limit metadata
    ///
    /// The smaller of the two remaining counts is kept. A reported limit lower
    /// than the configured one lowers `requests_limit`. When the platform says
    /// nothing is left, the window is held closed until `reset_in` elapses.
    pub fn report_rate_headers(&self, limit: u32, remaining: u32, reset_in: Option<Duration>) {
        let mut inner = self.lock();
        let state = &mut inner.state;

        if limit > 0 && limit < state.requests_limit {
            state.requests_limit = limit;
        }
        state.requests_remaining = state
            .requests_remaining
            .min(remaining)
            .min(state.requests_limit);

        if state.requests_remaining == 0 {
            if let Some(reset_in) = reset_in {
                let reset_at = Instant::now() + reset_in;
                if reset_at > state.reset_at {
                    state.reset_at = reset_at;
                }
            }
        }

        debug!(
            platform = %self.platform,
            limit,
            remaining = state.requests_remaining,
            "Reconciled platform rate-limit headers"
        );
    }

    /// Record a throttling signal from the platform
    fn record_throttle(&self, retry_after: Option<Duration>) {
        let mut inner = self.lock();
        inner.success_streak = 0;

        let state = &mut inner.state;
        state.throttled_requests += 1;
        state.current_backoff_multiplier = (state.current_backoff_multiplier * THROTTLE_GROWTH)
            .min(self.limits.max_backoff_multiplier.max(1.0));

        if let Some(hint) = retry_after {
            state.requests_remaining = 0;
            let hold_until = Instant::now() + hint;
            if hold_until > state.reset_at {
                state.reset_at = hold_until;
            }
        }

        warn!(
            platform = %self.platform,
            multiplier = state.current_backoff_multiplier,
            throttled = state.throttled_requests,
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "Platform throttled request"
        );
    }

    /// Record a successful call; a long enough streak decays the multiplier
    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state.current_backoff_multiplier <= 1.0 {
            inner.success_streak = 0;
            return;
        }

        inner.success_streak += 1;
        if inner.success_streak >= self.limits.decay_after_successes.max(1) {
            inner.success_streak = 0;
            let decayed = (inner.state.current_backoff_multiplier / THROTTLE_GROWTH).max(1.0);
            inner.state.current_backoff_multiplier = decayed;
            debug!(
                platform = %self.platform,
                multiplier = decayed,
                "Backoff multiplier decayed"
            );
        }
    }

    /// Run `operation` with the limiter's configured retry settings
    pub async fn retry<F, Fut, T>(&self, operation: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        self.with_retry(self.retry.max_retries, self.retry.base_delay(), operation)
            .await
    }

    /// Run `operation`, retrying retryable failures with backoff
    ///
    /// Every attempt first acquires a slot. Non-retryable errors propagate
    /// immediately. If the platform is still throttling after `max_retries`
    /// retries the result is [`PlatformError::RateLimitExceeded`] carrying the
    /// last observed state.
    pub async fn with_retry<F, Fut, T>(
        &self,
        max_retries: u32,
        base_delay: Duration,
        mut operation: F,
    ) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let policy = self.backoff.with_base_delay(base_delay);
        let mut attempt = 0u32;

        loop {
            self.acquire().await;

            let err = match operation().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_rate_limited() {
                self.record_throttle(err.retry_after());
            }

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= max_retries {
                warn!(
                    platform = %self.platform,
                    attempts = attempt + 1,
                    max_retries,
                    error = %err,
                    "Max retries exhausted"
                );
                if err.is_rate_limited() {
                    return Err(PlatformError::RateLimitExceeded {
                        platform: self.platform.clone(),
                        state: self.state(),
                    });
                }
                return Err(err);
            }

            let delay = policy.next_delay(attempt, err.retry_after());
            debug!(
                platform = %self.platform,
                attempt = attempt + 1,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after retryable error"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn limiter(requests: u32, interval_ms: u64) -> RateLimiter {
        RateLimiter::new(
            "shop-a",
            RateLimitConfig {
                requests_per_interval: requests,
                interval_ms,
                max_backoff_multiplier: 8.0,
                decay_after_successes: 3,
            },
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 100,
                max_delay_ms: 1000,
                backoff_factor: 2.0,
                jitter: false,
            },
        )
    }

    // Test 1: Acquire within budget does not wait
    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_budget() {
        let limiter = limiter(5, 1000);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        let state = limiter.state();
        assert_eq!(state.requests_remaining, 0);
        assert_eq!(state.total_requests, 5);
    }

    // Test 2: Acquire suspends until the window resets
    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_reset() {
        let limiter = limiter(2, 1000);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(1000));
        let state = limiter.state();
        assert_eq!(state.total_requests, 3);
        assert_eq!(state.requests_remaining, 1);
    }

    // Test 3: Reported headers keep the smaller remaining count
    #[tokio::test(start_paused = true)]
    async fn test_report_rate_headers_takes_smaller() {
        let limiter = limiter(10, 1000);
        limiter.acquire().await; // 9 left

        limiter.report_rate_headers(40, 3, None);
        assert_eq!(limiter.state().requests_remaining, 3);
        assert_eq!(limiter.state().requests_limit, 10);

        // Platform reporting more than we have does not raise the budget
        limiter.report_rate_headers(40, 39, None);
        assert_eq!(limiter.state().requests_remaining, 3);

        // A lower platform limit lowers ours
        limiter.report_rate_headers(2, 2, None);
        let state = limiter.state();
        assert_eq!(state.requests_limit, 2);
        assert_eq!(state.requests_remaining, 2);
    }

    // Test 4: Exhausted platform budget holds the window closed
    #[tokio::test(start_paused = true)]
    async fn test_report_rate_headers_zero_remaining_holds_window() {
        let limiter = limiter(10, 1000);
        limiter.acquire().await;

        limiter.report_rate_headers(10, 0, Some(Duration::from_secs(5)));

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    // Test 5: Remaining never negative and never above the limit
    #[tokio::test(start_paused = true)]
    async fn test_remaining_stays_in_bounds() {
        let limiter = limiter(4, 200);

        for step in 0..40u32 {
            if step % 3 == 0 {
                limiter.report_rate_headers(4 + step % 5, step % 7, Some(Duration::from_millis(50)));
            } else {
                limiter.acquire().await;
            }
            let state = limiter.state();
            assert!(state.requests_remaining <= state.requests_limit);
            assert!(state.requests_limit > 0);
            assert!(state.current_backoff_multiplier >= 1.0);
        }
    }

    // Test 6: 429 with Retry-After waits for the hint and then succeeds
    #[tokio::test(start_paused = true)]
    async fn test_with_retry_honors_retry_after() {
        let limiter = limiter(10, 1000);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = limiter
            .with_retry(3, Duration::from_millis(10), || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(PlatformError::RateLimited {
                            retry_after: Some(Duration::from_secs(2)),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));

        let state = limiter.state();
        assert_eq!(state.throttled_requests, 1);
        assert!(state.current_backoff_multiplier > 1.0);
    }

    // Test 7: Non-retryable errors propagate without retry
    #[tokio::test(start_paused = true)]
    async fn test_with_retry_non_retryable() {
        let limiter = limiter(10, 1000);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = limiter
            .with_retry(5, Duration::from_millis(10), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::Validation("bad price".to_string()))
                }
            })
            .await;

        assert_eq!(
            result,
            Err(PlatformError::Validation("bad price".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.state().throttled_requests, 0);
    }

    // Test 8: Exhausted retries under throttling yield RateLimitExceeded
    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausted() {
        let limiter = limiter(10, 1000);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = limiter
            .with_retry(2, Duration::from_millis(10), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::RateLimited { retry_after: None })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(PlatformError::RateLimitExceeded { platform, state }) => {
                assert_eq!(platform, "shop-a");
                assert_eq!(state.throttled_requests, 3);
                assert!((state.current_backoff_multiplier - 8.0).abs() < f64::EPSILON);
            }
            other => panic!("Expected RateLimitExceeded, got {:?}", other),
        }
    }

    // Test 9: Transient errors are retried and surfaced as-is on exhaustion
    #[tokio::test(start_paused = true)]
    async fn test_with_retry_transient() {
        let limiter = limiter(10, 1000);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = limiter
            .with_retry(1, Duration::from_millis(10), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::TransientNetwork("reset".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            result,
            Err(PlatformError::TransientNetwork("reset".to_string()))
        );
    }

    // Test 10: Multiplier shrinks the next window and decays after successes
    #[tokio::test(start_paused = true)]
    async fn test_multiplier_budget_and_decay() {
        let limiter = limiter(8, 1000);
        limiter.record_throttle(None);
        limiter.record_throttle(None);
        assert!((limiter.state().current_backoff_multiplier - 4.0).abs() < f64::EPSILON);

        // Next window: floor(8 / 4) = 2
        tokio::time::advance(Duration::from_millis(1001)).await;
        limiter.acquire().await;
        assert_eq!(limiter.state().requests_remaining, 1);

        for _ in 0..3 {
            limiter.record_success();
        }
        assert!((limiter.state().current_backoff_multiplier - 2.0).abs() < f64::EPSILON);

        for _ in 0..6 {
            limiter.record_success();
        }
        assert!((limiter.state().current_backoff_multiplier - 1.0).abs() < f64::EPSILON);
    }

    // Test 11: Retry uses configured settings
    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_config() {
        let limiter = limiter(10, 1000);
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = limiter
            .retry(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::Timeout(Duration::from_secs(1)))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    // Test 12: A lowered platform limit only lasts until the window resets
    #[tokio::test(start_paused = true)]
    async fn test_reported_limit_restored_next_window() {
        let limiter = limiter(10, 1000);
        limiter.acquire().await;

        limiter.report_rate_headers(3, 2, None);
        assert_eq!(limiter.state().requests_limit, 3);

        tokio::time::advance(Duration::from_millis(1000)).await;
        limiter.acquire().await;

        let state = limiter.state();
        assert_eq!(state.requests_limit, 10);
        assert_eq!(state.requests_remaining, 9);
    }
}
