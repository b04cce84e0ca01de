//! Exponential backoff with jitter
//!
//! Delay for attempt `n` is `min(max_delay, base_delay * factor^n * jitter)`,
//! with jitter drawn from `0.5..1.5`. A platform-supplied retry-after hint
//! replaces the computed delay.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Backoff policy derived from a [`RetryConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,
    jitter: bool,
}

impl BackoffPolicy {
    /// Create a policy from retry settings
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            factor: config.backoff_factor.max(1.0),
            jitter: config.jitter,
        }
    }

    /// Same policy with a different base delay
    pub fn with_base_delay(&self, base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..self.clone()
        }
    }

    /// Delay before retry number `attempt` (0-based), ignoring hints
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let exp = self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let mut delay = self.base_delay.as_secs_f64() * exp;

        if self.jitter {
            delay *= rand::thread_rng().gen_range(0.5..1.5);
        }

        let capped = delay.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// Delay before retry number `attempt`, honoring a retry-after hint
    pub fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for(attempt))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
