//! Retry policy: decides backoff delays and when to give up.
//!
//! Both queue backends read the same policy, so the durable and the
//! fallback schedule cannot drift apart.

use std::time::Duration;

/// Retry policy for failed deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl Default for RetryPolicy {
    /// 5 attempts, 2s base, doubling: 2s, 4s, 8s, 16s between attempts.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for the next retry based on attempt number.
    ///
    /// `attempts` is the number of attempts already made (1-indexed).
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// With the default policy this is 2^attempts seconds:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - attempt 4: 16s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }

    /// Decide after a failed attempt. Non-retriable failures give up at once.
    pub fn decide(&self, attempts: u32, retriable: bool) -> RetryDecision {
        if retriable && attempts < self.max_attempts {
            RetryDecision::RetryAfter(self.next_delay(attempts))
        } else {
            RetryDecision::GiveUp
        }
    }
}
