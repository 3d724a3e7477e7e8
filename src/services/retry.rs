//! Backoff schedule for part uploads and other idempotent calls.

use std::time::Duration;

use crate::errors::{ApiError, ErrorClass};

/// How failed requests are retried.
///
/// Transient transport failures and 5xx responses back off exponentially
/// from `base_delay`; 429 responses wait `rate_limit_delay` instead, since
/// the service is asking us to slow down rather than reporting a fault.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, or `None` when the error is final.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn next_delay(&self, attempt: u32, err: &ApiError) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match err.class() {
            ErrorClass::RateLimited => Some(self.rate_limit_delay),
            ErrorClass::Transient | ErrorClass::Server => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                Some(self.base_delay.saturating_mul(factor))
            }
            _ => None,
        }
    }
}
