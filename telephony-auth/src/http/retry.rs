//! Backoff for transient telephony failures (5xx, 408, 429, connect errors).

use std::time::{Duration, SystemTime};

use reqwest_retry::{RetryDecision, RetryPolicy};

/// Doubling backoff with a ceiling; `max_retries = 0` disables retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    max_retries: u32,
    first_delay: Duration,
    ceiling: Duration,
}

impl BackoffPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            first_delay: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
        }
    }

    /// Delay before retry number `past_retries + 1`.
    fn delay_for(&self, past_retries: u32) -> Duration {
        let factor = 2u32.saturating_pow(past_retries);
        self.first_delay
            .checked_mul(factor)
            .map_or(self.ceiling, |delay| delay.min(self.ceiling))
    }
}

impl RetryPolicy for BackoffPolicy {
    fn should_retry(&self, _request_start_time: SystemTime, n_past_retries: u32) -> RetryDecision {
        if n_past_retries >= self.max_retries {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry {
            execute_after: SystemTime::now() + self.delay_for(n_past_retries),
        }
    }
}
