use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};

/// Default socket timeout for the first attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);
/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 1;
/// Default backoff multiplier (no growth).
pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 1.0;

/// Attempt budget and per-attempt timeout for one request.
///
/// The network layer consults `current_timeout` before every attempt and
/// calls `retry` after every retryable failure; the policy either absorbs the
/// error (another attempt will run) or gives it back, which ends the request.
pub trait RetryPolicy: Send {
    /// Timeout the transport must apply to the next attempt.
    fn current_timeout(&self) -> Duration;

    /// Number of retries consumed so far.
    fn retry_count(&self) -> u32;

    /// Registers a failed attempt. Returns `Ok(())` when another attempt may
    /// run, or `Err(error)` once the budget is exhausted.
    fn retry(&mut self, error: Error) -> Result<()>;
}

/// The stock [`RetryPolicy`]: a fixed retry budget with exponential timeout
/// growth.
///
/// After each absorbed failure the per-attempt timeout grows by
/// `timeout × backoff_multiplier`. The total number of attempts is
/// `max_retries + 1`.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    current_timeout: Duration,
    retry_count: u32,
    max_retries: u32,
    backoff_multiplier: f32,
}

impl DefaultRetryPolicy {
    /// Creates a policy with an explicit timeout, retry budget, and backoff
    /// multiplier.
    pub fn new(
        initial_timeout: Duration,
        max_retries: u32,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            current_timeout: initial_timeout,
            retry_count: 0,
            max_retries,
            backoff_multiplier,
        }
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_MULTIPLIER)
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn retry(&mut self, error: Error) -> Result<()> {
        if self.retry_count + 1 > self.max_retries {
            return Err(error);
        }
        self.current_timeout +=
            self.current_timeout.mul_f32(self.backoff_multiplier);
        self.retry_count += 1;
        debug!(
            "retry {}/{} scheduled, next timeout {:?}",
            self.retry_count, self.max_retries, self.current_timeout
        );
        Ok(())
    }
}
