use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use common::{Error, Result, RetrySettings};

/// Bounded retry with exponential backoff.
///
/// Shared by order placement, recovery and the feed's reconnect loop: the
/// delay before retry `n` (0-based) is `base * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::MAX,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or `max_attempts` is used up.
    ///
    /// `op` receives the 0-based attempt number. A non-retryable error is
    /// returned as is; exhaustion returns `Error::RetriesExhausted` wrapping
    /// the last error.
    pub async fn run<T, F, Fut, P>(&self, operation: &str, mut op: F, is_retryable: P) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_retryable(&err) {
                warn!(operation, attempt = attempt + 1, error = %err, "Non-retryable failure");
                return Err(err);
            }

            if attempt + 1 >= self.max_attempts {
                error!(operation, attempts = self.max_attempts, error = %err, "Max retries reached");
                return Err(Error::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: self.max_attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                operation,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay = ?delay,
                error = %err,
                "Retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        RetryPolicy::new(settings.max_attempts, settings.base_delay())
    }
}
