//! Bounded exponential backoff for part transfers.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::UploadError;

/// How often, and how patiently, a failed part is resent.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0)` so parallel
    /// parts do not resend in lockstep.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Delay before resend number `retry + 1`, before jitter.
    fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `attempt` (given its zero-based number) until it succeeds, fails
    /// with an error that is not worth repeating, or the retry budget is spent.
    /// The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, mut attempt: F) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut retry = 0;

        loop {
            let error = match attempt(retry).await {
                Ok(value) => {
                    if retry > 0 {
                        debug!(retries = retry, "Succeeded after resending");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if retry >= self.config.max_retries {
                if self.config.max_retries > 0 {
                    warn!(retries = retry, error = %error, "Retry budget exhausted");
                }
                return Err(error);
            }

            let delay = self.delay(retry);
            debug!(
                attempt = retry,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.config.base_delay(retry);
        if !self.config.use_jitter {
            return base;
        }
        let factor = 0.5 + rand::random::<f64>() * 0.5;
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }
}
