use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::AuthConfig;

/// Bounded retry with a fixed delay between attempts.
///
/// Every error is retried the same way; the policy only wraps the login
/// flow, never ordinary API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: cfg.retry_delay(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Runs `op` up to `max_retries + 1` times, passing the zero-based
    /// attempt number, and returns the first success or the last error.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries => {
                    tracing::warn!(
                        target: "auth",
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "login attempt failed; retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
