//! Retry policy with capped exponential backoff.
//!
//! `RetryPolicy::run` re-invokes an async operation while it fails with a
//! retryable error. The delay before retry `n` (1-based) is
//! `min(base_delay * 2^(n-1), max_delay)`. Non-retryable errors and the
//! error of the final attempt are returned unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use stackflow_types::config::RetrySettings;
use stackflow_types::error::ActionError;

// ---------------------------------------------------------------------------
// Retryable
// ---------------------------------------------------------------------------

/// Classifies an error as eligible for another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ActionError {
    fn is_retryable(&self) -> bool {
        ActionError::is_retryable(self)
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_retries, settings.base_delay(), settings.max_delay())
    }

    /// Same backoff, different retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retry budget is spent.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt > self.max_retries => {
                    tracing::debug!(attempt, error = %e, "retry budget exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = super::saturating_millis(delay),
                        error = %e,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
