//! Retry with exponential backoff for opening provider streams
//!
//! Only the *opening* of a streaming request is retried: once the first event
//! has been handed to the caller the sequence cannot be replayed, so any
//! failure after that point ends the turn.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chat_playground::retry::{retry_with_backoff_conditional, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(250));
//!
//! let value = retry_with_backoff_conditional(config, || async {
//!     Ok::<_, chat_playground::Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first; 1 disables retrying
    pub max_attempts: u32,

    pub initial_delay: Duration,

    pub max_delay: Duration,

    /// Delay multiplier per attempt (2.0 doubles it)
    pub backoff_multiplier: f64,

    /// Random spread around the computed delay, 0.0 to 1.0
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-based), capped and jittered
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponential = base_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let delay = capped + jitter - (jitter_range / 2.0);

        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// Transient failures: transport errors, timeouts, rate limiting and 5xx.
///
/// Configuration problems, 4xx responses other than 429 and malformed bodies
/// are permanent and never retried.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Http(e) => !e.is_builder() && !e.is_decode(),
        Error::Timeout => true,
        Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// Returns the first permanent error as-is, otherwise the last transient one.
pub async fn retry_with_backoff_conditional<F, Fut, T>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable_error(&err) {
                    return Err(err);
                }

                if attempt + 1 < attempts {
                    let delay = config.calculate_delay(attempt);
                    log::warn!(
                        "Attempt {}/{} failed ({}); retrying in {:?}",
                        attempt + 1,
                        attempts,
                        err,
                        delay
                    );
                    sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("Retry failed with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(5))
            .with_jitter_factor(0.0)
    }

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(3.0);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(2));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 1.0);
    }

    #[test]
    fn test_calculate_delay_grows_and_caps() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_jitter_factor(0.0);

        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(5), Duration::from_millis(300));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::timeout()));
        assert!(is_retryable_error(&Error::api(429, "slow down")));
        assert!(is_retryable_error(&Error::api(503, "unavailable")));
        assert!(!is_retryable_error(&Error::api(401, "bad key")));
        assert!(!is_retryable_error(&Error::api(400, "bad request")));
        assert!(!is_retryable_error(&Error::config("no key")));
        assert!(!is_retryable_error(&Error::malformed("no choices")));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff_conditional(fast(3), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Error::api(502, "bad gateway"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> = retry_with_backoff_conditional(fast(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::api(401, "unauthorized")) }
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(401));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> = retry_with_backoff_conditional(fast(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::timeout()) }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
