//! Retry logic for remote calls.
//!
//! Every fetch, write and download the engine issues goes through
//! [`with_retry`]. The default policy is the platform's observed one:
//! three further attempts with a fixed five second pause. A call that
//! keeps failing is attempted `max_retries + 1` times and the last error
//! is handed back to the caller, which records it as an item failure.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_delay", with = "duration_ms", rename = "delay_ms")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay", with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt; 1.0 keeps the delay fixed.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(default_max_retries(), default_delay())
    }
}

impl RetryConfig {
    /// Fixed delay between attempts.
    #[must_use]
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: default_max_delay().max(delay),
            backoff_multiplier: 1.0,
        }
    }

    /// Creates a config with no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculates the delay before `attempt` (attempt 0 is the initial call).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before `attempt`, stretched to honor a server-provided wait.
    fn delay_after(&self, attempt: u32, error: &Error) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        match error {
            Error::RateLimit(secs) => delay
                .max(Duration::from_secs(*secs))
                .min(self.max_delay.max(delay)),
            _ => delay,
        }
    }
}

/// Executes an async operation, retrying transient failures.
///
/// Non-retryable errors (see [`Error::is_retryable`]) are returned
/// immediately without further attempts.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{}: succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_after(attempt, &e);
                warn!(
                    "{}: retryable error (attempt {}/{}), retrying in {:?}: {}",
                    operation_name,
                    attempt,
                    config.max_retries + 1,
                    delay,
                    e
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
