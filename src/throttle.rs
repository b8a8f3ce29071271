//! Shared throttling for outbound model calls.
//!
//! A [`RateLimiter`] bounds how many calls run at once, spaces call starts by a minimum delay,
//! applies a per-call timeout, and retries retryable failures with exponential backoff. One
//! limiter is built from [`ThrottleConfig`] at construction time and shared through `Arc` by the
//! embedding gateway, the generation client wrappers, and the retrieval fan-out.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Throttling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Maximum number of calls in flight.
    pub max_concurrent: usize,
    /// Minimum spacing between consecutive call starts.
    pub min_delay: Duration,
    /// Maximum number of items submitted together by batching callers.
    pub max_batch_size: usize,
    /// Timeout applied to each individual attempt.
    pub call_timeout: Duration,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the exponential backoff delay.
    pub max_backoff: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            min_delay: Duration::from_millis(100),
            max_batch_size: 16,
            call_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Classifies failures that are worth retrying (rate limits, timeouts, transient outages).
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Terminal outcome of a throttled call that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt exceeded the per-call timeout.
    TimedOut {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// Retryable failures persisted past the retry budget.
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// Error returned by the final attempt.
        last_error: E,
    },
    /// The call failed with an error that retrying cannot fix.
    Rejected(E),
    /// The limiter was shut down while the call waited for a permit.
    Closed,
}

impl<E> RetryError<E> {
    /// Return the underlying call error, when one exists.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::Rejected(error) => Some(error),
            Self::TimedOut { .. } | Self::Closed => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { attempts } => write!(f, "call timed out after {attempts} attempts"),
            Self::Exhausted {
                attempts,
                last_error,
            } => write!(f, "retries exhausted after {attempts} attempts: {last_error}"),
            Self::Rejected(error) => write!(f, "call rejected: {error}"),
            Self::Closed => f.write_str("rate limiter closed"),
        }
    }
}

impl<E> std::error::Error for RetryError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::Rejected(error) => Some(error),
            Self::TimedOut { .. } | Self::Closed => None,
        }
    }
}

/// Semaphore-backed limiter with call spacing, timeouts, and retries.
#[derive(Debug)]
pub struct RateLimiter {
    config: ThrottleConfig,
    permits: Semaphore,
    last_start: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Build a limiter from configuration.
    pub fn new(config: ThrottleConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            config,
            permits,
            last_start: Mutex::new(None),
        }
    }

    /// Configuration the limiter was built with.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Run `operation` under the limiter, retrying retryable failures.
    ///
    /// Each attempt holds one permit for its whole duration and starts no sooner than
    /// `min_delay` after the previous attempt started.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let mut attempts = 0u32;
        let mut backoff = self.config.initial_backoff;

        loop {
            attempts += 1;
            let outcome = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| RetryError::Closed)?;
                self.wait_for_slot().await;
                tokio::time::timeout(self.config.call_timeout, operation()).await
            };

            let exhausted = attempts > self.config.max_retries;
            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) if !error.is_retryable() => {
                    return Err(RetryError::Rejected(error));
                }
                Ok(Err(error)) => {
                    if exhausted {
                        tracing::warn!(call = label, attempts, %error, "Retries exhausted");
                        return Err(RetryError::Exhausted {
                            attempts,
                            last_error: error,
                        });
                    }
                    tracing::debug!(
                        call = label,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        %error,
                        "Retrying call"
                    );
                }
                Err(_) => {
                    if exhausted {
                        tracing::warn!(call = label, attempts, "Call timed out");
                        return Err(RetryError::TimedOut { attempts });
                    }
                    tracing::debug!(call = label, attempts, "Call attempt timed out; retrying");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    async fn wait_for_slot(&self) {
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            let ready_at = previous + self.config.min_delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_start = Some(Instant::now());
    }
}
