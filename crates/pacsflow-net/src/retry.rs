//! Retry policy with capped exponential backoff
//!
//! Attempt 0 is the first execution. A transient failure is retried while
//! fewer than `max_attempts` retries have run, waiting `delay(n)` before
//! retry `n` (1-based). Fatal failures return at once. When retries run out
//! the last failure is returned together with the number of attempts made.

use pacsflow_core::config::RetrySettings;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Classifies a failure as worth retrying.
pub trait Transience {
    fn is_transient(&self) -> bool;
}

impl Transience for std::io::Error {
    fn is_transient(&self) -> bool {
        true
    }
}

/// One retry, as reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    /// 1-based retry number.
    pub attempt: u32,
    pub delay: Duration,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Non-transient failure; no retry was spent on it.
    #[error("{error}")]
    Fatal { attempts: u32, error: E },

    /// Transient failures used up every retry.
    #[error("{error} (gave up after {attempts} attempts)")]
    Exhausted { attempts: u32, error: E },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        use_exponential_backoff: bool,
    ) -> pacsflow_core::Result<Self> {
        if max_delay < initial_delay {
            return Err(pacsflow_core::Error::config(format!(
                "max retry delay {:?} is below initial delay {:?}",
                max_delay, initial_delay
            )));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            use_exponential_backoff,
        })
    }

    pub fn from_settings(settings: &RetrySettings) -> pacsflow_core::Result<Self> {
        Self::new(
            settings.max_retry_attempts,
            settings.initial_delay(),
            settings.max_delay(),
            settings.use_exponential_backoff,
        )
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            use_exponential_backoff: false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.initial_delay;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transience + std::fmt::Display,
    {
        self.execute_observed(cancel, op, |_| {}).await
    }

    /// Like `execute`, also handing each retry record to `observer`.
    pub async fn execute_observed<T, E, F, Fut, O>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        mut observer: O,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transience + std::fmt::Display,
        O: FnMut(&RetryRecord),
    {
        let mut retries = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: retries }),
                r = op() => r,
            };

            let error = match result {
                Ok(value) => {
                    if retries > 0 {
                        debug!(attempts = retries + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let attempts = retries + 1;
            if !error.is_transient() {
                return Err(RetryError::Fatal { attempts, error });
            }
            if retries >= self.max_attempts {
                warn!(attempts, error = %error, "Transient failure, retries exhausted");
                return Err(RetryError::Exhausted { attempts, error });
            }

            retries += 1;
            let delay = self.delay(retries);
            warn!(
                attempt = retries,
                max_retries = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            observer(&RetryRecord {
                attempt: retries,
                delay,
                error: error.to_string(),
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
