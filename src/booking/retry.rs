//! Retry policies, kept apart from the operations they retry.

use chrono::NaiveDateTime;
use log::debug;
use std::future::Future;
use std::time::Duration;

use crate::configuration::types::{FormRetrySettings, RetrySettings};

/// Exponential backoff with a bounded number of retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Runs the operation exactly once.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Pause after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Calls `op` with the attempt number until it succeeds, returns an error
    /// `is_retryable` rejects, or the retries are used up. The last error is
    /// returned unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {}/{} failed, retrying in {}ms",
                        attempt + 1,
                        self.max_attempts(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Retries of a whole court attempt after a failed form submission.
///
/// Before the nominal slot time the form is retried quickly; once the time
/// has passed there is less to race for and the pause is longer.
#[derive(Debug, Clone, PartialEq)]
pub struct FormRetryPolicy {
    pub max_retries: u32,
    pub delay_before_target: Duration,
    pub delay_after_target: Duration,
}

impl FormRetryPolicy {
    pub fn delay_at(&self, now: NaiveDateTime, target: NaiveDateTime) -> Duration {
        if now < target {
            self.delay_before_target
        } else {
            self.delay_after_target
        }
    }
}

impl From<&FormRetrySettings> for FormRetryPolicy {
    fn from(settings: &FormRetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            delay_before_target: Duration::from_millis(settings.delay_before_target_ms),
            delay_after_target: Duration::from_millis(settings.delay_after_target_ms),
        }
    }
}
