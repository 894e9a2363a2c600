//! Retry with exponential backoff for outbound calls.
//!
//! An operation is attempted up to `max_attempts` times. After a failed
//! attempt `i` (0-indexed) the requester sleeps `base_delay * 2^i` before the
//! next one, so with the default policy the waits are 1s then 2s. Nothing is
//! slept before the first attempt or after the last.
//!
//! Whether a failure is worth retrying is decided by the error itself through
//! [`Retryable`]. A non-retryable error ends the call immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::log::Logger;
use crate::{log_debug, log_error, log_info, log_warn};

/// Default number of attempts per outbound call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay unit; doubles after every failed attempt
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Classifies an error as transient (worth another attempt) or terminal.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Attempt count and delay unit for [`retry_with_backoff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed): `base * 2^attempt`
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Terminal outcome of a retried call
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the error from the final attempt
    #[error("all retries failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error that must not be retried
    #[error("attempt {attempt} failed with a non-retryable error: {error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts that were made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The error returned by the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Runs `operation` until it succeeds, fails terminally, or runs out of attempts.
///
/// # Arguments
/// * `policy` - Attempt count and delay unit
/// * `logger` - Receives one event per attempt and per failure
/// * `label` - Names the call in log messages (e.g. a URL)
/// * `operation` - Produces a fresh future for each attempt
///
/// # Returns
/// * `Ok(T)` from the first successful attempt
/// * `Err(RetryError::Exhausted)` wrapping the final attempt's error
/// * `Err(RetryError::Aborted)` on the first non-retryable error
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    logger: &dyn Logger,
    label: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        log_debug!(logger, "{} attempt {}/{}", label, attempt + 1, attempts);

        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    log_info!(logger, "{} succeeded after {} retries", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            log_warn!(logger, "{} failed with non-retryable error: {}", label, error);
            return Err(RetryError::Aborted {
                attempt: attempt + 1,
                error,
            });
        }

        if attempt + 1 >= attempts {
            log_error!(logger, "{} failed: all {} attempts exhausted: {}", label, attempts, error);
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        }

        let delay = policy.delay_after_attempt(attempt);
        log_warn!(
            logger,
            "{} attempt {}/{} failed: {}; retrying in {:?}",
            label,
            attempt + 1,
            attempts,
            error,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
