//! Bounded retry with a pluggable delay schedule.
//!
//! Every retrying network interaction in the workspace (receipt polling,
//! contract reachability) goes through [`retry`], so the attempt budget,
//! the delay curve and the total-wait ceiling live in one place.

use std::future::Future;
use std::time::Duration;

use tracing::debug;
use walletx_core::{Backoff, RetrySettings};

use crate::cancel::CancelToken;

const MIN_DELAY: Duration = Duration::from_millis(1);

/// At least one attempt, a non-zero delay between attempts, and a ceiling on
/// the total time spent sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff: Backoff,
    max_delay: Duration,
    max_total_wait: Duration,
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        let delay = delay.max(MIN_DELAY);
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
            max_delay: delay,
            max_total_wait: delay.saturating_mul(max_attempts - 1),
        }
    }

    /// Doubling delay starting at `base`, capped at `max_delay`.
    pub fn exponential(max_attempts: u32, base: Duration, max_delay: Duration) -> Self {
        let mut policy = Self {
            max_attempts: max_attempts.max(1),
            delay: base.max(MIN_DELAY),
            backoff: Backoff::Exponential,
            max_delay: max_delay.max(base.max(MIN_DELAY)),
            max_total_wait: Duration::ZERO,
        };
        policy.max_total_wait = (1..policy.max_attempts)
            .map(|attempt| policy.delay_after(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);
        policy
    }

    /// Cap the total time spent sleeping between attempts.
    pub fn with_max_total_wait(mut self, max_total_wait: Duration) -> Self {
        self.max_total_wait = max_total_wait;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_total_wait(&self) -> Duration {
        self.max_total_wait
    }

    /// Delay to sleep after the 1-based `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        let base = Duration::from_millis(settings.delay_ms);
        let policy = match settings.backoff {
            Backoff::Fixed => Self::fixed(settings.max_attempts, base),
            Backoff::Exponential => Self::exponential(
                settings.max_attempts,
                base,
                Duration::from_millis(settings.max_delay_ms),
            ),
        };
        policy.with_max_total_wait(Duration::from_millis(settings.max_total_wait_ms))
    }
}

/// How a retried operation ended without success.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error the predicate refused to retry.
    #[error("{0}")]
    Fatal(E),

    /// The caller cancelled before an attempt succeeded.
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Run `op` until it succeeds, fails fatally, runs out of attempts or time,
/// or `cancel` fires.
///
/// An attempt in flight when `cancel` fires is dropped; whatever it already
/// sent over the wire is not recalled.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    is_retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut waited = Duration::ZERO;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
            result = op() => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => return Err(RetryError::Fatal(err)),
            Err(err) => err,
        };

        let delay = policy.delay_after(attempt);
        if attempt >= policy.max_attempts || waited + delay > policy.max_total_wait {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
            _ = tokio::time::sleep(delay) => {}
        }
        waited += delay;
    }
}
