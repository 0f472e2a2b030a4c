//! Bounded retry with exponential backoff

use std::time::Duration;

use crate::error::{FetchError, Severity};

/// Retry settings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Backoff unit: the n-th retry waits `base * 2^n`
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping (tests, mock sources)
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base: Duration::ZERO,
        }
    }

    /// Exponential backoff: `base * 2^attempt` (2s, 4s, 8s, ... with a 1s base)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Outcome of a bounded sequence of attempts.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Succeeded (possibly after retries)
    Done(T),
    /// Gave up on this item; the caller carries on with the next one
    Recoverable(FetchError),
    /// Cannot continue: the error stops the source or the run
    Fatal(FetchError),
}

impl<T> Attempt<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempt<U> {
        match self {
            Self::Done(v) => Attempt::Done(f(v)),
            Self::Recoverable(e) => Attempt::Recoverable(e),
            Self::Fatal(e) => Attempt::Fatal(e),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Done(v) => Some(v),
            _ => None,
        }
    }
}

/// Run `attempt_fn` until it succeeds, fails permanently, or retries run out.
///
/// Transient errors are retried; exhausting the budget turns the last error
/// into [`Attempt::Recoverable`]. Source- and run-level errors are never
/// retried and come back as [`Attempt::Fatal`].
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: impl FnMut() -> Result<T, FetchError>,
) -> Attempt<T> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Attempt::Done(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy
                    .backoff_duration(attempt)
                    .max(e.retry_after().unwrap_or_default());
                log::debug!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries
                );
                std::thread::sleep(delay);
            }
            Err(e) => {
                return match e.severity() {
                    Severity::Transient | Severity::Item => {
                        log::warn!("{label}: giving up: {e}");
                        Attempt::Recoverable(e)
                    }
                    Severity::Source | Severity::Run => {
                        log::error!("{label}: failed permanently: {e}");
                        Attempt::Fatal(e)
                    }
                };
            }
        }
    }
}
