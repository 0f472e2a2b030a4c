//! Per-source request pacing on top of a `governor` GCRA limiter.
//!
//! Workers are plain threads, so `wait` polls `check` and sleeps for the
//! time governor reports instead of awaiting `until_ready`.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};

type DirectLimiter = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Enforces a minimum interval between consecutive requests (burst of one).
pub struct RateLimiter {
    interval: Duration,
    inner: Option<DirectLimiter>,
    clock: DefaultClock,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Limiter allowing at most `per_second` requests per second.
    ///
    /// Non-positive or non-finite rates disable pacing.
    pub fn per_second(per_second: f64) -> Self {
        let interval = if per_second.is_finite() && per_second > 0.0 {
            Duration::from_secs_f64(1.0 / per_second)
        } else {
            Duration::ZERO
        };
        Self::with_interval(interval)
    }

    pub fn with_interval(interval: Duration) -> Self {
        let clock = DefaultClock::default();
        let inner = Quota::with_period(interval).map(|quota| {
            Governor::direct_with_clock(quota.allow_burst(NonZeroU32::MIN), &clock)
        });
        Self {
            interval,
            inner,
            clock,
        }
    }

    /// Limiter that never waits
    pub fn unlimited() -> Self {
        Self::with_interval(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next request may be sent, then claim the slot.
    pub fn wait(&self) {
        let Some(limiter) = &self.inner else {
            return;
        };
        while let Err(not_until) = limiter.check() {
            std::thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
    }
}
