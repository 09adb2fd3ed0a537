//! Busy-retry backoff.
//!
//! [`BusyRetryController`] is pure computation: it decides whether another
//! attempt is allowed and how long to wait before it. The loop that sleeps
//! and re-runs the operation belongs to [`Connection`](crate::Connection).

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::random::{RandomSource, ThreadRandom};

/// Parameters of the exponential backoff.
///
/// # Examples
///
/// ```
/// use sealdb::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(5, Duration::from_millis(2), Duration::from_millis(100)).unwrap();
/// assert_eq!(policy.max_attempts, 5);
/// assert!(RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(1)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_attempts: u32,
    /// Delay ceiling for the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub cap: Duration,
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `base_delay` exceeds `cap`.
    pub fn new(max_attempts: u32, base_delay: Duration, cap: Duration) -> Result<Self> {
        if base_delay > cap {
            return Err(Error::invalid(
                "base_delay",
                format!("{base_delay:?} exceeds cap {cap:?}"),
            ));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            cap,
        })
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    /// Ten retries, 5 ms base, 1 s cap.
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(5),
            cap: Duration::from_secs(1),
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Computes jittered exponential backoff for lock contention.
///
/// For attempt `n` the delay ceiling is `min(cap, base * 2^n)`. Half of the
/// ceiling is always waited; the other half is drawn from the injected
/// [`RandomSource`]. The result never exceeds `cap`, whatever the source
/// returns.
///
/// # Examples
///
/// ```
/// use sealdb::{BusyRetryController, FixedRandom, RetryPolicy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let policy =
///     RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100)).unwrap();
/// let controller = BusyRetryController::new(policy, Arc::new(FixedRandom::new(0)));
///
/// assert!(controller.should_retry(2));
/// assert!(!controller.should_retry(3));
/// assert_eq!(controller.delay_for(0), Duration::from_millis(5));
/// assert_eq!(controller.delay_for(1), Duration::from_millis(10));
/// ```
#[derive(Debug, Clone)]
pub struct BusyRetryController {
    policy: RetryPolicy,
    random: Arc<dyn RandomSource>,
}

impl BusyRetryController {
    /// Creates a controller drawing jitter from `random`.
    #[must_use]
    pub fn new(policy: RetryPolicy, random: Arc<dyn RandomSource>) -> Self {
        Self { policy, random }
    }

    /// Creates a controller drawing jitter from [`ThreadRandom`].
    #[must_use]
    pub fn with_thread_random(policy: RetryPolicy) -> Self {
        Self::new(policy, Arc::new(ThreadRandom))
    }

    /// The policy this controller applies.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether a retry numbered `attempt` (0-based) is allowed.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.policy.max_attempts
    }

    /// Delay ceiling for `attempt`: `min(cap, base * 2^attempt)`.
    #[must_use]
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        Duration::from_micros(self.ceiling_micros(attempt))
    }

    fn ceiling_micros(&self, attempt: u32) -> u64 {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        micros(self.policy.base_delay)
            .saturating_mul(factor)
            .min(micros(self.policy.cap))
    }

    /// How long to wait before the retry numbered `attempt`.
    ///
    /// Never sleeps and never fails. A source that errors contributes no
    /// jitter; a source that answers out of range is clamped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_micros(attempt);
        let floor = ceiling / 2;
        let spread = ceiling - floor;

        let jitter = match self.random.next_bounded(spread + 1) {
            Ok(value) => value.min(spread),
            Err(err) => {
                log::warn!("random source failed, retrying without jitter: {err}");
                0
            }
        };
        Duration::from_micros(floor + jitter)
    }
}
