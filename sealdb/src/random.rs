//! Sources of bounded random integers.
//!
//! Busy-retry jitter draws from a [`RandomSource`] injected at construction
//! time. Production code uses [`ThreadRandom`]; tests pin the jitter with
//! [`FixedRandom`] or [`SequenceRandom`] so retry timing is reproducible.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// A capability producing integers in `[0, bound)`.
pub trait RandomSource: Send + Sync + fmt::Debug {
    /// Returns an integer in `[0, bound)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `bound` is zero.
    fn next_bounded(&self, bound: u64) -> Result<u64>;
}

fn check_bound(bound: u64) -> Result<()> {
    if bound == 0 {
        return Err(Error::invalid("bound", "must be positive"));
    }
    Ok(())
}

/// Draws from the thread-local generator of the `rand` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_bounded(&self, bound: u64) -> Result<u64> {
        check_bound(bound)?;
        Ok(rand::thread_rng().gen_range(0..bound))
    }
}

/// A seeded generator: reproducible, but still spread over the range.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Creates a generator from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_bounded(&self, bound: u64) -> Result<u64> {
        check_bound(bound)?;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rng.gen_range(0..bound))
    }
}

/// Always returns the same value, clamped into range.
///
/// # Examples
///
/// ```
/// use sealdb::{FixedRandom, RandomSource};
///
/// let random = FixedRandom::new(7);
/// assert_eq!(random.next_bounded(10).unwrap(), 7);
/// assert_eq!(random.next_bounded(5).unwrap(), 4);
/// assert!(random.next_bounded(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRandom {
    value: u64,
}

impl FixedRandom {
    /// Creates a source that always yields `value`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self { value }
    }
}

impl RandomSource for FixedRandom {
    fn next_bounded(&self, bound: u64) -> Result<u64> {
        check_bound(bound)?;
        Ok(self.value.min(bound - 1))
    }
}

/// Replays a scripted sequence, wrapping around at the end.
#[derive(Debug)]
pub struct SequenceRandom {
    values: Vec<u64>,
    cursor: AtomicUsize,
}

impl SequenceRandom {
    /// Creates a source replaying `values` in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `values` is empty.
    pub fn new(values: Vec<u64>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::invalid("values", "sequence must not be empty"));
        }
        Ok(Self {
            values,
            cursor: AtomicUsize::new(0),
        })
    }
}

impl RandomSource for SequenceRandom {
    fn next_bounded(&self, bound: u64) -> Result<u64> {
        check_bound(bound)?;
        let position = self.cursor.fetch_add(1, Ordering::Relaxed) % self.values.len();
        Ok(self.values[position].min(bound - 1))
    }
}
