//! Pool bounds and reporting types.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

/// Bounds of a [`ConnectionPool`](super::ConnectionPool).
///
/// # Examples
///
/// ```
/// use sealdb::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new(4)
///     .with_idle_timeout(Duration::from_secs(30))
///     .with_retention(1);
/// assert_eq!(config.max_size, 4);
/// assert!(PoolConfig::new(0).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections, idle and leased together.
    pub max_size: usize,
    /// How long a connection may sit idle before it becomes eligible for
    /// closing.
    pub idle_timeout: Duration,
    /// Number of idle connections kept open regardless of the idle timeout.
    pub retention: usize,
}

impl PoolConfig {
    /// Default idle timeout.
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a configuration with default settings.
    ///
    /// Default settings:
    /// - `idle_timeout`: 60s
    /// - `retention`: 1
    #[must_use]
    pub const fn new(max_size: usize) -> Self {
        Self {
            max_size,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            retention: 1,
        }
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets how many idle connections survive the idle timeout.
    #[must_use]
    pub const fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Checks the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::invalid(
                "max_size",
                "pool must allow at least one connection",
            ));
        }
        Ok(())
    }
}

/// How aggressively [`ConnectionPool::clear`](super::ConnectionPool::clear)
/// closes idle connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Close every idle connection.
    High,
    /// Close only idle connections past the idle timeout.
    Low,
}

/// A snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Connections waiting in the idle set.
    pub idle: usize,
    /// Connections held by callers.
    pub leased: usize,
    /// Every connection the pool accounts for, including ones being opened.
    pub total: usize,
    /// Callers blocked in `lease`.
    pub waiters: usize,
    /// The configured bound.
    pub max_size: usize,
    /// Whether shutdown has begun.
    pub shutting_down: bool,
}

/// Occupancy of both tiers of a [`TieredPool`](super::TieredPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TieredStatus {
    /// The single-connection tier.
    pub primary: PoolStatus,
    /// The shared tier.
    pub secondary: PoolStatus,
}
