//! A primary connection in front of a pool of secondaries.
//!
//! The primary tier is a pool of exactly one connection. Work that must be
//! serialized, usually every write, leases it with
//! [`TieredPool::lease_primary`]; everything else shares the secondary
//! tier. The tiers keep separate queues, so readers never wait behind a
//! writer for a slot.

use std::fmt;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::error::Result;

use super::config::{PoolConfig, Priority, TieredStatus};
use super::factory::ConnectionFactory;
use super::{ConnectionPool, PooledConnection};

/// A single-connection primary tier and a bounded secondary tier.
///
/// Cloning yields another handle to the same two pools.
///
/// # Examples
///
/// ```
/// use sealdb::{
///     ConnectionConfig, DatabaseFactory, DirectoryPaths, JournalMode, PoolConfig, SqliteEngine,
///     TieredPool, Value,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
/// let engine = Arc::new(SqliteEngine::new());
/// let paths = Arc::new(DirectoryPaths::new(dir.path()));
/// let config = ConnectionConfig::new("app").with_journal_mode(JournalMode::Wal);
///
/// let pool = TieredPool::new(
///     PoolConfig::new(2),
///     DatabaseFactory::new(engine.clone(), paths.clone(), config.clone()),
///     DatabaseFactory::new(engine, paths, config),
/// )
/// .unwrap();
///
/// let mut writer = pool.lease_primary(Duration::from_secs(1)).unwrap();
/// writer.execute("CREATE TABLE t (x INTEGER)", &[]).unwrap();
/// drop(writer);
///
/// let mut reader = pool.lease(Duration::from_secs(1)).unwrap();
/// let rows = reader.query("SELECT count(*) FROM t", &[]).unwrap();
/// assert_eq!(rows, vec![vec![Value::Integer(0)]]);
/// ```
#[derive(Clone)]
pub struct TieredPool {
    primary: ConnectionPool,
    secondary: ConnectionPool,
}

impl TieredPool {
    /// Creates both tiers. The primary tier shares `config`'s idle timeout
    /// and always retains its connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// `config.max_size` is zero.
    pub fn new(
        config: PoolConfig,
        primary: impl ConnectionFactory + 'static,
        secondary: impl ConnectionFactory + 'static,
    ) -> Result<Self> {
        let primary_config = PoolConfig::new(1)
            .with_idle_timeout(config.idle_timeout)
            .with_retention(1);
        Ok(Self {
            primary: ConnectionPool::new(primary_config, primary)?,
            secondary: ConnectionPool::new(config, secondary)?,
        })
    }

    /// The single-connection tier.
    #[must_use]
    pub const fn primary(&self) -> &ConnectionPool {
        &self.primary
    }

    /// The shared tier.
    #[must_use]
    pub const fn secondary(&self) -> &ConnectionPool {
        &self.secondary
    }

    /// Leases the primary connection, waiting up to `timeout` for it.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionPool::lease`].
    pub fn lease_primary(&self, timeout: Duration) -> Result<PooledConnection> {
        self.primary.lease(timeout)
    }

    /// Like [`lease_primary`](Self::lease_primary), but gives up when
    /// `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionPool::lease_cancellable`].
    pub fn lease_primary_cancellable(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<PooledConnection> {
        self.primary.lease_cancellable(timeout, token)
    }

    /// Leases a secondary connection.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionPool::lease`].
    pub fn lease(&self, timeout: Duration) -> Result<PooledConnection> {
        self.secondary.lease(timeout)
    }

    /// Like [`lease`](Self::lease), but gives up when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionPool::lease_cancellable`].
    pub fn lease_cancellable(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<PooledConnection> {
        self.secondary.lease_cancellable(timeout, token)
    }

    /// Whether `lease` came from the primary tier.
    #[must_use]
    pub fn is_primary(&self, lease: &PooledConnection) -> bool {
        lease.belongs_to(&self.primary)
    }

    /// Returns a lease to the tier it came from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) if
    /// `lease` belongs to neither tier. It is still returned to the pool it
    /// came from.
    pub fn release(&self, lease: PooledConnection) -> Result<()> {
        if self.is_primary(&lease) {
            self.primary.release(lease)
        } else {
            self.secondary.release(lease)
        }
    }

    /// Clears idle connections in both tiers and returns how many closed.
    pub fn clear(&self, priority: Priority) -> usize {
        self.primary.clear(priority) + self.secondary.clear(priority)
    }

    /// Occupancy of both tiers.
    #[must_use]
    pub fn status(&self) -> TieredStatus {
        TieredStatus {
            primary: self.primary.status(),
            secondary: self.secondary.status(),
        }
    }

    /// Shuts down the secondary tier, then the primary.
    ///
    /// `drain_timeout` bounds the two drains together. Both tiers are shut
    /// down even if the first one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure, as [`ConnectionPool::shutdown`] reports it.
    pub fn shutdown(&self, drain_timeout: Option<Duration>) -> Result<()> {
        let deadline = drain_timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let secondary = self.secondary.shutdown(drain_timeout);
        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let primary = self.primary.shutdown(remaining);
        secondary.and(primary)
    }
}

impl fmt::Debug for TieredPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredPool")
            .field("status", &self.status())
            .finish()
    }
}
