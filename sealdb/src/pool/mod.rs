//! A bounded, fair pool of connections.
//!
//! The pool owns every [`Connection`] it creates. Each one is either idle
//! or leased to exactly one caller through a [`PooledConnection`] guard.
//! Connections are opened lazily up to `max_size`; when the bound is
//! reached callers queue in FIFO order and a released connection goes to
//! the longest waiter before it goes back to the idle set.
//!
//! All partition state lives behind one mutex and one condition variable.
//! Connections are opened and closed with the mutex released.

mod config;
mod factory;
mod tiered;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::database::Connection;
use crate::error::{Error, Result};

pub use config::{PoolConfig, PoolStatus, Priority, TieredStatus};
pub use factory::{ConnectionFactory, DatabaseFactory};
pub use tiered::TieredPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    ShuttingDown,
    Closed,
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolState {
    /// Oldest at the front.
    idle: VecDeque<IdleConnection>,
    /// Held by callers, including connections parked in `handoffs`.
    leased: usize,
    /// Slots reserved for connections being opened.
    opening: usize,
    /// Tickets of blocked `lease` calls, oldest first.
    waiters: VecDeque<u64>,
    /// Connections released directly to a waiter, keyed by ticket.
    handoffs: HashMap<u64, Connection>,
    next_ticket: u64,
    phase: Phase,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.leased + self.opening
    }

    fn remove_waiter(&mut self, ticket: u64) {
        self.waiters.retain(|waiting| *waiting != ticket);
    }

    /// Takes idle connections past `timeout`, oldest first, while more than
    /// `keep` remain.
    fn take_expired(&mut self, timeout: Duration, keep: usize) -> Vec<Connection> {
        let mut expired = Vec::new();
        while self.idle.len() > keep {
            match self.idle.front() {
                Some(entry) if entry.since.elapsed() >= timeout => {
                    if let Some(entry) = self.idle.pop_front() {
                        expired.push(entry.conn);
                    }
                }
                _ => break,
            }
        }
        expired
    }
}

enum Acquire {
    Idle(Connection),
    Open,
    Full,
}

struct Shared {
    config: PoolConfig,
    factory: Box<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self, state: &mut PoolState) -> Acquire {
        if let Some(entry) = state.idle.pop_back() {
            return Acquire::Idle(entry.conn);
        }
        if state.total() < self.config.max_size {
            return Acquire::Open;
        }
        Acquire::Full
    }

    /// Puts a connection back. Runs from [`PooledConnection`]'s drop.
    fn release(&self, conn: Connection) {
        let mut state = self.lock();
        state.leased = state.leased.saturating_sub(1);

        if !conn.is_open() {
            log::debug!("{} returned closed, freeing its slot", conn.id());
            drop(state);
            self.available.notify_all();
            return;
        }

        let mut to_close = Vec::new();
        match state.phase {
            Phase::Running => {
                if let Some(ticket) = state.waiters.pop_front() {
                    state.leased += 1;
                    state.handoffs.insert(ticket, conn);
                } else {
                    state.idle.push_back(IdleConnection {
                        conn,
                        since: Instant::now(),
                    });
                    to_close =
                        state.take_expired(self.config.idle_timeout, self.config.retention);
                }
            }
            Phase::ShuttingDown => state.idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            }),
            Phase::Closed => to_close.push(conn),
        }
        drop(state);
        self.available.notify_all();
        close_all(to_close);
    }
}

/// Closes connections, logging failures.
fn close_all(connections: Vec<Connection>) -> Option<Error> {
    let mut first_error = None;
    for mut conn in connections {
        let id = conn.id();
        if let Err(err) = conn.close() {
            log::warn!("{id} failed to close: {err}");
            first_error.get_or_insert(err);
        }
    }
    first_error
}

/// A bounded pool of [`Connection`]s.
///
/// Cloning the pool yields another handle to the same pool.
///
/// # Examples
///
/// ```
/// use sealdb::{
///     ConnectionConfig, ConnectionPool, DatabaseFactory, InMemory, JournalMode, PoolConfig,
///     SqliteEngine,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let factory = DatabaseFactory::new(
///     Arc::new(SqliteEngine::new()),
///     Arc::new(InMemory),
///     ConnectionConfig::new("cache").with_journal_mode(JournalMode::Memory),
/// );
/// let pool = ConnectionPool::new(PoolConfig::new(2), factory).unwrap();
///
/// let mut conn = pool.lease(Duration::from_secs(1)).unwrap();
/// assert_eq!(conn.query("SELECT 1", &[]).unwrap().len(), 1);
/// drop(conn);
///
/// assert_eq!(pool.status().idle, 1);
/// pool.shutdown(None).unwrap();
/// ```
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// Creates an empty pool. No connection is opened until the first lease.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config.max_size` is zero.
    pub fn new(config: PoolConfig, factory: impl ConnectionFactory + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    leased: 0,
                    opening: 0,
                    waiters: VecDeque::new(),
                    handoffs: HashMap::new(),
                    next_ticket: 0,
                    phase: Phase::Running,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// The pool's bounds.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Leases a connection, waiting up to `timeout` for one.
    ///
    /// An idle connection is reused when nobody is queued ahead; otherwise a
    /// new one is opened if the pool is below its bound. When it is full the
    /// caller queues behind earlier callers.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if nothing became available in time; the
    ///   pool is left as it was
    /// - [`Error::PoolShuttingDown`] once [`shutdown`](Self::shutdown) began
    /// - any error from opening a new connection
    pub fn lease(&self, timeout: Duration) -> Result<PooledConnection> {
        self.lease_inner(timeout, None)
    }

    /// Like [`lease`](Self::lease), but gives up when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] on cancellation, plus every error of
    /// [`lease`](Self::lease). A connection opened for a cancelled caller is
    /// returned to the pool.
    pub fn lease_cancellable(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<PooledConnection> {
        self.lease_inner(timeout, Some(token))
    }

    fn lease_inner(
        &self,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> Result<PooledConnection> {
        let shared = &self.shared;
        let _listener = token.map(|token| {
            let shared = Arc::clone(shared);
            token.register(move || {
                // Take the lock so the wakeup cannot fall between a waiter's
                // check and its wait.
                let _state = shared.lock();
                shared.available.notify_all();
            })
        });
        let cancelled = || token.is_some_and(CancellationToken::is_cancelled);
        let deadline = Instant::now().checked_add(timeout);

        let mut state = shared.lock();
        if state.phase != Phase::Running {
            return Err(Error::PoolShuttingDown);
        }
        if cancelled() {
            return Err(Error::Cancelled);
        }

        if state.waiters.is_empty() {
            match shared.try_acquire(&mut state) {
                Acquire::Idle(conn) => {
                    state.leased += 1;
                    return Ok(self.guard(conn));
                }
                Acquire::Open => {
                    state.opening += 1;
                    drop(state);
                    return self.finish_open(token);
                }
                Acquire::Full => {}
            }
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if let Some(conn) = state.handoffs.remove(&ticket) {
                return Ok(self.guard(conn));
            }

            let failure = if state.phase != Phase::Running {
                Some(Error::PoolShuttingDown)
            } else if cancelled() {
                Some(Error::Cancelled)
            } else {
                None
            };
            if let Some(err) = failure {
                state.remove_waiter(ticket);
                drop(state);
                shared.available.notify_all();
                return Err(err);
            }

            if state.waiters.front() == Some(&ticket) {
                match shared.try_acquire(&mut state) {
                    Acquire::Idle(conn) => {
                        state.waiters.pop_front();
                        state.leased += 1;
                        drop(state);
                        shared.available.notify_all();
                        return Ok(self.guard(conn));
                    }
                    Acquire::Open => {
                        state.waiters.pop_front();
                        state.opening += 1;
                        drop(state);
                        shared.available.notify_all();
                        return self.finish_open(token);
                    }
                    Acquire::Full => {}
                }
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.remove_waiter(ticket);
                        drop(state);
                        shared.available.notify_all();
                        return Err(Error::PoolExhausted { timeout });
                    }
                    shared
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Opens a connection into a slot already reserved in `opening`.
    fn finish_open(&self, token: Option<&CancellationToken>) -> Result<PooledConnection> {
        let shared = &self.shared;
        let opened = shared.factory.connect();

        let mut state = shared.lock();
        state.opening -= 1;
        let conn = match opened {
            Ok(conn) => conn,
            Err(err) => {
                drop(state);
                shared.available.notify_all();
                return Err(err);
            }
        };

        if state.phase != Phase::Running {
            drop(state);
            shared.available.notify_all();
            close_all(vec![conn]);
            return Err(Error::PoolShuttingDown);
        }

        state.leased += 1;
        drop(state);
        log::debug!("{} opened for pool", conn.id());

        let lease = self.guard(conn);
        if token.is_some_and(CancellationToken::is_cancelled) {
            drop(lease);
            return Err(Error::Cancelled);
        }
        Ok(lease)
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            pool: Arc::clone(&self.shared),
            conn: Some(conn),
        }
    }

    /// Returns a leased connection. Same as dropping the guard.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `lease` belongs to another
    /// pool. It is still returned to the pool it came from.
    pub fn release(&self, lease: PooledConnection) -> Result<()> {
        let ours = lease.belongs_to(self);
        drop(lease);
        if ours {
            Ok(())
        } else {
            Err(Error::invalid("lease", "connection belongs to another pool"))
        }
    }

    /// Closes idle connections and returns how many were closed.
    ///
    /// [`Priority::High`] closes all of them; [`Priority::Low`] only those
    /// idle for longer than the idle timeout.
    pub fn clear(&self, priority: Priority) -> usize {
        let closing: Vec<Connection> = {
            let mut state = self.shared.lock();
            match priority {
                Priority::High => state.idle.drain(..).map(|entry| entry.conn).collect(),
                Priority::Low => state.take_expired(self.shared.config.idle_timeout, 0),
            }
        };
        let count = closing.len();
        self.shared.available.notify_all();
        close_all(closing);
        if count > 0 {
            log::debug!("cleared {count} idle connection(s)");
        }
        count
    }

    /// A snapshot of the pool's occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            idle: state.idle.len(),
            leased: state.leased,
            total: state.total(),
            waiters: state.waiters.len(),
            max_size: self.shared.config.max_size,
            shutting_down: state.phase != Phase::Running,
        }
    }

    /// Stops the pool and closes every connection.
    ///
    /// New leases fail with [`Error::PoolShuttingDown`] and blocked callers
    /// are woken with the same error. The call then waits for every leased
    /// connection to come back. With `drain_timeout` of `None` that wait is
    /// unbounded. Calling it again after it finished does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimedOut`] if connections were still leased
    /// when `drain_timeout` elapsed (idle ones are closed anyway, and the
    /// stragglers are closed as they come back), or the first close failure.
    pub fn shutdown(&self, drain_timeout: Option<Duration>) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.phase == Phase::Closed {
            return Ok(());
        }
        if state.phase == Phase::Running {
            log::info!("connection pool shutting down");
            state.phase = Phase::ShuttingDown;
        }
        shared.available.notify_all();

        let deadline = drain_timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut timed_out = None;
        while state.leased > 0 || state.opening > 0 {
            match deadline {
                None => {
                    state = shared
                        .available
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = Some(state.leased + state.opening);
                        break;
                    }
                    state = shared
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }

        state.phase = Phase::Closed;
        let idle: Vec<Connection> = state.idle.drain(..).map(|entry| entry.conn).collect();
        drop(state);
        shared.available.notify_all();

        let closed = idle.len();
        let close_error = close_all(idle);
        log::info!("connection pool closed ({closed} connection(s) closed)");

        if let Some(leased) = timed_out {
            return Err(Error::ShutdownTimedOut { leased });
        }
        close_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .finish()
    }
}

/// A connection leased from a [`ConnectionPool`].
///
/// Dereferences to [`Connection`]. Dropping the guard returns the
/// connection to its pool; closing it first frees the pool slot instead.
pub struct PooledConnection {
    pool: Arc<Shared>,
    conn: Option<Connection>,
}

impl PooledConnection {
    pub(crate) fn belongs_to(&self, pool: &ConnectionPool) -> bool {
        Arc::ptr_eq(&self.pool, &pool.shared)
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ConnectionConfig, InMemory, JournalMode};
    use crate::native::SqliteEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn factory() -> DatabaseFactory {
        DatabaseFactory::new(
            Arc::new(SqliteEngine::new()),
            Arc::new(InMemory),
            ConnectionConfig::new("pool").with_journal_mode(JournalMode::Memory),
        )
    }

    fn pool(max_size: usize) -> ConnectionPool {
        ConnectionPool::new(PoolConfig::new(max_size), factory()).unwrap()
    }

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn test_zero_size_pool_rejected() {
        assert!(ConnectionPool::new(PoolConfig::new(0), factory()).is_err());
    }

    #[test]
    fn test_connections_open_lazily() {
        let pool = pool(3);
        assert_eq!(pool.status().total, 0);
        let lease = pool.lease(SHORT).unwrap();
        assert_eq!(pool.status().total, 1);
        assert_eq!(pool.status().leased, 1);
        drop(lease);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.status().leased, 0);
    }

    #[test]
    fn test_idle_connection_is_reused() {
        let pool = pool(2);
        let first = pool.lease(SHORT).unwrap().id();
        let second = pool.lease(SHORT).unwrap().id();
        assert_eq!(first, second);
        assert_eq!(pool.status().total, 1);
    }

    #[test]
    fn test_exhausted_pool_times_out_without_side_effects() {
        let pool = pool(2);
        let _a = pool.lease(SHORT).unwrap();
        let _b = pool.lease(SHORT).unwrap();

        let before = pool.status();
        let start = Instant::now();
        let err = pool.lease(SHORT).unwrap_err();
        assert!(start.elapsed() >= SHORT);
        assert!(matches!(err, Error::PoolExhausted { timeout } if timeout == SHORT));
        assert_eq!(pool.status(), before);
    }

    #[test]
    fn test_release_hands_off_to_waiter() {
        let pool = pool(1);
        let lease = pool.lease(SHORT).unwrap();
        let id = lease.id();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.lease(LONG).map(|conn| conn.id()))
        };
        while pool.status().waiters == 0 {
            thread::yield_now();
        }
        drop(lease);

        assert_eq!(waiter.join().unwrap().unwrap(), id);
        assert_eq!(pool.status().total, 1);
    }

    #[test]
    fn test_closed_connection_frees_slot() {
        let pool = pool(1);
        let mut lease = pool.lease(SHORT).unwrap();
        let old = lease.id();
        lease.close().unwrap();
        drop(lease);

        assert_eq!(pool.status().total, 0);
        assert_ne!(pool.lease(SHORT).unwrap().id(), old);
    }

    #[test]
    fn test_factory_failure_releases_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let pool = ConnectionPool::new(PoolConfig::new(1), move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Err(Error::invalid("factory", "always fails"))
        })
        .unwrap();

        assert!(pool.lease(SHORT).is_err());
        assert!(pool.lease(SHORT).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_idle_timeout_evicts_beyond_retention() {
        let config = PoolConfig::new(3)
            .with_idle_timeout(Duration::ZERO)
            .with_retention(1);
        let pool = ConnectionPool::new(config, factory()).unwrap();

        let a = pool.lease(SHORT).unwrap();
        let b = pool.lease(SHORT).unwrap();
        let c = pool.lease(SHORT).unwrap();
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.status().total, 1);
    }

    #[test]
    fn test_clear_priorities() {
        let config = PoolConfig::new(2).with_idle_timeout(LONG).with_retention(2);
        let pool = ConnectionPool::new(config, factory()).unwrap();
        let a = pool.lease(SHORT).unwrap();
        let b = pool.lease(SHORT).unwrap();
        drop(a);
        drop(b);

        assert_eq!(pool.clear(Priority::Low), 0);
        assert_eq!(pool.clear(Priority::High), 2);
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_release_rejects_foreign_lease() {
        let ours = pool(1);
        let theirs = pool(1);
        let lease = theirs.lease(SHORT).unwrap();

        assert!(matches!(
            ours.release(lease),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(theirs.status().idle, 1);
        assert_eq!(ours.status().total, 0);
    }

    #[test]
    fn test_cancelled_waiter() {
        let pool = pool(1);
        let _held = pool.lease(SHORT).unwrap();
        let token = CancellationToken::new();

        let waiter = {
            let pool = pool.clone();
            let token = token.clone();
            thread::spawn(move || pool.lease_cancellable(LONG, &token))
        };
        while pool.status().waiters == 0 {
            thread::yield_now();
        }
        token.cancel();

        assert!(matches!(waiter.join().unwrap(), Err(Error::Cancelled)));
        assert_eq!(pool.status().waiters, 0);
        assert_eq!(pool.status().leased, 1);
    }

    #[test]
    fn test_shutdown_rejects_new_leases_and_is_idempotent() {
        let pool = pool(2);
        drop(pool.lease(SHORT).unwrap());

        pool.shutdown(None).unwrap();
        pool.shutdown(None).unwrap();
        assert!(matches!(pool.lease(SHORT), Err(Error::PoolShuttingDown)));
        assert_eq!(pool.status().total, 0);
        assert!(pool.status().shutting_down);
    }

    #[test]
    fn test_shutdown_times_out_on_held_lease() {
        let pool = pool(1);
        let lease = pool.lease(SHORT).unwrap();

        let err = pool.shutdown(Some(SHORT)).unwrap_err();
        assert!(matches!(err, Error::ShutdownTimedOut { leased: 1 }));

        drop(lease);
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_shutdown_waits_for_leases() {
        let pool = pool(1);
        let lease = pool.lease(SHORT).unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(SHORT);
            drop(lease);
        });
        pool.shutdown(Some(LONG)).unwrap();
        releaser.join().unwrap();
        assert_eq!(pool.status().total, 0);
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let pool = pool(1);
        let held = pool.lease(SHORT).unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.lease(LONG))
        };
        while pool.status().waiters == 0 {
            thread::yield_now();
        }

        let shutter = {
            let pool = pool.clone();
            thread::spawn(move || pool.shutdown(None))
        };
        assert!(matches!(
            waiter.join().unwrap(),
            Err(Error::PoolShuttingDown)
        ));
        drop(held);
        shutter.join().unwrap().unwrap();
    }
}
