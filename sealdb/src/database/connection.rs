//! Database connection management.
//!
//! A [`Connection`] owns one native handle and a bounded cache of prepared
//! statements. It is `Send` but not `Sync`: it never locks internally, and
//! exclusive use is enforced by `&mut` borrows.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crate::cancel::CancellationToken;
use crate::error::{Error, Result, StatementError};
use crate::native::{Engine, NativeDatabase, Step, Value};
use crate::retry::BusyRetryController;

use super::bootstrap::Opened;
use super::cache::StatementCache;
use super::config::{ConnectionConfig, JournalMode};
use super::path::PathProvider;
use super::statement::{PreparedStatement, Statement};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Runs `op`, retrying lock contention as `controller` allows.
///
/// Only busy/locked failures are retried; everything else is returned at
/// once. The sleep between attempts is cut short by `token`.
pub(crate) fn retry_busy<T>(
    controller: &BusyRetryController,
    token: Option<&CancellationToken>,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0_u32;
    loop {
        match op() {
            Err(err) if err.is_busy() => {
                if !controller.should_retry(attempt) {
                    return Err(Error::BusyTimeout {
                        attempts: attempt.saturating_add(1),
                    });
                }
                let delay = controller.delay_for(attempt);
                log::warn!("database busy, retry {} in {delay:?}", attempt + 1);
                match token {
                    Some(token) => {
                        if !token.sleep(delay) {
                            return Err(Error::Cancelled);
                        }
                    }
                    None => thread::sleep(delay),
                }
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// An open, keyed database connection.
///
/// # Examples
///
/// ```
/// use sealdb::{Connection, ConnectionConfig, InMemory, JournalMode, SqliteEngine, Value};
///
/// let config = ConnectionConfig::new("demo").with_journal_mode(JournalMode::Memory);
/// let mut conn = Connection::open(&SqliteEngine::new(), &InMemory, &config).unwrap();
///
/// conn.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)", &[]).unwrap();
/// let changed = conn
///     .execute("INSERT INTO kv VALUES (?, ?)", &[Value::from("a"), Value::from(1)])
///     .unwrap();
/// assert_eq!(changed, 1);
///
/// let rows = conn.query("SELECT v FROM kv WHERE k = ?", &[Value::from("a")]).unwrap();
/// assert_eq!(rows, vec![vec![Value::Integer(1)]]);
/// ```
pub struct Connection {
    id: ConnectionId,
    path: PathBuf,
    db: Option<Box<dyn NativeDatabase>>,
    journal_mode: JournalMode,
    cache: StatementCache,
    retry: BusyRetryController,
    max_value_len: usize,
}

impl Connection {
    /// Opens the database named by `config`.
    ///
    /// The key is applied as the first statement and validated with a read
    /// of the schema table before anything else runs. The page size (if
    /// configured) and the journal mode follow.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be opened
    /// - [`Error::WrongKey`] if the key does not decrypt the file
    /// - [`Error::CorruptDatabase`] if the engine reports corruption
    /// - [`Error::JournalModeRejected`] if the engine keeps another mode
    /// - [`Error::BusyTimeout`] if the file stays locked
    ///
    /// The native handle is closed on every error path.
    pub fn open(
        engine: &dyn Engine,
        paths: &dyn PathProvider,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        let path = paths.resolve(&config.name)?;
        let retry = config.retry_controller();

        let ready = Opened::open(engine, &path, config.mode)?
            .apply_key(config.key.as_ref())?
            .validate(&retry)?
            .apply_page_size(config.page_size(), &retry)?
            .apply_journal_mode(config.journal_mode, &retry)?;

        let id = ConnectionId::next();
        log::debug!("{id} open on {}", ready.path.display());
        Ok(Self {
            id,
            path: ready.path,
            db: Some(ready.db),
            journal_mode: ready.journal_mode,
            cache: StatementCache::new(config.statement_cache_capacity),
            retry,
            max_value_len: config.max_value_len,
        })
    }

    /// This connection's identity.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// The resolved database location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The journal mode the engine confirmed at open time.
    #[must_use]
    pub const fn journal_mode(&self) -> JournalMode {
        self.journal_mode
    }

    /// Whether the native handle is still open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.db.is_some()
    }

    /// Number of idle statements in the cache.
    #[must_use]
    pub fn cached_statements(&self) -> usize {
        self.cache.len()
    }

    /// The busy-retry controller used by this connection.
    #[must_use]
    pub const fn retry_controller(&self) -> &BusyRetryController {
        &self.retry
    }

    /// Rows changed by the most recently completed statement.
    ///
    /// Returns 0 once the connection is closed.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.db.as_deref().map_or(0, |db| db.changes())
    }

    pub(crate) const fn max_value_len(&self) -> usize {
        self.max_value_len
    }

    pub(crate) fn native(
        &mut self,
    ) -> std::result::Result<&mut dyn NativeDatabase, StatementError> {
        match self.db.as_deref_mut() {
            Some(db) => Ok(db),
            None => Err(StatementError::ConnectionClosed),
        }
    }

    /// Checks out a prepared statement for `sql`.
    ///
    /// A cached statement is reused without compiling. Otherwise the SQL is
    /// compiled, and if the cache is full its least recently used entry is
    /// finalized to make room. A failure to finalize that entry does not
    /// fail this call; it is available from
    /// [`Statement::take_eviction_error`].
    ///
    /// # Errors
    ///
    /// Returns [`StatementError::ConnectionClosed`] after
    /// [`close`](Self::close), or the engine's compile error.
    pub fn prepare(&mut self, sql: &str) -> Result<Statement<'_>> {
        if self.db.is_none() {
            return Err(StatementError::ConnectionClosed.into());
        }
        if let Some(cached) = self.cache.take(sql) {
            log::debug!("{} statement cache hit: {sql}", self.id);
            return Ok(Statement::new(self, cached, None));
        }

        let compiled = self
            .native()?
            .prepare(sql)
            .map_err(Error::from_execution)?;
        let prepared = PreparedStatement::new(sql, compiled, self.id);
        let eviction_error = self.evict_for_insert();
        Ok(Statement::new(self, prepared, eviction_error))
    }

    /// Finalizes cache entries until a new one fits. Reports the first failure.
    fn evict_for_insert(&mut self) -> Option<Error> {
        let evicted = self.cache.make_room();
        let db = self.db.as_deref_mut()?;
        let mut first_error = None;
        for mut statement in evicted {
            log::debug!("{} evicting cached statement: {}", self.id, statement.sql());
            if let Err(source) = statement.finalize(db) {
                log::warn!(
                    "{} failed to finalize evicted statement '{}': {source}",
                    self.id,
                    statement.sql()
                );
                first_error.get_or_insert_with(|| {
                    StatementError::EvictionFailed {
                        sql: statement.sql().to_owned(),
                        source,
                    }
                    .into()
                });
            }
        }
        first_error
    }

    /// Takes back a statement whose guard was dropped.
    pub(crate) fn recycle(&mut self, mut statement: PreparedStatement) {
        let Some(db) = self.db.as_deref_mut() else {
            return;
        };
        if statement.is_finalized() {
            return;
        }
        if let Err(err) = statement.reset(db) {
            log::warn!(
                "{} could not reset '{}', finalizing: {err}",
                self.id,
                statement.sql()
            );
        } else {
            match self.cache.insert(statement) {
                None => return,
                Some(rejected) => statement = rejected,
            }
        }
        if let Err(err) = statement.finalize(db) {
            log::warn!(
                "{} failed to finalize '{}': {err}",
                self.id,
                statement.sql()
            );
        }
    }

    /// Runs `op`, retrying it while the database is busy or locked.
    ///
    /// `op` is the unit of work that is repeated, so it should prepare its
    /// statements itself. Failures other than lock contention are returned
    /// at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusyTimeout`] when the retry policy is exhausted, or
    /// the first non-busy error from `op`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sealdb::{Connection, ConnectionConfig, InMemory, JournalMode, SqliteEngine, Step};
    ///
    /// let config = ConnectionConfig::new("demo").with_journal_mode(JournalMode::Memory);
    /// let mut conn = Connection::open(&SqliteEngine::new(), &InMemory, &config).unwrap();
    ///
    /// let step = conn
    ///     .execute_with_retry(|conn| conn.prepare("SELECT 1")?.step())
    ///     .unwrap();
    /// assert!(matches!(step, Step::Row(_)));
    /// ```
    pub fn execute_with_retry<T>(
        &mut self,
        mut op: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let retry = self.retry.clone();
        retry_busy(&retry, None, || op(self))
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but the sleep
    /// between attempts ends early when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `token` fires during a retry sleep,
    /// plus every error of `execute_with_retry`.
    pub fn execute_with_retry_cancellable<T>(
        &mut self,
        token: &CancellationToken,
        mut op: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let retry = self.retry.clone();
        retry_busy(&retry, Some(token), || op(self))
    }

    /// Runs one statement to completion and returns the changed row count.
    ///
    /// Busy and locked failures are retried.
    ///
    /// # Errors
    ///
    /// Returns any binding, engine or retry error. If making room in the
    /// statement cache failed to finalize an older statement, the statement
    /// still runs to completion and that
    /// [`StatementError::EvictionFailed`] is returned afterwards.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut eviction_error = None;
        let changes = self.execute_with_retry(|conn| {
            let mut statement = conn.prepare(sql)?;
            if let Some(err) = statement.take_eviction_error() {
                eviction_error.get_or_insert(err);
            }
            statement.bind_all(params)?;
            while let Step::Row(_) = statement.step()? {}
            drop(statement);
            Ok(conn.changes())
        })?;
        eviction_error.map_or(Ok(changes), Err)
    }

    /// Runs one statement and collects every row it produces.
    ///
    /// Busy and locked failures are retried.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute): an eviction failure is reported
    /// after the rows were read, and the rows are dropped.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let mut eviction_error = None;
        let rows = self.execute_with_retry(|conn| {
            let mut statement = conn.prepare(sql)?;
            if let Some(err) = statement.take_eviction_error() {
                eviction_error.get_or_insert(err);
            }
            statement.bind_all(params)?;
            let mut rows = Vec::new();
            while let Step::Row(row) = statement.step()? {
                rows.push(row);
            }
            Ok(rows)
        })?;
        eviction_error.map_or(Ok(rows), Err)
    }

    /// Finalizes every cached statement, then closes the native handle.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned. Closing a closed connection does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first finalize or close failure.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut db) = self.db.take() else {
            return Ok(());
        };

        let mut first_error: Option<Error> = None;
        for mut statement in self.cache.drain() {
            if let Err(err) = statement.finalize(db.as_mut()) {
                log::warn!(
                    "{} failed to finalize '{}' on close: {err}",
                    self.id,
                    statement.sql()
                );
                first_error.get_or_insert(Error::Sqlite(err));
            }
        }

        if let Err(err) = db.close() {
            first_error.get_or_insert(Error::Io {
                path: self.path.clone(),
                source: err,
            });
        }

        log::debug!("{} closed", self.id);
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("journal_mode", &self.journal_mode)
            .field("cached_statements", &self.cache.len())
            .field("cache_capacity", &self.cache.capacity())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("{} failed to close cleanly: {err}", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemory;
    use crate::native::{NativeError, ResultCode, SqliteEngine};
    use crate::random::FixedRandom;
    use crate::retry::RetryPolicy;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::time::Duration;

    fn memory_config() -> ConnectionConfig {
        ConnectionConfig::new("test").with_journal_mode(JournalMode::Memory)
    }

    fn open_memory(config: &ConnectionConfig) -> Connection {
        Connection::open(&SqliteEngine::new(), &InMemory, config).unwrap()
    }

    fn busy() -> Error {
        NativeError::new(ResultCode::Busy, "database is locked").into()
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_micros(50),
            Duration::from_millis(1),
        )
        .unwrap()
    }

    #[test]
    fn test_connection_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Connection>();
    }

    #[test]
    fn test_open_memory_database() {
        let conn = open_memory(&memory_config());
        assert!(conn.is_open());
        assert_eq!(conn.journal_mode(), JournalMode::Memory);
        assert_eq!(conn.path(), Path::new(":memory:"));
        assert_eq!(conn.cached_statements(), 0);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = open_memory(&memory_config());
        let b = open_memory(&memory_config());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_statement_returns_to_cache_on_drop() {
        let mut conn = open_memory(&memory_config());
        {
            let mut stmt = conn.prepare("SELECT ?").unwrap();
            stmt.bind(1, 5).unwrap();
        }
        assert_eq!(conn.cached_statements(), 1);

        let stmt = conn.prepare("SELECT ?").unwrap();
        // Reset on return: the old binding is gone.
        assert_eq!(stmt.binding(1), Some(&Value::Null));
        drop(stmt);
        assert_eq!(conn.cached_statements(), 1);
    }

    #[test]
    fn test_cache_is_bounded() {
        let mut conn = open_memory(&memory_config().with_statement_cache_capacity(2));
        for value in 0..5 {
            let sql = format!("SELECT {value}");
            let mut stmt = conn.prepare(&sql).unwrap();
            assert!(stmt.take_eviction_error().is_none());
        }
        assert_eq!(conn.cached_statements(), 2);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut conn = open_memory(&memory_config().with_statement_cache_capacity(0));
        drop(conn.prepare("SELECT 1").unwrap());
        assert_eq!(conn.cached_statements(), 0);
    }

    #[test]
    fn test_finalized_statement_is_not_cached() {
        let mut conn = open_memory(&memory_config());
        {
            let mut stmt = conn.prepare("SELECT 1").unwrap();
            stmt.finalize().unwrap();
            stmt.finalize().unwrap();
            assert!(stmt.is_finalized());
            assert!(matches!(
                stmt.step(),
                Err(Error::Statement(StatementError::StatementFinalized))
            ));
        }
        assert_eq!(conn.cached_statements(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_prepare() {
        let mut conn = open_memory(&memory_config());
        drop(conn.prepare("SELECT 1").unwrap());

        conn.close().unwrap();
        conn.close().unwrap();
        assert!(!conn.is_open());
        assert_eq!(conn.cached_statements(), 0);
        assert!(matches!(
            conn.prepare("SELECT 1"),
            Err(Error::Statement(StatementError::ConnectionClosed))
        ));
    }

    #[test]
    fn test_execute_and_query() {
        let mut conn = open_memory(&memory_config());
        conn.execute("CREATE TABLE t (a INTEGER, b TEXT)", &[]).unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO t VALUES (?, ?), (?, ?)",
                &[1.into(), "one".into(), 2.into(), Value::Null],
            )
            .unwrap();
        assert_eq!(inserted, 2);

        let rows = conn.query("SELECT a, b FROM t ORDER BY a", &[]).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(1), Value::Text("one".into())],
                vec![Value::Integer(2), Value::Null],
            ]
        );
    }

    #[test]
    fn test_execute_rejects_wrong_param_count() {
        let mut conn = open_memory(&memory_config());
        let err = conn.query("SELECT ?, ?", &[1.into()]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_value_limit_applies() {
        let mut conn = open_memory(&memory_config().with_max_value_len(4));
        let mut stmt = conn.prepare("SELECT ?").unwrap();
        assert!(stmt.bind(1, "four").is_ok());
        assert!(matches!(
            stmt.bind(1, "fives"),
            Err(Error::Statement(StatementError::ValueTooLarge { len: 5, limit: 4 }))
        ));
    }

    #[test]
    fn test_retry_recovers_from_transient_busy() {
        let config = memory_config().with_retry_policy(fast_retry(5));
        let mut conn = open_memory(&config);
        let calls = Cell::new(0);

        let value = conn
            .execute_with_retry(|_| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(busy())
                } else {
                    Ok(7)
                }
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_with_busy_timeout() {
        let config = memory_config().with_retry_policy(fast_retry(2));
        let mut conn = open_memory(&config);
        let calls = Cell::new(0);

        let err = conn
            .execute_with_retry(|_| -> Result<()> {
                calls.set(calls.get() + 1);
                Err(busy())
            })
            .unwrap_err();
        assert!(matches!(err, Error::BusyTimeout { attempts: 3 }));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_does_not_retry_other_errors() {
        let mut conn = open_memory(&memory_config().with_retry_policy(fast_retry(5)));
        let calls = Cell::new(0);

        let err = conn
            .execute_with_retry(|_| -> Result<()> {
                calls.set(calls.get() + 1);
                Err(Error::invalid("x", "y"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_cancelled_retry_sleep() {
        let policy = RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(30)).unwrap();
        let config = memory_config()
            .with_retry_policy(policy)
            .with_random_source(Arc::new(FixedRandom::new(0)));
        let mut conn = open_memory(&config);

        let token = CancellationToken::new();
        token.cancel();
        let err = conn
            .execute_with_retry_cancellable(&token, |_| -> Result<()> { Err(busy()) })
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_debug_hides_handle() {
        let conn = open_memory(&memory_config());
        let debug = format!("{conn:?}");
        assert!(debug.contains("Connection"));
        assert!(debug.contains("Memory"));
        assert!(debug.contains("cache_capacity"));
    }
}
