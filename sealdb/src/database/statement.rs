//! Prepared statements and the borrow guard handed to callers.
//!
//! A [`PreparedStatement`] is the only owner of its native handle. Once the
//! handle is released the statement is finalized for good and every call
//! except [`Statement::finalize`] fails with
//! [`StatementError::StatementFinalized`].
//!
//! Callers never hold a `PreparedStatement` directly. They get a
//! [`Statement`] guard from [`Connection::prepare`](super::Connection::prepare)
//! that borrows the connection mutably; dropping the guard resets the
//! statement and puts it back into the connection's cache.

use std::fmt;

use crate::error::{Error, Result, StatementError};
use crate::native::{
    CompiledStatement, NativeDatabase, NativeResult, ResultCode, StatementId, Step, Value,
};

use super::connection::{Connection, ConnectionId};

/// One compiled statement and its bookkeeping.
#[derive(Debug)]
pub struct PreparedStatement {
    handle: Option<StatementId>,
    sql: String,
    parameter_count: usize,
    bindings: Vec<Value>,
    connection: ConnectionId,
}

impl PreparedStatement {
    pub(crate) fn new(sql: &str, compiled: CompiledStatement, connection: ConnectionId) -> Self {
        Self {
            handle: Some(compiled.id),
            sql: sql.to_owned(),
            parameter_count: compiled.parameter_count,
            bindings: vec![Value::Null; compiled.parameter_count],
            connection,
        }
    }

    /// The SQL text this statement was compiled from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of `?` parameters.
    #[must_use]
    pub const fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Whether the native handle has been released.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.handle.is_none()
    }

    /// The connection that compiled this statement.
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// The value currently bound at the 1-based `index`.
    #[must_use]
    pub fn binding(&self, index: usize) -> Option<&Value> {
        index.checked_sub(1).and_then(|i| self.bindings.get(i))
    }

    fn live_handle(&self) -> std::result::Result<StatementId, StatementError> {
        self.handle.ok_or(StatementError::StatementFinalized)
    }

    /// Binds `value` at the 1-based `index`.
    ///
    /// Index and size are checked before the engine sees anything; the
    /// recorded bindings only change when the engine accepts the value.
    pub(crate) fn bind(
        &mut self,
        db: &mut dyn NativeDatabase,
        index: usize,
        value: Value,
        max_value_len: usize,
    ) -> Result<()> {
        let handle = self.live_handle()?;
        if index == 0 || index > self.parameter_count {
            return Err(StatementError::IndexOutOfRange {
                index,
                count: self.parameter_count,
            }
            .into());
        }
        if let Some(len) = value.byte_len() {
            if len > max_value_len {
                return Err(StatementError::ValueTooLarge {
                    len,
                    limit: max_value_len,
                }
                .into());
            }
        }

        db.bind(handle, index, &value).map_err(|err| match err.code {
            ResultCode::Range => StatementError::IndexOutOfRange {
                index,
                count: self.parameter_count,
            }
            .into(),
            ResultCode::TooBig => StatementError::ValueTooLarge {
                len: value.byte_len().unwrap_or_default(),
                limit: max_value_len,
            }
            .into(),
            _ => Error::from_execution(err),
        })?;

        self.bindings[index - 1] = value;
        Ok(())
    }

    pub(crate) fn step(&mut self, db: &mut dyn NativeDatabase) -> Result<Step> {
        let handle = self.live_handle()?;
        db.step(handle).map_err(Error::from_execution)
    }

    /// Clears execution state and every binding.
    pub(crate) fn reset(&mut self, db: &mut dyn NativeDatabase) -> Result<()> {
        let handle = self.live_handle()?;
        db.reset(handle)?;
        db.clear_bindings(handle)?;
        self.bindings.fill(Value::Null);
        Ok(())
    }

    /// Releases the native handle. Later calls do nothing.
    pub(crate) fn finalize(&mut self, db: &mut dyn NativeDatabase) -> NativeResult<()> {
        match self.handle.take() {
            Some(handle) => db.finalize(handle),
            None => Ok(()),
        }
    }
}

/// A prepared statement checked out of a [`Connection`].
///
/// The guard borrows the connection exclusively, so at most one statement
/// per connection is in use at a time. Dropping it resets the statement and
/// returns it to the cache, or finalizes it if it cannot be reused.
///
/// # Examples
///
/// ```
/// use sealdb::{Connection, ConnectionConfig, InMemory, JournalMode, SqliteEngine, Step, Value};
///
/// let config = ConnectionConfig::new("demo").with_journal_mode(JournalMode::Memory);
/// let mut conn = Connection::open(&SqliteEngine::new(), &InMemory, &config).unwrap();
///
/// let mut stmt = conn.prepare("SELECT ? * 2").unwrap();
/// stmt.bind(1, 21).unwrap();
/// assert_eq!(stmt.step().unwrap(), Step::Row(vec![Value::Integer(42)]));
/// assert_eq!(stmt.step().unwrap(), Step::Done);
/// ```
pub struct Statement<'c> {
    connection: &'c mut Connection,
    prepared: Option<PreparedStatement>,
    eviction_error: Option<Error>,
}

impl<'c> Statement<'c> {
    pub(crate) fn new(
        connection: &'c mut Connection,
        prepared: PreparedStatement,
        eviction_error: Option<Error>,
    ) -> Self {
        Self {
            connection,
            prepared: Some(prepared),
            eviction_error,
        }
    }

    fn parts(&mut self) -> Result<(&mut PreparedStatement, &mut dyn NativeDatabase)> {
        let prepared = self
            .prepared
            .as_mut()
            .ok_or(StatementError::StatementFinalized)?;
        let db = self.connection.native()?;
        Ok((prepared, db))
    }

    /// Binds `value` to the 1-based parameter `index`.
    ///
    /// # Errors
    ///
    /// - [`StatementError::IndexOutOfRange`] unless `1 <= index <= parameter_count`
    /// - [`StatementError::ValueTooLarge`] for text or blobs over the limit
    /// - [`StatementError::StatementFinalized`] after [`finalize`](Self::finalize)
    /// - [`StatementError::ConnectionClosed`] if the connection is closed
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let max_value_len = self.connection.max_value_len();
        let (prepared, db) = self.parts()?;
        prepared.bind(db, index, value.into(), max_value_len)
    }

    /// Binds `values` to parameters `1..=values.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the number of values differs
    /// from the parameter count, or any error of [`bind`](Self::bind).
    pub fn bind_all(&mut self, values: &[Value]) -> Result<()> {
        let expected = self.parameter_count();
        if values.len() != expected {
            return Err(Error::invalid(
                "params",
                format!("expected {expected} parameter(s), got {}", values.len()),
            ));
        }
        for (offset, value) in values.iter().enumerate() {
            self.bind(offset + 1, value.clone())?;
        }
        Ok(())
    }

    /// Advances execution by one step.
    ///
    /// Lock contention is returned as is; wrap the whole unit of work in
    /// [`Connection::execute_with_retry`] to retry it.
    ///
    /// # Errors
    ///
    /// Returns [`StatementError::StatementFinalized`] after finalize, or the
    /// engine failure.
    pub fn step(&mut self) -> Result<Step> {
        let (prepared, db) = self.parts()?;
        prepared.step(db)
    }

    /// Clears bindings and execution state, keeping the compiled statement.
    ///
    /// # Errors
    ///
    /// Returns [`StatementError::StatementFinalized`] after finalize, or the
    /// engine failure.
    pub fn reset(&mut self) -> Result<()> {
        let (prepared, db) = self.parts()?;
        prepared.reset(db)
    }

    /// Releases the native handle now instead of returning it to the cache.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine failure from the first call.
    pub fn finalize(&mut self) -> Result<()> {
        let Some(prepared) = self.prepared.as_mut() else {
            return Ok(());
        };
        if prepared.is_finalized() {
            return Ok(());
        }
        let db = self.connection.native()?;
        prepared.finalize(db).map_err(Error::from)
    }

    /// Whether the native handle has been released.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.prepared
            .as_ref()
            .map_or(true, PreparedStatement::is_finalized)
    }

    /// The SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        self.prepared.as_ref().map_or("", PreparedStatement::sql)
    }

    /// Number of `?` parameters.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.prepared
            .as_ref()
            .map_or(0, PreparedStatement::parameter_count)
    }

    /// The value bound at the 1-based `index`, `NULL` if never bound.
    #[must_use]
    pub fn binding(&self, index: usize) -> Option<&Value> {
        self.prepared.as_ref().and_then(|p| p.binding(index))
    }

    /// Takes the error raised while evicting an older statement to make
    /// room for this one.
    ///
    /// The statement itself is usable either way.
    pub fn take_eviction_error(&mut self) -> Option<Error> {
        self.eviction_error.take()
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("connection", &self.connection.id())
            .field("prepared", &self.prepared)
            .field("eviction_error", &self.eviction_error)
            .finish()
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            self.connection.recycle(prepared);
        }
    }
}
