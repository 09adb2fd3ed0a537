//! The native engine boundary.
//!
//! Everything above this module talks to the database engine through the
//! [`Engine`] and [`NativeDatabase`] traits. Statement handles cross the
//! boundary as opaque [`StatementId`] values; only the engine knows what
//! they refer to, and only [`PreparedStatement`](crate::PreparedStatement)
//! holds one on the caller's side.
//!
//! The production engine is [`SqliteEngine`], backed by `rusqlite`.

mod error;
mod sqlite;
mod value;

use std::fmt;
use std::path::Path;

pub use error::{NativeError, NativeResult, ResultCode};
pub use sqlite::SqliteEngine;
pub use value::{ColumnType, Value};

/// Opaque handle to a compiled statement owned by a [`NativeDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

/// A freshly compiled statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledStatement {
    /// Handle used for every later call on this statement.
    pub id: StatementId,
    /// Number of `?` parameters the statement declares.
    pub parameter_count: usize,
}

/// Result of advancing a statement by one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The statement produced a row.
    Row(Vec<Value>),
    /// The statement has run to completion.
    Done,
}

/// How the engine should open the database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Read-write, creating the file if it does not exist.
    #[default]
    ReadWriteCreate,
    /// Read-write, failing if the file does not exist.
    ReadWrite,
    /// Read-only.
    ReadOnly,
}

/// A database engine capable of opening native handles.
///
/// Engines are shared between every connection of a pool, so they must be
/// `Send + Sync`; the handles they return are only `Send`.
pub trait Engine: Send + Sync + fmt::Debug {
    /// Opens a native database handle.
    ///
    /// Implementations must not execute any statement on the new handle:
    /// the first statement it sees has to be the key.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] if the file cannot be opened.
    fn open(&self, path: &Path, mode: OpenMode) -> NativeResult<Box<dyn NativeDatabase>>;

    /// Version string of the underlying library.
    fn version(&self) -> String;
}

/// One open native database handle.
///
/// A handle is not reentrant. It may move between threads but must only be
/// used by one thread at a time, which is why the trait is `Send` and not
/// `Sync`.
#[cfg_attr(test, mockall::automock)]
pub trait NativeDatabase: Send {
    /// Applies encryption key material to the handle.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] if the engine rejects the key statement.
    fn key(&mut self, key: &[u8]) -> NativeResult<()>;

    /// Compiles `sql` into a statement.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] if the SQL does not compile.
    fn prepare(&mut self, sql: &str) -> NativeResult<CompiledStatement>;

    /// Binds `value` to the 1-based parameter `index`.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] with [`ResultCode::Range`] for a bad index.
    fn bind(&mut self, statement: StatementId, index: usize, value: &Value) -> NativeResult<()>;

    /// Advances the statement by one step.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`]; [`ResultCode::Busy`] and
    /// [`ResultCode::Locked`] signal lock contention.
    fn step(&mut self, statement: StatementId) -> NativeResult<Step>;

    /// Resets execution state, keeping bindings.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] if the handle is unknown.
    fn reset(&mut self, statement: StatementId) -> NativeResult<()>;

    /// Sets every parameter back to NULL.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] if the handle is unknown.
    fn clear_bindings(&mut self, statement: StatementId) -> NativeResult<()>;

    /// Releases the statement. The id is invalid afterwards.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] if the handle is unknown.
    fn finalize(&mut self, statement: StatementId) -> NativeResult<()>;

    /// Rows changed by the most recently completed statement.
    fn changes(&self) -> u64;

    /// Closes the handle.
    ///
    /// # Errors
    ///
    /// Returns a [`NativeError`] if the engine fails to close the file.
    fn close(&mut self) -> NativeResult<()>;
}
