//! Error types for the sealdb library.
//!
//! Every failure of the core is reported through [`Error`]. Native engine
//! failures arrive as [`NativeError`] and are classified into the variants
//! below at the point where their meaning is known (opening, keying,
//! binding, executing).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::database::JournalMode;
use crate::native::{NativeError, ResultCode};

/// Result type alias for operations that may fail with a sealdb error.
///
/// # Examples
///
/// ```
/// use sealdb::{Error, Result};
///
/// fn example_operation() -> Result<u32> {
///     Ok(16)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the sealdb library.
#[derive(Debug, Error)]
pub enum Error {
    /// The native engine could not open or close the database file.
    #[error("I/O error for {}: {source}", path.display())]
    Io {
        /// The database location.
        path: PathBuf,
        /// The underlying engine failure.
        #[source]
        source: NativeError,
    },

    /// The key did not decrypt the database.
    ///
    /// The engine cannot tell an encrypted database opened with the wrong
    /// key from a file that is not a database at all.
    #[error("wrong key for {}", path.display())]
    WrongKey {
        /// The database location.
        path: PathBuf,
    },

    /// The engine reports structural corruption.
    #[error("database corruption detected: {details}")]
    CorruptDatabase {
        /// Engine-provided details.
        details: String,
    },

    /// Lock contention outlasted the retry budget.
    #[error("database busy after {attempts} attempt(s)")]
    BusyTimeout {
        /// Number of attempts made, including the first.
        attempts: u32,
    },

    /// The engine did not honour the requested journal mode.
    #[error("journal mode {requested} rejected; engine reports '{effective}'")]
    JournalModeRejected {
        /// The mode that was asked for.
        requested: JournalMode,
        /// The mode the engine reported back.
        effective: String,
    },

    /// A prepared-statement failure.
    #[error(transparent)]
    Statement(#[from] StatementError),

    /// No connection became available before the lease timed out.
    #[error("no connection available within {timeout:?}")]
    PoolExhausted {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The pool no longer hands out connections.
    #[error("connection pool is shutting down")]
    PoolShuttingDown,

    /// Shutdown gave up waiting for leased connections.
    #[error("pool shutdown timed out with {leased} connection(s) still leased")]
    ShutdownTimedOut {
        /// Connections that were still out when the drain timeout elapsed.
        leased: usize,
    },

    /// A cancellation token fired while the operation was waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// A caller supplied a malformed argument.
    #[error("invalid argument '{field}': {message}")]
    InvalidArgument {
        /// The offending argument.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Any other native engine failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] NativeError),
}

/// Failures specific to prepared statements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatementError {
    /// A parameter index outside `1..=count`.
    #[error("parameter index {index} out of range 1..={count}")]
    IndexOutOfRange {
        /// The rejected index.
        index: usize,
        /// The statement's parameter count.
        count: usize,
    },

    /// A text or blob value longer than the configured limit.
    #[error("value of {len} bytes exceeds the {limit} byte limit")]
    ValueTooLarge {
        /// Length of the rejected value.
        len: usize,
        /// The configured limit.
        limit: usize,
    },

    /// The statement was already finalized.
    #[error("statement already finalized")]
    StatementFinalized,

    /// The owning connection is closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Finalizing a statement evicted from the cache failed.
    #[error("failed to finalize evicted statement '{sql}': {source}")]
    EvictionFailed {
        /// SQL text of the evicted statement.
        sql: String,
        /// The engine failure.
        #[source]
        source: NativeError,
    },
}

impl Error {
    /// Builds an [`Error::InvalidArgument`].
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classifies a failure reported while compiling or running a statement.
    ///
    /// Corruption is promoted to [`Error::CorruptDatabase`]; everything
    /// else stays an engine error.
    pub(crate) fn from_execution(err: NativeError) -> Self {
        match err.code {
            ResultCode::Corrupt => Self::CorruptDatabase {
                details: err.message,
            },
            _ => Self::Sqlite(err),
        }
    }

    /// Check if error is native lock contention that may clear on retry.
    ///
    /// # Examples
    ///
    /// ```
    /// use sealdb::{Error, NativeError, ResultCode};
    ///
    /// let err = Error::from(NativeError::new(ResultCode::Busy, "database is locked"));
    /// assert!(err.is_busy());
    /// assert!(!Error::PoolShuttingDown.is_busy());
    /// ```
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Sqlite(native) if native.is_busy())
    }

    /// Check if error is a prepared-statement failure.
    #[must_use]
    pub const fn is_statement_error(&self) -> bool {
        matches!(self, Self::Statement(_))
    }
}
