//! Errors reported across the native boundary.

use std::fmt;

use thiserror::Error;

/// Result type for calls into the native engine.
pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// SQLite primary result codes that can be reported as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Generic error (`SQLITE_ERROR`).
    Error,
    /// Internal logic error (`SQLITE_INTERNAL`).
    Internal,
    /// Access permission denied (`SQLITE_PERM`).
    Permission,
    /// Callback requested an abort (`SQLITE_ABORT`).
    Abort,
    /// The database file is locked (`SQLITE_BUSY`).
    Busy,
    /// A table in the database is locked (`SQLITE_LOCKED`).
    Locked,
    /// Allocation failed (`SQLITE_NOMEM`).
    NoMemory,
    /// Attempt to write a read-only database (`SQLITE_READONLY`).
    ReadOnly,
    /// Operation interrupted (`SQLITE_INTERRUPT`).
    Interrupt,
    /// Disk I/O error (`SQLITE_IOERR`).
    IoError,
    /// The database disk image is malformed (`SQLITE_CORRUPT`).
    Corrupt,
    /// Unknown opcode or file (`SQLITE_NOTFOUND`).
    NotFound,
    /// Database or disk is full (`SQLITE_FULL`).
    Full,
    /// Unable to open the database file (`SQLITE_CANTOPEN`).
    CantOpen,
    /// Locking protocol error (`SQLITE_PROTOCOL`).
    Protocol,
    /// The schema changed (`SQLITE_SCHEMA`).
    Schema,
    /// String or blob exceeds the size limit (`SQLITE_TOOBIG`).
    TooBig,
    /// Constraint violation (`SQLITE_CONSTRAINT`).
    Constraint,
    /// Data type mismatch (`SQLITE_MISMATCH`).
    Mismatch,
    /// Library used incorrectly (`SQLITE_MISUSE`).
    Misuse,
    /// Large file support unavailable (`SQLITE_NOLFS`).
    NoLargeFileSupport,
    /// Authorization denied (`SQLITE_AUTH`).
    Auth,
    /// Bind parameter or column index out of range (`SQLITE_RANGE`).
    Range,
    /// File is not a database, or the key is wrong (`SQLITE_NOTADB`).
    NotADatabase,
    /// Any other primary code.
    Other(i32),
}

impl ResultCode {
    /// Maps a primary result code (the low byte of an extended code).
    #[must_use]
    pub const fn from_primary(code: i32) -> Self {
        match code {
            1 => Self::Error,
            2 => Self::Internal,
            3 => Self::Permission,
            4 => Self::Abort,
            5 => Self::Busy,
            6 => Self::Locked,
            7 => Self::NoMemory,
            8 => Self::ReadOnly,
            9 => Self::Interrupt,
            10 => Self::IoError,
            11 => Self::Corrupt,
            12 => Self::NotFound,
            13 => Self::Full,
            14 => Self::CantOpen,
            15 => Self::Protocol,
            17 => Self::Schema,
            18 => Self::TooBig,
            19 => Self::Constraint,
            20 => Self::Mismatch,
            21 => Self::Misuse,
            22 => Self::NoLargeFileSupport,
            23 => Self::Auth,
            25 => Self::Range,
            26 => Self::NotADatabase,
            other => Self::Other(other),
        }
    }

    /// The numeric primary code.
    #[must_use]
    pub const fn primary(self) -> i32 {
        match self {
            Self::Error => 1,
            Self::Internal => 2,
            Self::Permission => 3,
            Self::Abort => 4,
            Self::Busy => 5,
            Self::Locked => 6,
            Self::NoMemory => 7,
            Self::ReadOnly => 8,
            Self::Interrupt => 9,
            Self::IoError => 10,
            Self::Corrupt => 11,
            Self::NotFound => 12,
            Self::Full => 13,
            Self::CantOpen => 14,
            Self::Protocol => 15,
            Self::Schema => 17,
            Self::TooBig => 18,
            Self::Constraint => 19,
            Self::Mismatch => 20,
            Self::Misuse => 21,
            Self::NoLargeFileSupport => 22,
            Self::Auth => 23,
            Self::Range => 25,
            Self::NotADatabase => 26,
            Self::Other(code) => code,
        }
    }

    /// Whether this code signals lock contention that may clear on retry.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Busy | Self::Locked)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "SQLITE_ERROR",
            Self::Internal => "SQLITE_INTERNAL",
            Self::Permission => "SQLITE_PERM",
            Self::Abort => "SQLITE_ABORT",
            Self::Busy => "SQLITE_BUSY",
            Self::Locked => "SQLITE_LOCKED",
            Self::NoMemory => "SQLITE_NOMEM",
            Self::ReadOnly => "SQLITE_READONLY",
            Self::Interrupt => "SQLITE_INTERRUPT",
            Self::IoError => "SQLITE_IOERR",
            Self::Corrupt => "SQLITE_CORRUPT",
            Self::NotFound => "SQLITE_NOTFOUND",
            Self::Full => "SQLITE_FULL",
            Self::CantOpen => "SQLITE_CANTOPEN",
            Self::Protocol => "SQLITE_PROTOCOL",
            Self::Schema => "SQLITE_SCHEMA",
            Self::TooBig => "SQLITE_TOOBIG",
            Self::Constraint => "SQLITE_CONSTRAINT",
            Self::Mismatch => "SQLITE_MISMATCH",
            Self::Misuse => "SQLITE_MISUSE",
            Self::NoLargeFileSupport => "SQLITE_NOLFS",
            Self::Auth => "SQLITE_AUTH",
            Self::Range => "SQLITE_RANGE",
            Self::NotADatabase => "SQLITE_NOTADB",
            Self::Other(code) => return write!(f, "SQLITE_{code}"),
        };
        f.write_str(name)
    }
}

/// A failure reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} (extended code {extended_code}): {message}")]
pub struct NativeError {
    /// Primary result code.
    pub code: ResultCode,
    /// Extended result code as reported by the engine.
    pub extended_code: i32,
    /// Engine-provided message.
    pub message: String,
}

impl NativeError {
    /// Creates an error whose extended code equals its primary code.
    #[must_use]
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            extended_code: code.primary(),
            message: message.into(),
        }
    }

    /// Whether the failure is lock contention.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.code.is_busy()
    }
}

impl From<rusqlite::Error> for NativeError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error() {
            Some(ffi_err) => Self {
                code: ResultCode::from_primary(ffi_err.extended_code & 0xff),
                extended_code: ffi_err.extended_code,
                message: err.to_string(),
            },
            None => Self::new(ResultCode::Error, err.to_string()),
        }
    }
}
