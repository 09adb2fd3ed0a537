#![deny(missing_docs, unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # sealdb
//!
//! Connection and statement lifecycle management for encrypted embedded
//! SQL databases.
//!
//! This library opens native database handles with their encryption key
//! applied and validated before anything else runs, caches prepared
//! statements per connection, retries lock contention with jittered
//! backoff, and pools connections with FIFO fairness and timeouts.
//!
//! ## Core Types
//!
//! - [`Connection`] and [`Statement`]: one keyed handle and its prepared statements
//! - [`ConnectionPool`] and [`PooledConnection`]: bounded leasing of connections
//! - [`TieredPool`]: a single primary connection beside a pool of secondaries
//! - [`BusyRetryController`] and [`RandomSource`]: backoff for busy/locked errors
//! - [`Engine`] and [`NativeDatabase`]: the boundary to the SQL engine
//! - [`Error`] and [`Result`]: Error handling types
//! - [`Logger`] and [`LogLevel`]: Logging infrastructure
//!
//! ## Examples
//!
//! ```
//! use sealdb::{
//!     ConnectionConfig, ConnectionPool, DatabaseFactory, InMemory, JournalMode, PoolConfig,
//!     SqliteEngine, Value,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let factory = DatabaseFactory::new(
//!     Arc::new(SqliteEngine::new()),
//!     Arc::new(InMemory),
//!     ConnectionConfig::new("scratch").with_journal_mode(JournalMode::Memory),
//! );
//! let pool = ConnectionPool::new(PoolConfig::new(4), factory).unwrap();
//!
//! let mut conn = pool.lease(Duration::from_secs(1)).unwrap();
//! let rows = conn.query("SELECT ? + 1", &[Value::from(41)]).unwrap();
//! assert_eq!(rows, vec![vec![Value::Integer(42)]]);
//! ```

pub mod cancel;
pub mod database;
pub mod error;
pub mod logging;
pub mod native;
pub mod pool;
pub mod random;
pub mod retry;

// Re-export key types at crate root for convenience
pub use cancel::CancellationToken;
pub use database::{
    Connection, ConnectionConfig, ConnectionId, DirectoryPaths, FixedPath, InMemory, JournalMode,
    Key, PathProvider, PreparedStatement, Statement, KEY_LEN,
};
pub use error::{Error, Result, StatementError};
pub use logging::{init_logger, resolve_log_level, LogLevel, Logger};
pub use native::{
    ColumnType, CompiledStatement, Engine, NativeDatabase, NativeError, NativeResult, OpenMode,
    ResultCode, SqliteEngine, StatementId, Step, Value,
};
pub use pool::{
    ConnectionFactory, ConnectionPool, DatabaseFactory, PoolConfig, PoolStatus, PooledConnection,
    Priority, TieredPool, TieredStatus,
};
pub use random::{FixedRandom, RandomSource, SeededRandom, SequenceRandom, ThreadRandom};
pub use retry::{BusyRetryController, RetryPolicy};
