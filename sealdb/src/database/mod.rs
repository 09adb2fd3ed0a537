//! Connections, prepared statements and the open sequence.
//!
//! A [`Connection`] is opened through an [`Engine`](crate::Engine) and a
//! [`PathProvider`], keyed and validated before anything else runs, and
//! then hands out [`Statement`] guards backed by a bounded statement cache.
//!
//! # Examples
//!
//! ```no_run
//! use sealdb::{Connection, ConnectionConfig, DirectoryPaths, Key, SqliteEngine, Value};
//!
//! let config = ConnectionConfig::new("orders")
//!     .with_key(Key::from_hex(&"00".repeat(32)).unwrap());
//! let paths = DirectoryPaths::new("/var/lib/app");
//! let mut conn = Connection::open(&SqliteEngine::new(), &paths, &config).unwrap();
//!
//! conn.execute("CREATE TABLE IF NOT EXISTS orders (id INTEGER)", &[]).unwrap();
//! conn.execute("INSERT INTO orders VALUES (?)", &[Value::from(1)]).unwrap();
//! ```

mod bootstrap;
mod cache;
mod config;
mod connection;
mod path;
mod statement;

// Re-export public API
pub use config::{
    ConnectionConfig, JournalMode, Key, DEFAULT_MAX_VALUE_LEN, DEFAULT_STATEMENT_CACHE_CAPACITY,
    KEY_LEN, PAGE_SIZE_EXPONENT_RANGE,
};
pub use connection::{Connection, ConnectionId};
pub use path::{DirectoryPaths, FixedPath, InMemory, PathProvider, MEMORY_LOCATION};
pub use statement::{PreparedStatement, Statement};
