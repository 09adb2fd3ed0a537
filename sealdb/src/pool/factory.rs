//! How the pool opens new connections.

use std::sync::Arc;

use crate::database::{Connection, ConnectionConfig, PathProvider};
use crate::error::Result;
use crate::native::Engine;

/// Opens connections on behalf of a pool.
///
/// Called without the pool lock held. Any closure returning a
/// [`Connection`] is a factory.
pub trait ConnectionFactory: Send + Sync {
    /// Opens one new connection.
    ///
    /// # Errors
    ///
    /// Returns the open failure; the pool slot reserved for it is released.
    fn connect(&self) -> Result<Connection>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> Result<Connection> + Send + Sync,
{
    fn connect(&self) -> Result<Connection> {
        self()
    }
}

/// Opens every connection with the same engine, paths and configuration.
///
/// # Examples
///
/// ```
/// use sealdb::{
///     ConnectionConfig, ConnectionFactory, DatabaseFactory, InMemory, JournalMode, SqliteEngine,
/// };
/// use std::sync::Arc;
///
/// let factory = DatabaseFactory::new(
///     Arc::new(SqliteEngine::new()),
///     Arc::new(InMemory),
///     ConnectionConfig::new("cache").with_journal_mode(JournalMode::Memory),
/// );
/// assert!(factory.connect().unwrap().is_open());
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseFactory {
    engine: Arc<dyn Engine>,
    paths: Arc<dyn PathProvider>,
    config: ConnectionConfig,
}

impl DatabaseFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(
        engine: Arc<dyn Engine>,
        paths: Arc<dyn PathProvider>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            engine,
            paths,
            config,
        }
    }

    /// The configuration every connection is opened with.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl ConnectionFactory for DatabaseFactory {
    fn connect(&self) -> Result<Connection> {
        Connection::open(self.engine.as_ref(), self.paths.as_ref(), &self.config)
    }
}
