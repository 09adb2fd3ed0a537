//! Common test utilities for integration tests.
//!
//! This module provides temporary database locations and an engine wrapper
//! that counts how often SQL is compiled and can inject engine failures for
//! chosen SQL text.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sealdb::{
    CompiledStatement, ConnectionConfig, Engine, JournalMode, NativeDatabase, NativeError,
    NativeResult, OpenMode, ResultCode, RetryPolicy, SqliteEngine, StatementId, Step, Value,
};
use tempfile::TempDir;

/// Creates a temporary directory for database files.
///
/// The directory is removed when the returned `TempDir` is dropped.
#[allow(dead_code)]
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

/// A file-backed configuration with a fast retry policy.
#[allow(dead_code)]
pub fn fast_config(name: &str, journal_mode: JournalMode) -> ConnectionConfig {
    let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
        .expect("valid retry policy");
    ConnectionConfig::new(name)
        .with_journal_mode(journal_mode)
        .with_retry_policy(retry)
}

/// Path of the database file `name` inside `dir`.
#[allow(dead_code)]
pub fn db_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.db"))
}

/// Wraps [`SqliteEngine`] and counts every `prepare` on every handle it opens.
///
/// Statements compiled from the SQL given to
/// [`with_failing_finalize`](Self::with_failing_finalize) or
/// [`with_corrupt_step`](Self::with_corrupt_step) fail in that call.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct CountingEngine {
    inner: SqliteEngine,
    prepares: Arc<AtomicUsize>,
    failing_finalize: Option<Arc<str>>,
    corrupt_step: Option<Arc<str>>,
}

#[allow(dead_code)]
impl CountingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `finalize` fail for statements compiled from `sql`.
    pub fn with_failing_finalize(mut self, sql: &str) -> Self {
        self.failing_finalize = Some(Arc::from(sql));
        self
    }

    /// Makes `step` report corruption for statements compiled from `sql`.
    pub fn with_corrupt_step(mut self, sql: &str) -> Self {
        self.corrupt_step = Some(Arc::from(sql));
        self
    }

    /// Number of statements compiled so far.
    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CountingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingEngine")
            .field("prepares", &self.prepares())
            .finish()
    }
}

impl Engine for CountingEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> NativeResult<Box<dyn NativeDatabase>> {
        let inner = self.inner.open(path, mode)?;
        Ok(Box::new(CountingDatabase {
            inner,
            prepares: Arc::clone(&self.prepares),
            failing_finalize: self.failing_finalize.clone(),
            corrupt_step: self.corrupt_step.clone(),
            sql_by_id: HashMap::new(),
        }))
    }

    fn version(&self) -> String {
        self.inner.version()
    }
}

#[allow(dead_code)]
struct CountingDatabase {
    inner: Box<dyn NativeDatabase>,
    prepares: Arc<AtomicUsize>,
    failing_finalize: Option<Arc<str>>,
    corrupt_step: Option<Arc<str>>,
    sql_by_id: HashMap<StatementId, String>,
}

#[allow(dead_code)]
impl CountingDatabase {
    fn compiled_from(&self, statement: StatementId, target: Option<&Arc<str>>) -> bool {
        match (self.sql_by_id.get(&statement), target) {
            (Some(sql), Some(target)) => sql.as_str() == &**target,
            _ => false,
        }
    }
}

impl NativeDatabase for CountingDatabase {
    fn key(&mut self, key: &[u8]) -> NativeResult<()> {
        self.inner.key(key)
    }

    fn prepare(&mut self, sql: &str) -> NativeResult<CompiledStatement> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        let compiled = self.inner.prepare(sql)?;
        self.sql_by_id.insert(compiled.id, sql.to_owned());
        Ok(compiled)
    }

    fn bind(&mut self, statement: StatementId, index: usize, value: &Value) -> NativeResult<()> {
        self.inner.bind(statement, index, value)
    }

    fn step(&mut self, statement: StatementId) -> NativeResult<Step> {
        if self.compiled_from(statement, self.corrupt_step.as_ref()) {
            return Err(NativeError::new(
                ResultCode::Corrupt,
                "database disk image is malformed",
            ));
        }
        self.inner.step(statement)
    }

    fn reset(&mut self, statement: StatementId) -> NativeResult<()> {
        self.inner.reset(statement)
    }

    fn clear_bindings(&mut self, statement: StatementId) -> NativeResult<()> {
        self.inner.clear_bindings(statement)
    }

    fn finalize(&mut self, statement: StatementId) -> NativeResult<()> {
        // The real handle is always released so the connection closes cleanly.
        let finalized = self.inner.finalize(statement);
        let fail = self.compiled_from(statement, self.failing_finalize.as_ref());
        self.sql_by_id.remove(&statement);
        if fail {
            return Err(NativeError::new(ResultCode::Misuse, "finalize failed"));
        }
        finalized
    }

    fn changes(&self) -> u64 {
        self.inner.changes()
    }

    fn close(&mut self) -> NativeResult<()> {
        self.inner.close()
    }
}
