//! `rusqlite`-backed engine.
//!
//! `rusqlite` ties statements to the lifetime of their connection, so this
//! adapter keeps the SQL text and bindings of every live handle and runs the
//! statement through the connection's own compiled-statement cache on the
//! first `step`. Rows are buffered until the statement is reset.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use rusqlite::OpenFlags;

use super::{
    CompiledStatement, Engine, NativeDatabase, NativeError, NativeResult, OpenMode, ResultCode,
    StatementId, Step, Value,
};

/// Compiled statements kept by `rusqlite` per connection.
const NATIVE_CACHE_CAPACITY: usize = 64;

/// The production [`Engine`], linking SQLite (or SQLCipher with the
/// `sqlcipher` feature) through `rusqlite`.
///
/// # Examples
///
/// ```
/// use sealdb::{Engine, SqliteEngine};
///
/// let engine = SqliteEngine::new();
/// assert!(!engine.version().is_empty());
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteEngine;

impl SqliteEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Engine for SqliteEngine {
    fn open(&self, path: &Path, mode: OpenMode) -> NativeResult<Box<dyn NativeDatabase>> {
        let flags = match mode {
            OpenMode::ReadWriteCreate => {
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
            OpenMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
            OpenMode::ReadOnly => {
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
        };

        let conn = rusqlite::Connection::open_with_flags(path, flags)?;
        // Contention is retried above this layer; the engine must report it
        // immediately instead of spinning in its own busy handler.
        conn.busy_timeout(Duration::ZERO)?;
        conn.set_prepared_statement_cache_capacity(NATIVE_CACHE_CAPACITY);

        Ok(Box::new(SqliteDatabase {
            conn: Some(conn),
            statements: HashMap::new(),
            next_id: 1,
            changes: 0,
        }))
    }

    fn version(&self) -> String {
        rusqlite::version().to_string()
    }
}

struct StatementState {
    sql: String,
    parameters: Vec<Value>,
    pending: Option<VecDeque<Vec<Value>>>,
}

struct SqliteDatabase {
    conn: Option<rusqlite::Connection>,
    statements: HashMap<u64, StatementState>,
    next_id: u64,
    changes: u64,
}

fn closed() -> NativeError {
    NativeError::new(ResultCode::Misuse, "database handle is closed")
}

fn unknown(statement: StatementId) -> NativeError {
    NativeError::new(ResultCode::Misuse, format!("unknown statement {statement}"))
}

/// Runs `sql` to completion and buffers every row it produces.
fn run(
    conn: &rusqlite::Connection,
    sql: &str,
    parameters: &[Value],
) -> rusqlite::Result<VecDeque<Vec<Value>>> {
    let mut stmt = conn.prepare_cached(sql)?;
    for (offset, value) in parameters.iter().enumerate() {
        stmt.raw_bind_parameter(offset + 1, rusqlite::types::Value::from(value))?;
    }

    let columns = stmt.column_count();
    let mut rows = stmt.raw_query();
    let mut buffered = VecDeque::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for column in 0..columns {
            values.push(Value::from(row.get_ref(column)?));
        }
        buffered.push_back(values);
    }
    Ok(buffered)
}

impl NativeDatabase for SqliteDatabase {
    fn key(&mut self, key: &[u8]) -> NativeResult<()> {
        let conn = self.conn.as_ref().ok_or_else(closed)?;
        let mut literal = String::with_capacity(key.len() * 2);
        for byte in key {
            let _ = write!(literal, "{byte:02X}");
        }
        // Not routed through the compiled-statement cache so the key text
        // does not outlive this call. SQLCipher answers with a row; plain
        // SQLite ignores the pragma.
        let mut stmt = conn.prepare(&format!("PRAGMA key = \"x'{literal}'\""))?;
        let mut rows = stmt.raw_query();
        while rows.next()?.is_some() {}
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> NativeResult<CompiledStatement> {
        let conn = self.conn.as_ref().ok_or_else(closed)?;
        let parameter_count = conn.prepare_cached(sql)?.parameter_count();

        let id = StatementId(self.next_id);
        self.next_id += 1;
        self.statements.insert(
            id.0,
            StatementState {
                sql: sql.to_owned(),
                parameters: vec![Value::Null; parameter_count],
                pending: None,
            },
        );
        Ok(CompiledStatement {
            id,
            parameter_count,
        })
    }

    fn bind(&mut self, statement: StatementId, index: usize, value: &Value) -> NativeResult<()> {
        let state = self
            .statements
            .get_mut(&statement.0)
            .ok_or_else(|| unknown(statement))?;
        if index == 0 || index > state.parameters.len() {
            return Err(NativeError::new(
                ResultCode::Range,
                format!("bind index {index} out of range"),
            ));
        }
        state.parameters[index - 1] = value.clone();
        Ok(())
    }

    fn step(&mut self, statement: StatementId) -> NativeResult<Step> {
        let conn = self.conn.as_ref().ok_or_else(closed)?;
        let state = self
            .statements
            .get_mut(&statement.0)
            .ok_or_else(|| unknown(statement))?;

        if state.pending.is_none() {
            let rows = run(conn, &state.sql, &state.parameters)?;
            self.changes = u64::try_from(conn.changes()).unwrap_or(u64::MAX);
            state.pending = Some(rows);
        }

        Ok(state
            .pending
            .as_mut()
            .and_then(VecDeque::pop_front)
            .map_or(Step::Done, Step::Row))
    }

    fn reset(&mut self, statement: StatementId) -> NativeResult<()> {
        let state = self
            .statements
            .get_mut(&statement.0)
            .ok_or_else(|| unknown(statement))?;
        state.pending = None;
        Ok(())
    }

    fn clear_bindings(&mut self, statement: StatementId) -> NativeResult<()> {
        let state = self
            .statements
            .get_mut(&statement.0)
            .ok_or_else(|| unknown(statement))?;
        state.parameters.fill(Value::Null);
        Ok(())
    }

    fn finalize(&mut self, statement: StatementId) -> NativeResult<()> {
        self.statements
            .remove(&statement.0)
            .map(|_| ())
            .ok_or_else(|| unknown(statement))
    }

    fn changes(&self) -> u64 {
        self.changes
    }

    fn close(&mut self) -> NativeResult<()> {
        self.statements.clear();
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| err.into()),
            None => Ok(()),
        }
    }
}
