//! The open sequence of a connection.
//!
//! Each stage owns the native handle and only exposes the next legal step,
//! so the order key → validate → page size → journal mode cannot be
//! skipped or reordered. A stage that fails closes the handle before
//! returning its error; nothing half-initialized escapes.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::native::{
    Engine, NativeDatabase, NativeError, NativeResult, OpenMode, ResultCode, Step, Value,
};
use crate::retry::BusyRetryController;

use super::config::{JournalMode, Key};
use super::connection::retry_busy;

/// Minimal read that fails unless the key decrypts the first page.
pub(crate) const VALIDATION_SQL: &str = "SELECT count(*) FROM sqlite_master";

/// Runs `sql`, returning its first row. The statement is always finalized.
pub(crate) fn query_first_row(
    db: &mut dyn NativeDatabase,
    sql: &str,
) -> NativeResult<Option<Vec<Value>>> {
    let compiled = db.prepare(sql)?;
    let stepped = db.step(compiled.id);
    let finalized = db.finalize(compiled.id);
    let step = stepped?;
    finalized?;
    Ok(match step {
        Step::Row(row) => Some(row),
        Step::Done => None,
    })
}

/// Closes a handle on a failure path and returns `err`.
fn abandon(mut db: Box<dyn NativeDatabase>, path: &Path, err: Error) -> Error {
    if let Err(close_err) = db.close() {
        log::warn!(
            "failed to close {} after open error: {close_err}",
            path.display()
        );
    }
    err
}

fn classify_open(path: &Path, err: NativeError) -> Error {
    match err.code {
        ResultCode::CantOpen
        | ResultCode::IoError
        | ResultCode::Permission
        | ResultCode::NotFound => Error::Io {
            path: path.to_path_buf(),
            source: err,
        },
        ResultCode::NotADatabase => Error::WrongKey {
            path: path.to_path_buf(),
        },
        _ => Error::Sqlite(err),
    }
}

fn classify_validation(path: &Path, err: Error) -> Error {
    match err {
        Error::Sqlite(native) => match native.code {
            ResultCode::NotADatabase => Error::WrongKey {
                path: path.to_path_buf(),
            },
            ResultCode::Corrupt => Error::CorruptDatabase {
                details: native.message,
            },
            _ => classify_open(path, native),
        },
        other => other,
    }
}

/// A freshly opened handle. Nothing has run on it yet.
pub(crate) struct Opened {
    db: Box<dyn NativeDatabase>,
    path: PathBuf,
}

impl Opened {
    pub(crate) fn open(engine: &dyn Engine, path: &Path, mode: OpenMode) -> Result<Self> {
        log::debug!("opening {}", path.display());
        let db = engine
            .open(path, mode)
            .map_err(|err| classify_open(path, err))?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Applies `key` as the first statement on the handle.
    pub(crate) fn apply_key(mut self, key: Option<&Key>) -> Result<Keyed> {
        if let Some(key) = key {
            log::debug!("applying key to {}", self.path.display());
            if let Err(err) = self.db.key(key.as_bytes()) {
                let err = classify_open(&self.path, err);
                return Err(abandon(self.db, &self.path, err));
            }
        }
        Ok(Keyed {
            db: self.db,
            path: self.path,
        })
    }
}

/// A handle with its key applied but not yet proven correct.
pub(crate) struct Keyed {
    db: Box<dyn NativeDatabase>,
    path: PathBuf,
}

impl Keyed {
    /// Reads the schema table to prove the key decrypts the database.
    ///
    /// An unencrypted file that is not a database looks the same to the
    /// engine as a wrong key, and reports as [`Error::WrongKey`].
    pub(crate) fn validate(mut self, retry: &BusyRetryController) -> Result<Validated> {
        let result = retry_busy(retry, None, || {
            query_first_row(self.db.as_mut(), VALIDATION_SQL).map_err(Error::from)
        });
        match result {
            Ok(_) => {
                log::debug!("key validated for {}", self.path.display());
                Ok(Validated {
                    db: self.db,
                    path: self.path,
                })
            }
            Err(err) => {
                let err = classify_validation(&self.path, err);
                Err(abandon(self.db, &self.path, err))
            }
        }
    }
}

/// A handle whose key is known to be good.
pub(crate) struct Validated {
    db: Box<dyn NativeDatabase>,
    path: PathBuf,
}

impl Validated {
    /// Sets the page size. Only takes effect on a database with no pages.
    pub(crate) fn apply_page_size(
        mut self,
        page_size: Option<u32>,
        retry: &BusyRetryController,
    ) -> Result<Self> {
        let Some(page_size) = page_size else {
            return Ok(self);
        };
        log::debug!("setting page size {page_size} on {}", self.path.display());
        let sql = format!("PRAGMA page_size = {page_size}");
        match retry_busy(retry, None, || {
            query_first_row(self.db.as_mut(), &sql).map_err(Error::from_execution)
        }) {
            Ok(_) => Ok(self),
            Err(err) => Err(abandon(self.db, &self.path, err)),
        }
    }

    /// Requests `mode` and checks what the engine actually switched to.
    pub(crate) fn apply_journal_mode(
        mut self,
        mode: JournalMode,
        retry: &BusyRetryController,
    ) -> Result<Ready> {
        let sql = format!("PRAGMA journal_mode = {}", mode.as_pragma());
        let result = retry_busy(retry, None, || {
            query_first_row(self.db.as_mut(), &sql).map_err(Error::from_execution)
        });

        let effective = match result {
            Ok(row) => row
                .and_then(|row| row.into_iter().next())
                .and_then(|value| value.as_text().map(str::to_owned))
                .unwrap_or_default(),
            Err(err) => return Err(abandon(self.db, &self.path, err)),
        };

        if !effective.eq_ignore_ascii_case(mode.as_pragma()) {
            let err = Error::JournalModeRejected {
                requested: mode,
                effective,
            };
            return Err(abandon(self.db, &self.path, err));
        }

        log::debug!("journal mode {mode} active on {}", self.path.display());
        Ok(Ready {
            db: self.db,
            path: self.path,
            journal_mode: mode,
        })
    }
}

/// A fully bootstrapped handle.
pub(crate) struct Ready {
    pub(crate) db: Box<dyn NativeDatabase>,
    pub(crate) path: PathBuf,
    pub(crate) journal_mode: JournalMode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{CompiledStatement, MockNativeDatabase, StatementId};
    use crate::retry::RetryPolicy;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::fmt;
    use std::sync::Mutex;

    struct MockEngine(Mutex<Option<MockNativeDatabase>>);

    impl MockEngine {
        fn new(db: MockNativeDatabase) -> Self {
            Self(Mutex::new(Some(db)))
        }
    }

    impl fmt::Debug for MockEngine {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("MockEngine")
        }
    }

    impl Engine for MockEngine {
        fn open(&self, _path: &Path, _mode: OpenMode) -> NativeResult<Box<dyn NativeDatabase>> {
            let db = self.0.lock().unwrap().take().expect("opened twice");
            Ok(Box::new(db))
        }

        fn version(&self) -> String {
            "mock".to_string()
        }
    }

    fn no_retry() -> BusyRetryController {
        BusyRetryController::with_thread_random(RetryPolicy::no_retry())
    }

    fn compiled(id: u64) -> CompiledStatement {
        CompiledStatement {
            id: StatementId(id),
            parameter_count: 0,
        }
    }

    fn key() -> Key {
        Key::from_bytes(&[9; 32]).unwrap()
    }

    /// Only the key and the validation read may reach the handle before a
    /// wrong key is detected, and the handle ends up closed.
    #[test]
    fn test_wrong_key_call_sequence() {
        let mut seq = Sequence::new();
        let mut db = MockNativeDatabase::new();
        db.expect_key()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        db.expect_prepare()
            .with(eq(VALIDATION_SQL))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(compiled(1)));
        db.expect_step()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(NativeError::new(
                    ResultCode::NotADatabase,
                    "file is not a database",
                ))
            });
        db.expect_finalize()
            .with(eq(StatementId(1)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        db.expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let engine = MockEngine::new(db);
        let key = key();
        let result = Opened::open(&engine, Path::new("secret.db"), OpenMode::ReadWrite)
            .and_then(|opened| opened.apply_key(Some(&key)))
            .and_then(|keyed| keyed.validate(&no_retry()));

        assert!(matches!(result, Err(Error::WrongKey { .. })));
    }

    #[test]
    fn test_key_failure_closes_handle() {
        let mut db = MockNativeDatabase::new();
        db.expect_key()
            .returning(|_| Err(NativeError::new(ResultCode::Error, "bad key statement")));
        db.expect_prepare().never();
        db.expect_close().times(1).returning(|| Ok(()));

        let engine = MockEngine::new(db);
        let key = key();
        let result = Opened::open(&engine, Path::new("x.db"), OpenMode::ReadWrite)
            .and_then(|opened| opened.apply_key(Some(&key)));
        assert!(matches!(result, Err(Error::Sqlite(_))));
    }

    #[test]
    fn test_corruption_detected_at_validation() {
        let mut db = MockNativeDatabase::new();
        db.expect_prepare().returning(|_| Ok(compiled(1)));
        db.expect_step()
            .returning(|_| Err(NativeError::new(ResultCode::Corrupt, "malformed")));
        db.expect_finalize().returning(|_| Ok(()));
        db.expect_close().times(1).returning(|| Ok(()));

        let engine = MockEngine::new(db);
        let result = Opened::open(&engine, Path::new("x.db"), OpenMode::ReadWrite)
            .and_then(|opened| opened.apply_key(None))
            .and_then(|keyed| keyed.validate(&no_retry()));
        assert!(matches!(
            result,
            Err(Error::CorruptDatabase { details }) if details == "malformed"
        ));
    }

    #[test]
    fn test_busy_validation_exhausts_retries() {
        let mut db = MockNativeDatabase::new();
        db.expect_prepare().times(3).returning(|_| Ok(compiled(1)));
        db.expect_step()
            .times(3)
            .returning(|_| Err(NativeError::new(ResultCode::Busy, "database is locked")));
        db.expect_finalize().times(3).returning(|_| Ok(()));
        db.expect_close().times(1).returning(|| Ok(()));

        let policy = RetryPolicy::new(
            2,
            std::time::Duration::from_micros(10),
            std::time::Duration::from_micros(100),
        )
        .unwrap();
        let retry = BusyRetryController::with_thread_random(policy);
        let engine = MockEngine::new(db);
        let result = Opened::open(&engine, Path::new("x.db"), OpenMode::ReadWrite)
            .and_then(|opened| opened.apply_key(None))
            .and_then(|keyed| keyed.validate(&retry));
        assert!(matches!(result, Err(Error::BusyTimeout { attempts: 3 })));
    }

    #[test]
    fn test_journal_mode_readback_mismatch() {
        let mut db = MockNativeDatabase::new();
        db.expect_prepare().returning(|_| Ok(compiled(1)));
        db.expect_step()
            .times(1)
            .returning(|_| Ok(Step::Row(vec![Value::Text("memory".into())])));
        db.expect_finalize().returning(|_| Ok(()));
        db.expect_close().times(1).returning(|| Ok(()));

        let validated = Validated {
            db: Box::new(db),
            path: PathBuf::from(":memory:"),
        };
        let result = validated.apply_journal_mode(JournalMode::Wal, &no_retry());
        assert!(matches!(
            result,
            Err(Error::JournalModeRejected { requested: JournalMode::Wal, ref effective })
                if effective == "memory"
        ));
    }

    #[test]
    fn test_journal_mode_readback_is_case_insensitive() {
        let mut db = MockNativeDatabase::new();
        db.expect_prepare()
            .with(eq("PRAGMA journal_mode = WAL"))
            .returning(|_| Ok(compiled(1)));
        db.expect_step()
            .returning(|_| Ok(Step::Row(vec![Value::Text("wal".into())])));
        db.expect_finalize().returning(|_| Ok(()));
        db.expect_close().never();

        let validated = Validated {
            db: Box::new(db),
            path: PathBuf::from("x.db"),
        };
        let ready = validated
            .apply_journal_mode(JournalMode::Wal, &no_retry())
            .unwrap();
        assert_eq!(ready.journal_mode, JournalMode::Wal);
    }

    #[test]
    fn test_page_size_skipped_when_unset() {
        let mut db = MockNativeDatabase::new();
        db.expect_prepare().never();
        let validated = Validated {
            db: Box::new(db),
            path: PathBuf::from("x.db"),
        };
        assert!(validated.apply_page_size(None, &no_retry()).is_ok());
    }

    #[test]
    fn test_open_failure_maps_to_io() {
        let err = classify_open(
            Path::new("/nope/x.db"),
            NativeError::new(ResultCode::CantOpen, "unable to open database file"),
        );
        assert!(matches!(err, Error::Io { .. }));
    }
}
