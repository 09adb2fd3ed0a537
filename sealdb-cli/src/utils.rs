//! Utility functions for CLI operations.
//!
//! This module turns global options and the configuration file into library
//! configuration, opens connections, and formats values for display.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sealdb::{Connection, ConnectionConfig, FixedPath, JournalMode, Key, SqliteEngine, Value};

use crate::config::FileConfig;
use crate::error::CliError;

/// Global CLI options shared across all commands.
#[derive(Debug, Clone, Default)]
#[allow(dead_code)] // `verbose` is only consumed by the logger in main.rs
pub struct GlobalOptions {
    /// Enable verbose output.
    pub verbose: bool,

    /// Suppress non-essential output.
    pub quiet: bool,

    /// Database file to operate on.
    pub database: Option<PathBuf>,

    /// Encryption key as 64 hex digits.
    pub key_hex: Option<String>,

    /// Journal mode overriding the configuration file.
    pub journal_mode: Option<JournalMode>,

    /// Configuration file location.
    pub config: Option<PathBuf>,
}

/// Load the configuration file named by `--config`, or an empty one.
pub fn load_file_config(global: &GlobalOptions) -> Result<FileConfig, CliError> {
    match &global.config {
        Some(path) => FileConfig::load(path),
        None => Ok(FileConfig::default()),
    }
}

/// The database file from `--database` or `SEALDB_DATABASE`.
pub fn database_path(global: &GlobalOptions) -> Result<&Path, CliError> {
    global.database.as_deref().ok_or_else(|| {
        CliError::InvalidArguments(
            "no database given (use --database or SEALDB_DATABASE)".to_string(),
        )
    })
}

/// Build the connection configuration.
///
/// Precedence, highest first:
/// 1. Global options (`--key-hex`, `--journal-mode`)
/// 2. Configuration file
/// 3. Library defaults
pub fn connection_config(
    global: &GlobalOptions,
    file: &FileConfig,
) -> Result<ConnectionConfig, CliError> {
    let path = database_path(global)?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("database");

    let mut config = ConnectionConfig::new(name);

    if let Some(hex) = &global.key_hex {
        let key = Key::from_hex(hex).map_err(|e| CliError::InvalidArguments(e.to_string()))?;
        config = config.with_key(key);
    }

    if let Some(mode) = global.journal_mode.or(file.journal_mode) {
        config = config.with_journal_mode(mode);
    }

    if let Some(capacity) = file.statement_cache_capacity {
        config = config.with_statement_cache_capacity(capacity);
    }

    if let Some(exponent) = file.page_size_exponent {
        config = config
            .with_page_size_exponent(exponent)
            .map_err(|e| CliError::Config(e.to_string()))?;
    }

    let retry = file.retry_policy().map_err(|e| CliError::Config(e.to_string()))?;
    Ok(config.with_retry_policy(retry))
}

/// The path provider pointing at the `--database` file.
pub fn path_provider(global: &GlobalOptions) -> Result<Arc<FixedPath>, CliError> {
    Ok(Arc::new(FixedPath(database_path(global)?.to_path_buf())))
}

/// Open a single connection with `config`.
pub fn open_connection(
    global: &GlobalOptions,
    config: &ConnectionConfig,
) -> Result<Connection, CliError> {
    let paths = path_provider(global)?;
    log::debug!("opening {}", paths.0.display());
    Connection::open(&SqliteEngine::new(), paths.as_ref(), config).map_err(CliError::from)
}

/// Parse a `--param` argument into a value.
///
/// `null` becomes NULL, integers and floats become numbers, and anything
/// else is text. A leading `=` forces text, so `=42` binds the string "42".
pub fn parse_param(raw: &str) -> Value {
    if let Some(text) = raw.strip_prefix('=') {
        return Value::from(text);
    }
    if raw == "null" {
        return Value::Null;
    }
    if let Ok(integer) = raw.parse::<i64>() {
        return Value::Integer(integer);
    }
    if let Ok(real) = raw.parse::<f64>() {
        if real.is_finite() {
            return Value::Real(real);
        }
    }
    Value::from(raw)
}

/// Format one row as tab-separated text.
pub fn format_row(row: &[Value]) -> String {
    row.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_with_db(path: &str) -> GlobalOptions {
        GlobalOptions {
            database: Some(PathBuf::from(path)),
            ..GlobalOptions::default()
        }
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("null"), Value::Null);
        assert_eq!(parse_param("42"), Value::Integer(42));
        assert_eq!(parse_param("-7"), Value::Integer(-7));
        assert_eq!(parse_param("2.5"), Value::Real(2.5));
        assert_eq!(parse_param("hello"), Value::from("hello"));
        assert_eq!(parse_param("=42"), Value::from("42"));
        assert_eq!(parse_param("inf"), Value::from("inf"));
    }

    #[test]
    fn test_format_row() {
        let row = vec![Value::Integer(1), Value::from("a"), Value::Null];
        let formatted = format_row(&row);
        assert_eq!(formatted.split('\t').count(), 3);
        assert!(formatted.starts_with("1\ta"));
    }

    #[test]
    fn test_missing_database_is_invalid_argument() {
        let err = database_path(&GlobalOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_config_name_from_file_stem() {
        let global = global_with_db("/tmp/inventory.db");
        let config = connection_config(&global, &FileConfig::default()).unwrap();
        assert_eq!(config.name, "inventory");
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert!(config.key.is_none());
    }

    #[test]
    fn test_flag_overrides_file_journal_mode() {
        let mut global = global_with_db("/tmp/app.db");
        let file = FileConfig {
            journal_mode: Some(JournalMode::Truncate),
            ..FileConfig::default()
        };
        assert_eq!(
            connection_config(&global, &file).unwrap().journal_mode,
            JournalMode::Truncate
        );

        global.journal_mode = Some(JournalMode::Delete);
        assert_eq!(
            connection_config(&global, &file).unwrap().journal_mode,
            JournalMode::Delete
        );
    }

    #[test]
    fn test_bad_key_is_invalid_argument() {
        let global = GlobalOptions {
            key_hex: Some("abcd".to_string()),
            ..global_with_db("/tmp/app.db")
        };
        let err = connection_config(&global, &FileConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_key_applied() {
        let global = GlobalOptions {
            key_hex: Some("0f".repeat(32)),
            ..global_with_db("/tmp/app.db")
        };
        let config = connection_config(&global, &FileConfig::default()).unwrap();
        assert_eq!(config.key.unwrap().as_bytes(), &[0x0f; 32]);
    }
}
