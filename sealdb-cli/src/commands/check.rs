//! Command to open a database and report on it.

use std::path::PathBuf;

use clap::Args;
use sealdb::{Connection, Engine, JournalMode, OpenMode, SqliteEngine, Value};
use serde::Serialize;

use crate::error::CliError;
use crate::utils::{self, GlobalOptions};

/// Open a database, validate its key and print what the engine reports.
#[derive(Args)]
pub struct CheckCommand {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// What `check` found.
#[derive(Debug, Serialize)]
struct CheckReport {
    database: PathBuf,
    engine_version: String,
    journal_mode: JournalMode,
    page_size: i64,
    page_count: i64,
    encrypted: bool,
}

impl CheckCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        let file = utils::load_file_config(global)?;
        // Checking must never create the file it is asked about.
        let config = utils::connection_config(global, &file)?.with_open_mode(OpenMode::ReadWrite);
        let mut conn = utils::open_connection(global, &config)?;

        let report = CheckReport {
            database: conn.path().to_path_buf(),
            engine_version: SqliteEngine::new().version(),
            journal_mode: conn.journal_mode(),
            page_size: pragma_integer(&mut conn, "PRAGMA page_size")?,
            page_count: pragma_integer(&mut conn, "PRAGMA page_count")?,
            encrypted: config.key.is_some(),
        };
        conn.close()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if !global.quiet {
            println!("database:     {}", report.database.display());
            println!("engine:       SQLite {}", report.engine_version);
            println!("journal mode: {}", report.journal_mode);
            println!("pages:        {} x {} bytes", report.page_count, report.page_size);
            let key = if report.encrypted { "applied" } else { "none" };
            println!("key:          {key}");
        }
        Ok(())
    }
}

fn pragma_integer(conn: &mut Connection, sql: &str) -> Result<i64, CliError> {
    let rows = conn.query(sql, &[])?;
    match rows.first().and_then(|row| row.first()) {
        Some(Value::Integer(value)) => Ok(*value),
        other => Err(CliError::SemanticFailure(format!(
            "unexpected answer to '{sql}': {other:?}"
        ))),
    }
}
