//! Command to run one SQL statement.

use clap::Args;
use sealdb::{Step, Value};
use serde::Serialize;

use crate::error::CliError;
use crate::utils::{self, GlobalOptions};

/// Run one SQL statement and print the rows it returns.
#[derive(Args)]
pub struct ExecCommand {
    /// SQL statement to run
    #[arg(value_name = "SQL")]
    pub sql: String,

    /// Positional parameter, bound in order (repeatable)
    #[arg(short, long = "param", value_name = "VALUE", allow_hyphen_values = true)]
    pub params: Vec<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ExecOutput {
    rows: Vec<Vec<Value>>,
    changes: u64,
}

impl ExecCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        let file = utils::load_file_config(global)?;
        let config = utils::connection_config(global, &file)?;
        let mut conn = utils::open_connection(global, &config)?;

        let params: Vec<Value> = self
            .params
            .iter()
            .map(String::as_str)
            .map(utils::parse_param)
            .collect();
        log::debug!("running '{}' with {} parameter(s)", self.sql, params.len());

        let rows = conn.execute_with_retry(|conn| {
            let mut statement = conn.prepare(&self.sql)?;
            statement.bind_all(&params)?;
            let mut rows = Vec::new();
            while let Step::Row(row) = statement.step()? {
                rows.push(row);
            }
            Ok(rows)
        })?;
        let output = ExecOutput {
            rows,
            changes: conn.changes(),
        };
        conn.close()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else if !output.rows.is_empty() {
            for row in &output.rows {
                println!("{}", utils::format_row(row));
            }
        } else if !global.quiet {
            println!("{} row(s) changed", output.changes);
        }
        Ok(())
    }
}
