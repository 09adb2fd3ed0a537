//! Main entry point for the sealdb CLI.
//!
//! This is the command-line interface for sealdb databases.
//! It provides commands for inspecting and exercising them:
//! - `check`: Open a database, validate its key and report on it
//! - `exec`: Run one SQL statement and print its rows
//! - `stress`: Lease and write through a connection pool from many threads
//! - `validate`: Validate a configuration file

mod cli;
mod commands;
mod config;
mod error;
mod utils;

use clap::Parser;
use cli::Cli;
use utils::GlobalOptions;

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let _level = sealdb::init_logger(cli.verbose, cli.quiet);

    // Convert CLI args to GlobalOptions
    let global = GlobalOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        database: cli.database,
        key_hex: cli.key_hex,
        journal_mode: cli.journal_mode,
        config: cli.config,
    };

    // Execute the command
    let result = match cli.command {
        cli::Command::Check(cmd) => cmd.execute(&global),
        cli::Command::Exec(cmd) => cmd.execute(&global),
        cli::Command::Stress(cmd) => cmd.execute(&global),
        cli::Command::Validate(cmd) => cmd.execute(&global),
    };

    // Handle errors and set exit code
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
