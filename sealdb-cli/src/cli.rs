//! CLI structure and command definitions.
//!
//! This module defines the main CLI structure using clap's derive macros,
//! including global options and subcommands.

use crate::commands::{CheckCommand, ExecCommand, StressCommand, ValidateCommand};
use clap::{Parser, Subcommand};
use sealdb::JournalMode;
use std::path::PathBuf;

/// Command-line tool for checking and exercising sealdb databases.
#[derive(Parser)]
#[command(name = "sealdb")]
#[command(version, about = "Check and exercise encrypted embedded databases", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Database file to operate on
    #[arg(long, value_name = "PATH", global = true, env = "SEALDB_DATABASE")]
    pub database: Option<PathBuf>,

    /// Encryption key as 64 hex digits
    #[arg(
        long,
        value_name = "HEX",
        global = true,
        env = "SEALDB_KEY",
        hide_env_values = true
    )]
    pub key_hex: Option<String>,

    /// Journal mode to request (delete, truncate, persist, memory, wal, off)
    #[arg(long, value_name = "MODE", global = true)]
    pub journal_mode: Option<JournalMode>,

    /// Configuration file (YAML)
    #[arg(long, value_name = "PATH", global = true, env = "SEALDB_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Command {
    /// Open a database and report on it
    Check(CheckCommand),

    /// Run one SQL statement
    Exec(ExecCommand),

    /// Exercise a database through a connection pool
    Stress(StressCommand),

    /// Validate a configuration file
    Validate(ValidateCommand),
}
