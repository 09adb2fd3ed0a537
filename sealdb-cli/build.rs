//! Build script for sealdb-cli.
//!
//! This script generates man pages at build time using clap_mangen.
//! The generated man page is placed in OUT_DIR for inclusion in release builds.
//!
//! Note: We build a minimal command structure here rather than importing from
//! the main crate, since build scripts cannot depend on the crate being built.

use clap::{Arg, Command};
use clap_mangen::Man;
use std::fs;
use std::path::PathBuf;

/// Build the CLI command structure for man page generation.
///
/// IMPORTANT: Keep this structure synchronized with src/cli.rs
/// When adding/removing/modifying commands, update both files.
fn build_cli() -> Command {
    Command::new("sealdb")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Check and exercise encrypted embedded databases")
        .long_about(
            "Command-line tool for opening, querying and load-testing sealdb databases",
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .help("Enable verbose output")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .help("Suppress non-essential output")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .help("Database file to operate on")
                .value_name("PATH")
                .global(true)
                .env("SEALDB_DATABASE"),
        )
        .arg(
            Arg::new("key-hex")
                .long("key-hex")
                .help("Encryption key as 64 hex digits")
                .value_name("HEX")
                .global(true)
                .env("SEALDB_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("journal-mode")
                .long("journal-mode")
                .help("Journal mode to request (delete, truncate, persist, memory, wal, off)")
                .value_name("MODE")
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Configuration file (YAML)")
                .value_name("PATH")
                .global(true)
                .env("SEALDB_CONFIG"),
        )
        .subcommands(vec![
            Command::new("check")
                .about("Open a database and report on it")
                .long_about(
                    "Open an existing database, validate its key and print the journal mode, \
                     engine version and page count",
                ),
            Command::new("exec")
                .about("Run one SQL statement")
                .long_about("Run one SQL statement with positional parameters and print its rows"),
            Command::new("stress")
                .about("Exercise a database through a connection pool")
                .long_about("Lease, write and release pooled connections from several threads"),
            Command::new("validate")
                .about("Validate a configuration file")
                .long_about("Check a sealdb YAML configuration file for errors"),
        ])
}

fn main() {
    // Generate man pages at build time
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).unwrap();

    // Generate main sealdb.1 man page
    let app = build_cli();
    let man = Man::new(app);
    let mut buffer = Vec::new();
    man.render(&mut buffer).unwrap();

    fs::write(man_dir.join("sealdb.1"), buffer).unwrap();

    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-changed=src/commands/");
}
