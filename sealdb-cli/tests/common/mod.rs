//! Common test utilities for CLI integration tests.
//!
//! This module provides shared helpers for CLI testing, including:
//! - Test environment setup with temporary directories
//! - Command builder helpers that isolate tests from the caller's environment

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Environment variables the CLI reads; cleared for every test command.
const SEALDB_ENV: &[&str] = &[
    "SEALDB_DATABASE",
    "SEALDB_KEY",
    "SEALDB_CONFIG",
    "SEALDB_LOG_MODE",
];

/// Test environment with an isolated database location.
pub struct TestEnv {
    /// Temporary directory (kept alive for the duration of the test)
    #[allow(dead_code)]
    temp_dir: TempDir,
    /// Path to the temporary directory
    pub temp_path: PathBuf,
    /// Path to the database file (not created until a command creates it)
    pub database: PathBuf,
}

#[allow(dead_code)]
impl TestEnv {
    /// Create a new test environment.
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let temp_path = temp_dir.path().to_path_buf();
        let database = temp_path.join("test.db");

        Self {
            temp_dir,
            temp_path,
            database,
        }
    }

    /// Get a bare command builder without pre-configured flags.
    pub fn command_bare(&self) -> Command {
        let mut cmd = Command::cargo_bin("sealdb").expect("Failed to find sealdb binary");
        for var in SEALDB_ENV {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Get a command builder with `--database` pointing at this environment.
    pub fn command(&self) -> Command {
        let mut cmd = self.command_bare();
        cmd.arg("--database").arg(&self.database);
        cmd
    }

    /// Get the temp path.
    pub fn path(&self) -> &Path {
        &self.temp_path
    }

    /// Write a file under the temporary directory and return its path.
    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_path.join(name);
        std::fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    /// Run `exec` with `sql` and assert it succeeds.
    pub fn exec_ok(&self, sql: &str) {
        self.command().arg("exec").arg(sql).assert().success();
    }
}
