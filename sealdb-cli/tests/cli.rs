//! Basic CLI surface tests: help, version and argument errors.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    let env = TestEnv::new();
    env.command_bare()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("stress"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_version() {
    let env = TestEnv::new();
    env.command_bare()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_journal_mode_rejected_by_parser() {
    let env = TestEnv::new();
    env.command()
        .args(["--journal-mode", "sideways", "check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("journal"));
}

#[test]
fn test_missing_database_is_invalid_arguments() {
    let env = TestEnv::new();
    env.command_bare()
        .arg("check")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("no database given"));
}

#[test]
fn test_database_from_environment() {
    let env = TestEnv::new();
    env.exec_ok("CREATE TABLE t (x INTEGER)");

    env.command_bare()
        .env("SEALDB_DATABASE", &env.database)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("journal mode: WAL"));
}
