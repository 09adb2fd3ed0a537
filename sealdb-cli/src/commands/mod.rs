//! CLI command implementations.
//!
//! This module contains the implementations of all CLI commands:
//! - `check`: Open a database and report on it
//! - `exec`: Run one SQL statement
//! - `stress`: Hammer a database through a connection pool
//! - `validate`: Validate a configuration file

pub mod check;
pub mod exec;
pub mod stress;
pub mod validate;

pub use check::CheckCommand;
pub use exec::ExecCommand;
pub use stress::StressCommand;
pub use validate::ValidateCommand;
