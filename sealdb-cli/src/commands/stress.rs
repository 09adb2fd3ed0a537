//! Command to exercise a database through a connection pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Args;
use sealdb::{ConnectionPool, DatabaseFactory, Error, PoolStatus, SqliteEngine, Value};
use serde::Serialize;

use crate::error::CliError;
use crate::utils::{self, GlobalOptions};

const CREATE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS sealdb_stress (worker INTEGER NOT NULL, round INTEGER NOT NULL)";
const INSERT_SQL: &str = "INSERT INTO sealdb_stress (worker, round) VALUES (?, ?)";

/// How long shutdown waits for stragglers.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lease, write and release connections from several threads at once.
#[derive(Args)]
pub struct StressCommand {
    /// Number of worker threads
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// Operations per worker
    #[arg(long, default_value_t = 100)]
    pub iterations: usize,

    /// Pool size (defaults to the configuration file, then to --threads)
    #[arg(long, value_name = "N")]
    pub pool_size: Option<usize>,

    /// How long a worker waits for a connection, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub lease_timeout_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    timeouts: AtomicUsize,
}

impl Counters {
    fn record(&self, result: Result<(), Error>) {
        match result {
            Ok(()) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                if matches!(err, Error::BusyTimeout { .. } | Error::PoolExhausted { .. }) {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                }
                self.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("stress operation failed: {err}");
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct StressReport {
    threads: usize,
    iterations: usize,
    succeeded: usize,
    failed: usize,
    timeouts: usize,
    elapsed_ms: u64,
    pool: PoolStatus,
}

impl StressCommand {
    pub fn execute(self, global: &GlobalOptions) -> Result<(), CliError> {
        if self.threads == 0 || self.iterations == 0 {
            return Err(CliError::InvalidArguments(
                "--threads and --iterations must be at least 1".to_string(),
            ));
        }

        let file = utils::load_file_config(global)?;
        let config = utils::connection_config(global, &file)?;
        let mut pool_config = file.pool_config(self.threads);
        if let Some(size) = self.pool_size {
            pool_config.max_size = size;
        }

        let factory = DatabaseFactory::new(
            Arc::new(SqliteEngine::new()),
            utils::path_provider(global)?,
            config,
        );
        let pool = ConnectionPool::new(pool_config, factory)?;
        let timeout = Duration::from_millis(self.lease_timeout_ms);
        let counters = Counters::default();

        let started = Instant::now();
        thread::scope(|scope| {
            for worker in 0..self.threads {
                let pool = &pool;
                let counters = &counters;
                scope.spawn(move || {
                    for round in 0..self.iterations {
                        counters.record(run_once(pool, timeout, worker, round));
                    }
                });
            }
        });
        let elapsed = started.elapsed();

        let report = StressReport {
            threads: self.threads,
            iterations: self.iterations,
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            pool: pool.status(),
        };
        pool.shutdown(Some(DRAIN_TIMEOUT))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if !global.quiet {
            println!(
                "{} of {} operation(s) succeeded in {} ms ({} timed out)",
                report.succeeded,
                report.threads * report.iterations,
                report.elapsed_ms,
                report.timeouts
            );
            println!(
                "pool: {} connection(s), max {}",
                report.pool.total, report.pool.max_size
            );
        }

        if report.failed > 0 {
            return Err(CliError::SemanticFailure(format!(
                "{} operation(s) failed",
                report.failed
            )));
        }
        Ok(())
    }
}

/// One lease, two statements, one release.
fn run_once(
    pool: &ConnectionPool,
    timeout: Duration,
    worker: usize,
    round: usize,
) -> Result<(), Error> {
    let mut conn = pool.lease(timeout)?;
    conn.execute(CREATE_SQL, &[])?;
    let params = [
        Value::Integer(i64::try_from(worker).unwrap_or(i64::MAX)),
        Value::Integer(i64::try_from(round).unwrap_or(i64::MAX)),
    ];
    conn.execute(INSERT_SQL, &params)?;
    Ok(())
}
