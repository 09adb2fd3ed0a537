use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tempfile::TempDir;

use sealdb::{
    Connection, ConnectionConfig, ConnectionPool, DatabaseFactory, DirectoryPaths, InMemory,
    JournalMode, PoolConfig, SqliteEngine, Value,
};

const CACHE_CAPACITIES: &[usize] = &[0, 16];

fn memory_config() -> ConnectionConfig {
    ConnectionConfig::new("bench").with_journal_mode(JournalMode::Memory)
}

fn memory_pool(max_size: usize) -> ConnectionPool {
    let factory = DatabaseFactory::new(
        Arc::new(SqliteEngine::new()),
        Arc::new(InMemory),
        memory_config(),
    );
    ConnectionPool::new(PoolConfig::new(max_size), factory).expect("failed to build pool")
}

fn bench_lease_release(c: &mut Criterion) {
    let pool = memory_pool(4);
    // Warm one connection so the loop measures reuse rather than open.
    drop(pool.lease(Duration::from_secs(1)).expect("failed to warm pool"));

    c.bench_function("lease_release", |b| {
        b.iter(|| {
            let conn = pool
                .lease(Duration::from_secs(1))
                .expect("failed to lease connection");
            black_box(conn.id());
        });
    });
}

fn bench_prepare(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare_and_step");

    for &capacity in CACHE_CAPACITIES {
        let config = memory_config().with_statement_cache_capacity(capacity);
        let mut conn = Connection::open(&SqliteEngine::new(), &InMemory, &config)
            .expect("failed to open connection");

        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| {
                let rows = conn
                    .query("SELECT ? * 2", &[Value::from(21)])
                    .expect("query failed");
                black_box(rows);
            });
        });
    }

    group.finish();
}

fn bench_open_file(c: &mut Criterion) {
    c.bench_function("open_wal_file", |b| {
        b.iter_batched(
            || TempDir::new().expect("failed to create temporary directory"),
            |temp_dir| {
                let paths = DirectoryPaths::new(temp_dir.path());
                let config = ConnectionConfig::new("bench");
                let conn = Connection::open(&SqliteEngine::new(), &paths, &config)
                    .expect("failed to open database");
                black_box(conn.journal_mode());
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(pool_bench, bench_lease_release, bench_prepare, bench_open_file);
criterion_main!(pool_bench);
