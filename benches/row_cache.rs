//! Benchmarks for the row cache hot paths.
//!
//! Benchmark targets:
//! - cached `get_row`: no engine round-trip, should stay well under 1µs
//! - uncached `get_row`: one query plus materialization
//! - flush of a table with many dirty entries: one lock acquisition total

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use rowstash::{Database, DatabaseConfig, Table, TableSpec};

/// Creates an in-memory database with `rows` rows, reaper disabled.
fn populated_table(rows: i64) -> (Database, Table) {
    let db = Database::open_in_memory(DatabaseConfig::new().without_reaper())
        .expect("Failed to open database");
    let table = db
        .create_table(
            &TableSpec::new("bench")
                .column("id", "INTEGER")
                .column("payload", "TEXT")
                .column("counter", "INTEGER")
                .primary_key(["id"]),
        )
        .expect("Failed to create table");
    for i in 0..rows {
        table
            .add(&[
                ("id", i.into()),
                ("payload", format!("payload-{i}").into()),
                ("counter", 0.into()),
            ])
            .expect("Failed to seed row");
    }
    (db, table)
}

fn bench_get_row_cached(c: &mut Criterion) {
    let (_db, table) = populated_table(1_000);
    // Warm the cache and keep handles alive so nothing is released.
    let warm = table.get_all().expect("Failed to warm cache");

    c.bench_function("get_row_cached", |b| {
        b.iter(|| {
            let row = table
                .get_row(&[("id", 500.into())])
                .expect("get_row failed")
                .expect("row missing");
            std::hint::black_box(row.get("payload").expect("get failed"));
        });
    });
    drop(warm);
}

fn bench_get_row_uncached(c: &mut Criterion) {
    c.bench_function("get_row_uncached", |b| {
        b.iter_batched(
            || populated_table(1_000),
            |(_db, table)| {
                let row = table
                    .get_row(&[("id", 500.into())])
                    .expect("get_row failed")
                    .expect("row missing");
                std::hint::black_box(row.get("payload").expect("get failed"));
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_table_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_flush");
    for size in [100i64, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (db, table) = populated_table(size);
                    let rows = table.get_all().expect("Failed to load rows");
                    for row in &rows {
                        row.set("counter", 1.into()).expect("set failed");
                    }
                    (db, table, rows)
                },
                |(_db, table, rows)| {
                    table.flush().expect("flush failed");
                    drop(rows);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_get_row_cached,
    bench_get_row_uncached,
    bench_table_flush
);
criterion_main!(benches);
