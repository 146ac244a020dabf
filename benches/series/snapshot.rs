use criterion::{BenchmarkId, Criterion};
use klinecache_rs::{Interval, Kline, SeriesKey, VersionedSnapshot};
use std::hint::black_box;
use uuid::Uuid;

fn snapshot(count: i64) -> VersionedSnapshot {
    VersionedSnapshot {
        key: SeriesKey::new("BENCH", Interval::OneMinute),
        version: Uuid::new_v4(),
        serial: count as u64,
        items: (0..count)
            .map(|i| Kline::new("BENCH", Interval::OneMinute, i * 60_000))
            .collect(),
        evicted_before: None,
    }
}

/// Register benchmarks for snapshot checksums and JSON encoding.
pub fn register_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("VersionedSnapshot");

    for &count in &[100i64, 1_000] {
        let snapshot = snapshot(count);

        group.bench_with_input(BenchmarkId::new("items_checksum", count), &snapshot, |b, s| {
            b.iter(|| black_box(s.items_checksum()))
        });

        group.bench_with_input(BenchmarkId::new("to_json", count), &snapshot, |b, s| {
            b.iter(|| black_box(s.to_json()))
        });

        let json = snapshot
            .to_json()
            .expect("json snapshot serialization must succeed in bench setup");
        group.bench_with_input(BenchmarkId::new("from_json", count), &json, |b, json| {
            b.iter(|| black_box(VersionedSnapshot::from_json(json)))
        });
    }

    group.finish();
}
