use criterion::{BenchmarkId, Criterion};
use klinecache_rs::series::index::SeriesIndex;
use klinecache_rs::{Interval, Kline, SeriesKey};
use std::hint::black_box;

const MINUTE: i64 = 60_000;

fn key() -> SeriesKey {
    SeriesKey::new("BENCH", Interval::OneMinute)
}

fn filled(count: i64) -> SeriesIndex {
    let mut index = SeriesIndex::new(key());
    for i in 0..count {
        index.insert(Kline::new("BENCH", Interval::OneMinute, i * MINUTE));
    }
    index
}

/// Register all benchmarks for the serial-indexed point collection.
pub fn register_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("SeriesIndex");

    // Appending new open times vs revising the live candle
    for &count in &[1_000i64, 10_000] {
        group.bench_with_input(BenchmarkId::new("append", count), &count, |b, &count| {
            b.iter_with_setup(
                || SeriesIndex::new(key()),
                |mut index| {
                    for i in 0..count {
                        index.insert(Kline::new("BENCH", Interval::OneMinute, i * MINUTE));
                    }
                    black_box(index.current_serial())
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("revise_last", count), &count, |b, &count| {
            let mut index = filled(count);
            let last = (count - 1) * MINUTE;
            let mut revision = 0i64;
            b.iter(|| {
                revision += 1;
                let point = Kline::new("BENCH", Interval::OneMinute, last).with_event_time(last + revision);
                black_box(index.insert(point))
            });
        });
    }

    // Long-poll replay of the most recent serials
    for &tail in &[1u64, 100, 1_000] {
        let index = filled(10_000);
        let current = index.current_serial();
        group.bench_with_input(BenchmarkId::new("replay_tail", tail), &tail, |b, &tail| {
            b.iter(|| black_box(index.replay(current - tail + 1, current)))
        });
    }

    group.bench_function("evict_half", |b| {
        b.iter_with_setup(
            || filled(10_000),
            |mut index| black_box(index.evict_before(5_000 * MINUTE)),
        );
    });

    group.finish();
}
