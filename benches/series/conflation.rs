use criterion::{BenchmarkId, Criterion};
use klinecache_rs::{ConflationAggregate, Tick};
use std::hint::black_box;

/// Register benchmarks for the conflation fold.
pub fn register_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("Conflation - Fold");

    for &burst in &[100i64, 10_000, 100_000] {
        let ticks: Vec<Tick> = (0..burst)
            .map(|i| Tick::new("BENCH", 100.0 + i as f64, 1.0, i))
            .collect();

        group.bench_with_input(BenchmarkId::new("latest_wins", burst), &ticks, |b, ticks| {
            b.iter_with_setup(
                || (ConflationAggregate::<Tick>::latest(), ticks.clone()),
                |(mut aggregate, ticks)| {
                    for tick in ticks {
                        aggregate.fold(tick);
                    }
                    black_box(aggregate.current().map(|t| t.event_time))
                },
            );
        });
    }

    group.finish();
}
