use criterion::{criterion_group, criterion_main};

mod series;

use series::conflation::register_benchmarks as register_conflation_benchmarks;
use series::index::register_benchmarks as register_index_benchmarks;
use series::snapshot::register_benchmarks as register_snapshot_benchmarks;

// Define the benchmark groups
criterion_group!(
    benches,
    register_index_benchmarks,
    register_conflation_benchmarks,
    register_snapshot_benchmarks,
);

criterion_main!(benches);
