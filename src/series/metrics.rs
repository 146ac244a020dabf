//! Counters exported through the `metrics` facade.
//!
//! Every function compiles to nothing unless the `metrics` feature is
//! enabled, so call sites stay free of feature gates.

/// Points applied to a source store.
pub const POINTS_APPLIED: &str = "klinecache_points_applied_total";
/// Long-polls answered with data or a snapshot.
pub const LONG_POLLS_RESOLVED: &str = "klinecache_long_polls_resolved_total";
/// Long-polls answered "no new data" at their deadline.
pub const LONG_POLLS_TIMED_OUT: &str = "klinecache_long_polls_timed_out_total";
/// Points removed by eviction sweeps.
pub const POINTS_EVICTED: &str = "klinecache_points_evicted_total";
/// Raw events absorbed by conflation pipelines.
pub const EVENTS_CONFLATED: &str = "klinecache_events_conflated_total";
/// Downstream flushes performed by conflation pipelines.
pub const FLUSHES: &str = "klinecache_flushes_total";
/// Conflation consumers restarted by their supervisor.
pub const CONSUMER_RESTARTS: &str = "klinecache_consumer_restarts_total";

#[inline]
pub(crate) fn increment(name: &'static str, value: u64) {
    #[cfg(feature = "metrics")]
    ::metrics::counter!(name).increment(value);
    #[cfg(not(feature = "metrics"))]
    let _ = (name, value);
}
