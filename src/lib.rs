//! # Reactive Kline Cache and Conflation Layer
//!
//! An in-process synchronization layer for market data. It keeps many
//! caches of kline series and price ticks eventually consistent with one
//! authoritative source per series, and protects downstream writers from
//! input bursts by collapsing them to the latest value.
//!
//! ## Key Features
//!
//! - **Versioned Source Stores**: One actor per `(symbol, interval)` owns the
//!   authoritative series. Every mutation gets a dense serial; every store
//!   instance gets a random version, so a restarted store is detected by
//!   replicas and answered with a full snapshot.
//!
//! - **Long-Poll Replication**: Replicas ask "what changed after serial N?"
//!   and the store answers immediately when data exists, or parks the request
//!   until a mutation arrives or the deadline passes.
//!
//! - **Lock-Free Replicas**: Replica reads go straight to a
//!   `crossbeam_skiplist::SkipMap` ordered by open time. Writes go through a
//!   durable repository, then the source store, then local state.
//!
//! - **Conflation Pipelines**: Producers push into an unbounded lock-free
//!   queue. One consumer drains the whole queue per cycle, folds it with a
//!   latest-wins merge and flushes once, so downstream write rate is bounded
//!   by flush latency rather than input rate.
//!
//! - **Self-Healing Supervision**: A supervisor per pipeline replaces a
//!   failed consumer within one monitor period and reports the fault on a
//!   broadcast channel.
//!
//! - **Demand-Driven Eviction**: Consumers declare how many trailing
//!   intervals they need. Stores and replicas keep only that horizon.
//!
//! ## Architecture
//!
//! | Component | Role |
//! |-----------|------|
//! | [`SourceStoreHandle`] | Client of one source store actor |
//! | [`SourceStoreRegistry`] | Get-or-spawn directory of stores |
//! | [`ReplicaCache`] | Local replica with write-through |
//! | [`ConflationPipeline`] | Queue, consumer and supervisor for one key |
//! | [`TickBoard`] | Latest tick per symbol |
//! | [`Synchronizer`] | Paged backfill and push-subscription pump |
//! | [`SeriesManager`] | Facade owning every component above |
//!
//! ## Example
//!
//! ```rust,no_run
//! use klinecache_rs::prelude::*;
//!
//! # async fn run() -> Result<(), SyncError> {
//! let manager = SeriesManager::in_memory(SyncConfig::default())?;
//! let key = SeriesKey::new("BTCUSDT", Interval::OneMinute);
//!
//! manager.declare_demand("strategy-a", &key, 200)?;
//! manager.push_kline(Kline::new("BTCUSDT", Interval::OneMinute, 1_700_000_040_000));
//!
//! let replica = manager.replica(&key);
//! let window = replica.get_window(current_time_millis(), 200);
//! # let _ = window;
//! manager.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Consistency
//!
//! Each series is eventually consistent on its own. No ordering is promised
//! across keys.
//!
//! ## Feature Flags
//!
//! - `metrics`: exports counters through the `metrics` facade.

pub mod series;

pub mod prelude;
mod utils;

pub use series::{
    BackfillReport, ChangeSet, ConflationAggregate, ConflationHub, ConflationPipeline,
    ConflationSink, EventTimed, ExchangeFeed, Interval, Kline, KlineId, KlineRepository,
    KlineRow, MemoryRepository, PipelineFault, ReplicaCache, ReplicationCursor,
    RetryingRepository, SeriesKey, SeriesManager, SourceStore, SourceStoreHandle,
    SourceStoreRegistry, SyncConfig, SyncError, Synchronizer, Tick, TickBoard,
    VersionedSnapshot,
};
pub use utils::current_time_millis;
