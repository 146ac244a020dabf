//! Time-series synchronization: source stores, replicas and conflation.

pub mod config;
/// Conflation pipelines with supervised consumers.
pub mod conflation;
pub mod error;
/// Exchange feed boundary and backfill.
pub mod feed;
pub mod hub;
pub mod index;
/// Process-level facade.
pub mod manager;
mod metrics;
pub mod point;
pub mod registry;
/// Lock-free replicas fed by long-polling.
pub mod replica;
pub mod repository;
pub mod snapshot;
/// Actor-owned source stores.
pub mod store;
mod tests;
pub mod tick;

pub use config::SyncConfig;
pub use conflation::{
    ConflationAggregate, ConflationPipeline, ConflationSink, MergeFn, PipelineFault,
    latest_by_event_time,
};
pub use error::SyncError;
pub use feed::{BackfillReport, ExchangeFeed, Synchronizer};
pub use hub::ConflationHub;
pub use index::SeriesIndex;
pub use manager::SeriesManager;
pub use metrics::{
    CONSUMER_RESTARTS, EVENTS_CONFLATED, FLUSHES, LONG_POLLS_RESOLVED, LONG_POLLS_TIMED_OUT,
    POINTS_APPLIED, POINTS_EVICTED,
};
pub use point::{EventTimed, Interval, Kline, KlineId, SeriesKey, Tick};
pub use registry::SourceStoreRegistry;
pub use replica::{ReplicaCache, ReplicaEntry};
pub use repository::{KlineRepository, KlineRow, MemoryRepository, RetryingRepository};
pub use snapshot::{ChangeSet, ReplicationCursor, Revision, VersionedSnapshot, checksum_of};
pub use store::{SourceStore, SourceStoreHandle};
pub use tick::TickBoard;
