/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 14/10/26
******************************************************************************/

//! Prelude module that re-exports commonly used types and traits.
//!
//! ```rust
//! use klinecache_rs::prelude::*;
//! ```

// Points and keys
pub use crate::series::point::{EventTimed, Interval, Kline, KlineId, SeriesKey, Tick};

// Configuration and errors
pub use crate::series::config::SyncConfig;
pub use crate::series::error::SyncError;

// Replication protocol
pub use crate::series::snapshot::{ChangeSet, ReplicationCursor, Revision, VersionedSnapshot};
pub use crate::series::store::{SourceStore, SourceStoreHandle};
pub use crate::series::registry::SourceStoreRegistry;
pub use crate::series::replica::ReplicaCache;

// Conflation
pub use crate::series::conflation::{
    ConflationAggregate, ConflationPipeline, ConflationSink, MergeFn, PipelineFault,
    latest_by_event_time,
};
pub use crate::series::hub::ConflationHub;
pub use crate::series::tick::TickBoard;

// Boundaries
pub use crate::series::feed::{BackfillReport, ExchangeFeed, Synchronizer};
pub use crate::series::repository::{KlineRepository, MemoryRepository, RetryingRepository};

// Facade
pub use crate::series::manager::SeriesManager;

// Utility functions
pub use crate::utils::current_time_millis;
