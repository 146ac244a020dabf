/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 14/10/26
******************************************************************************/

//! Process-level facade over stores, replicas and conflation pipelines.
//!
//! [`SeriesManager`] is the one object an application keeps. It resolves
//! replicas per key, routes pushed klines and ticks through their
//! conflation pipelines, forwards consumer demand and owns the shutdown
//! token every background task observes.

use super::config::SyncConfig;
use super::conflation::{ConflationPipeline, ConflationSink, PipelineFault};
use super::error::SyncError;
use super::feed::{BackfillReport, ExchangeFeed, Synchronizer};
use super::hub::ConflationHub;
use super::point::{Kline, SeriesKey, Tick};
use super::registry::SourceStoreRegistry;
use super::replica::ReplicaCache;
use super::repository::{KlineRepository, MemoryRepository};
use super::tick::TickBoard;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Entry point of the synchronization layer.
///
/// Every method that may spawn a task must be called from within a tokio
/// runtime.
pub struct SeriesManager {
    config: SyncConfig,
    shutdown: CancellationToken,
    stores: Arc<SourceStoreRegistry>,
    repository: Arc<dyn KlineRepository>,
    replicas: DashMap<SeriesKey, Arc<ReplicaCache>>,
    hub: ConflationHub,
    ticks: Arc<TickBoard>,
}

impl SeriesManager {
    /// Manager backed by `repository`, which also seeds new stores.
    pub fn new(config: SyncConfig, repository: Arc<dyn KlineRepository>) -> Result<Self, SyncError> {
        Self::with_shutdown(config, repository, CancellationToken::new())
    }

    /// Manager backed by a fresh [`MemoryRepository`].
    pub fn in_memory(config: SyncConfig) -> Result<Self, SyncError> {
        Self::new(config, Arc::new(MemoryRepository::new()))
    }

    /// Manager whose tasks are children of `shutdown`.
    pub fn with_shutdown(
        config: SyncConfig,
        repository: Arc<dyn KlineRepository>,
        shutdown: CancellationToken,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let stores = Arc::new(SourceStoreRegistry::with_repository(
            config.clone(),
            shutdown.child_token(),
            Arc::clone(&repository),
        ));
        let hub = ConflationHub::new(config.clone(), shutdown.child_token());

        info!("series manager started");
        Ok(Self {
            config,
            shutdown,
            stores,
            repository,
            replicas: DashMap::new(),
            hub,
            ticks: Arc::new(TickBoard::new()),
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Source store directory.
    #[must_use]
    pub fn stores(&self) -> &Arc<SourceStoreRegistry> {
        &self.stores
    }

    /// Durable repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn KlineRepository> {
        &self.repository
    }

    /// Replica for `key`, started on first use.
    pub fn replica(&self, key: &SeriesKey) -> Arc<ReplicaCache> {
        if let Some(replica) = self.replicas.get(key) {
            return Arc::clone(replica.value());
        }
        let replica = self.replicas.entry(key.clone()).or_insert_with(|| {
            ReplicaCache::start(
                key.clone(),
                Arc::clone(&self.stores),
                Arc::clone(&self.repository),
                self.shutdown.child_token(),
            )
        });
        Arc::clone(replica.value())
    }

    /// Keys with a started replica.
    #[must_use]
    pub fn replica_keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.replicas.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Conflation pipeline writing klines of `key` through its replica.
    pub fn kline_pipeline(&self, key: &SeriesKey) -> Arc<ConflationPipeline<Kline>> {
        self.hub.kline_pipeline(key, || {
            let sink: Arc<dyn ConflationSink<Kline>> = self.replica(key);
            sink
        })
    }

    /// Conflation pipeline updating the tick board for `symbol`.
    pub fn tick_pipeline(&self, symbol: &str) -> Arc<ConflationPipeline<Tick>> {
        self.hub.tick_pipeline(symbol, || {
            let sink: Arc<dyn ConflationSink<Tick>> = self.ticks.clone();
            sink
        })
    }

    /// Queues a kline update. Never blocks.
    pub fn push_kline(&self, kline: Kline) {
        self.kline_pipeline(&kline.key()).push(kline);
    }

    /// Queues a tick. Never blocks.
    pub fn push_tick(&self, tick: Tick) {
        self.tick_pipeline(&tick.symbol).push(tick);
    }

    /// Latest conflated tick of `symbol`.
    #[must_use]
    pub fn latest_tick(&self, symbol: &str) -> Option<Tick> {
        self.ticks.latest(symbol)
    }

    /// The tick board fed by tick pipelines.
    #[must_use]
    pub fn tick_board(&self) -> &Arc<TickBoard> {
        &self.ticks
    }

    /// Declares that `consumer_id` needs the most recent `periods` intervals
    /// of `key`.
    pub fn declare_demand(
        &self,
        consumer_id: impl Into<String>,
        key: &SeriesKey,
        periods: u32,
    ) -> Result<(), SyncError> {
        self.replica(key).register_demand(consumer_id, periods)
    }

    /// Pages `from..=to` of `key` out of `feed` into its replica.
    pub async fn backfill(
        &self,
        key: &SeriesKey,
        feed: &dyn ExchangeFeed,
        from: i64,
        to: i64,
    ) -> Result<BackfillReport, SyncError> {
        let replica = self.replica(key);
        Synchronizer::new(self.config.backfill_page_size)
            .backfill(&replica, feed, from, to)
            .await
    }

    /// Forwards a push subscription for `key` into its kline pipeline until
    /// the channel closes or the manager shuts down.
    pub fn subscribe(&self, key: &SeriesKey, receiver: mpsc::Receiver<Kline>) -> JoinHandle<u64> {
        let pipeline = self.kline_pipeline(key);
        let shutdown = self.shutdown.child_token();
        let page_size = self.config.backfill_page_size;
        tokio::spawn(async move {
            Synchronizer::new(page_size)
                .pump(receiver, &pipeline, shutdown)
                .await
        })
    }

    /// Subscribe to conflation consumer faults.
    pub fn subscribe_faults(&self) -> broadcast::Receiver<PipelineFault> {
        self.hub.subscribe_faults()
    }

    /// Stops every store, replica and pipeline task.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            warn!("series manager already shut down");
            return;
        }
        self.shutdown.cancel();
        info!(
            stores = self.stores.len(),
            replicas = self.replicas.len(),
            "series manager shut down"
        );
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for SeriesManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
