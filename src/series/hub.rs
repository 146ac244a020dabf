//! Lazily created conflation pipelines, one per tick symbol and one per
//! kline series.

use super::config::SyncConfig;
use super::conflation::{ConflationAggregate, ConflationPipeline, ConflationSink, PipelineFault};
use super::point::{Kline, SeriesKey, Tick};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Directory of conflation pipelines.
///
/// Pipelines are created on first use and live until shutdown. All of them
/// report consumer faults on one shared broadcast channel.
pub struct ConflationHub {
    ticks: DashMap<String, Arc<ConflationPipeline<Tick>>>,
    klines: DashMap<SeriesKey, Arc<ConflationPipeline<Kline>>>,
    faults: broadcast::Sender<PipelineFault>,
    config: SyncConfig,
    shutdown: CancellationToken,
}

impl ConflationHub {
    /// Create an empty hub.
    pub fn new(config: SyncConfig, shutdown: CancellationToken) -> Self {
        let (faults, _) = broadcast::channel(config.fault_channel_capacity);
        Self {
            ticks: DashMap::new(),
            klines: DashMap::new(),
            faults,
            config,
            shutdown,
        }
    }

    /// Tick pipeline for `symbol`, created with `sink` on first use.
    pub fn tick_pipeline<F>(&self, symbol: &str, sink: F) -> Arc<ConflationPipeline<Tick>>
    where
        F: FnOnce() -> Arc<dyn ConflationSink<Tick>>,
    {
        if let Some(pipeline) = self.ticks.get(symbol) {
            return Arc::clone(pipeline.value());
        }
        let pipeline = self.ticks.entry(symbol.to_string()).or_insert_with(|| {
            Arc::new(ConflationPipeline::spawn_with_faults(
                format!("tick:{symbol}"),
                sink(),
                ConflationAggregate::latest(),
                &self.config,
                self.faults.clone(),
                self.shutdown.child_token(),
            ))
        });
        Arc::clone(pipeline.value())
    }

    /// Kline pipeline for `key`, created with `sink` on first use.
    pub fn kline_pipeline<F>(&self, key: &SeriesKey, sink: F) -> Arc<ConflationPipeline<Kline>>
    where
        F: FnOnce() -> Arc<dyn ConflationSink<Kline>>,
    {
        if let Some(pipeline) = self.klines.get(key) {
            return Arc::clone(pipeline.value());
        }
        let pipeline = self.klines.entry(key.clone()).or_insert_with(|| {
            Arc::new(ConflationPipeline::spawn_with_faults(
                format!("kline:{key}"),
                sink(),
                ConflationAggregate::latest(),
                &self.config,
                self.faults.clone(),
                self.shutdown.child_token(),
            ))
        });
        Arc::clone(pipeline.value())
    }

    /// Existing tick pipeline for `symbol`.
    #[must_use]
    pub fn existing_tick_pipeline(&self, symbol: &str) -> Option<Arc<ConflationPipeline<Tick>>> {
        self.ticks.get(symbol).map(|pipeline| Arc::clone(pipeline.value()))
    }

    /// Existing kline pipeline for `key`.
    #[must_use]
    pub fn existing_kline_pipeline(&self, key: &SeriesKey) -> Option<Arc<ConflationPipeline<Kline>>> {
        self.klines.get(key).map(|pipeline| Arc::clone(pipeline.value()))
    }

    /// Number of tick and kline pipelines.
    #[must_use]
    pub fn pipeline_count(&self) -> (usize, usize) {
        (self.ticks.len(), self.klines.len())
    }

    /// Subscribe to faults of every pipeline in the hub.
    pub fn subscribe_faults(&self) -> broadcast::Receiver<PipelineFault> {
        self.faults.subscribe()
    }
}
