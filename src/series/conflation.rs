//! Conflation pipeline: absorbs bursty input and forwards only the latest value.
//!
//! A pipeline has one unbounded lock-free input queue and exactly one active
//! consumer task. Producers call [`ConflationPipeline::push`], which never
//! blocks and never fails, so a slow sink can not stall the network path
//! that feeds it.
//!
//! The consumer sleeps until something is queued, drains the *whole* queue
//! in one pass folding every event into a [`ConflationAggregate`], then
//! flushes the aggregate to its [`ConflationSink`] exactly once. Downstream
//! write frequency is therefore bounded by flush duration, not input rate.
//!
//! A supervisor task checks the consumer every
//! [`monitor_period`](SyncConfig::monitor_period). A consumer that panicked
//! or returned an error is reported as a [`PipelineFault`] on a broadcast
//! channel and replaced. The queue and the aggregate live outside the
//! consumer, so nothing queued is lost across a restart and a value whose
//! flush failed is flushed again by the replacement.
//!
//! A cycle whose winner equals the last delivered value flushes nothing, so
//! late stale events never cost a downstream write.

use super::config::SyncConfig;
use super::error::SyncError;
use super::metrics;
use super::point::EventTimed;
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Merge rule: combines the running value with an incoming one and returns
/// the winner.
pub type MergeFn<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// Default merge rule: the greater event time wins, ties keep the incoming
/// value.
#[inline]
pub fn latest_by_event_time<T: EventTimed>(current: T, incoming: T) -> T {
    if current.event_time() > incoming.event_time() {
        current
    } else {
        incoming
    }
}

/// Running fold state of a pipeline.
///
/// The state survives drain cycles, so an event that arrives late with an
/// older event time never replaces a value that was already flushed.
pub struct ConflationAggregate<T> {
    state: Option<T>,
    delivered: Option<T>,
    merge: MergeFn<T>,
    folded: u64,
}

impl<T> ConflationAggregate<T> {
    /// Aggregate with a custom merge rule.
    pub fn new(merge: MergeFn<T>) -> Self {
        Self {
            state: None,
            delivered: None,
            merge,
            folded: 0,
        }
    }

    /// Aggregate using [`latest_by_event_time`].
    pub fn latest() -> Self
    where
        T: EventTimed + 'static,
    {
        Self::new(Arc::new(latest_by_event_time::<T>))
    }

    /// Folds one incoming event into the state.
    pub fn fold(&mut self, incoming: T) {
        self.state = Some(match self.state.take() {
            Some(current) => (self.merge)(current, incoming),
            None => incoming,
        });
        self.folded += 1;
    }

    /// Current winner, if any event was folded.
    #[must_use]
    pub fn current(&self) -> Option<&T> {
        self.state.as_ref()
    }

    /// Total number of events folded.
    #[must_use]
    pub fn folded(&self) -> u64 {
        self.folded
    }

    /// Current winner when it differs from the last delivered value.
    fn undelivered(&self) -> Option<T>
    where
        T: Clone + PartialEq,
    {
        match (&self.state, &self.delivered) {
            (Some(current), Some(delivered)) if current == delivered => None,
            (Some(current), _) => Some(current.clone()),
            (None, _) => None,
        }
    }

    fn mark_delivered(&mut self, value: T) {
        self.delivered = Some(value);
    }
}

/// Downstream target of a pipeline.
#[async_trait]
pub trait ConflationSink<T>: Send + Sync {
    /// Writes one conflated value downstream.
    async fn flush(&self, value: T) -> Result<(), SyncError>;
}

/// A consumer failure observed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFault {
    /// Key of the pipeline whose consumer failed
    pub key: String,
    /// Panic payload or error message
    pub message: String,
    /// Restarts of this pipeline so far, including the one this fault caused
    pub restarts: u64,
}

struct Shared<T> {
    key: String,
    queue: SegQueue<T>,
    notify: Notify,
    aggregate: Mutex<ConflationAggregate<T>>,
    sink: Arc<dyn ConflationSink<T>>,
    pushed: AtomicU64,
    flushed: AtomicU64,
    restarts: AtomicU64,
    faults: broadcast::Sender<PipelineFault>,
    shutdown: CancellationToken,
}

impl<T: Clone + PartialEq + Send + 'static> Shared<T> {
    /// Folds everything currently queued. `None` when the winner is the
    /// value the sink already holds.
    fn drain(&self) -> Option<T> {
        let mut aggregate = self
            .aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut drained = 0u64;
        while let Some(event) = self.queue.pop() {
            aggregate.fold(event);
            drained += 1;
        }
        if drained > 0 {
            metrics::increment(metrics::EVENTS_CONFLATED, drained);
            debug!(key = %self.key, drained, "drain cycle");
        }
        aggregate.undelivered()
    }

    fn delivered(&self, value: T) {
        self.aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mark_delivered(value);
    }
}

/// Per-key conflation pipeline. See the module documentation.
pub struct ConflationPipeline<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + PartialEq + Send + 'static> ConflationPipeline<T> {
    /// Starts a pipeline with its own fault channel.
    pub fn spawn(
        key: impl Into<String>,
        sink: Arc<dyn ConflationSink<T>>,
        aggregate: ConflationAggregate<T>,
        config: &SyncConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (faults, _) = broadcast::channel(config.fault_channel_capacity);
        Self::spawn_with_faults(key, sink, aggregate, config, faults, shutdown)
    }

    /// Starts a pipeline reporting consumer faults on a shared channel.
    pub fn spawn_with_faults(
        key: impl Into<String>,
        sink: Arc<dyn ConflationSink<T>>,
        aggregate: ConflationAggregate<T>,
        config: &SyncConfig,
        faults: broadcast::Sender<PipelineFault>,
        shutdown: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            key: key.into(),
            queue: SegQueue::new(),
            notify: Notify::new(),
            aggregate: Mutex::new(aggregate),
            sink,
            pushed: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            faults,
            shutdown,
        });
        tokio::spawn(supervise(Arc::clone(&shared), config.monitor_period));
        info!(key = %shared.key, "conflation pipeline started");
        Self { shared }
    }

    /// Enqueues an event. Never blocks.
    #[inline]
    pub fn push(&self, event: T) {
        self.shared.queue.push(event);
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();
    }

    /// Pipeline key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Events queued but not yet drained.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Events pushed since the pipeline started.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.shared.pushed.load(Ordering::Relaxed)
    }

    /// Successful downstream flushes.
    #[must_use]
    pub fn flushed(&self) -> u64 {
        self.shared.flushed.load(Ordering::Relaxed)
    }

    /// Consumer restarts performed by the supervisor.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::Relaxed)
    }

    /// Current aggregate winner.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.shared
            .aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
            .cloned()
    }

    /// Subscribe to consumer faults.
    pub fn subscribe_faults(&self) -> broadcast::Receiver<PipelineFault> {
        self.shared.faults.subscribe()
    }
}

async fn consume<T: Clone + PartialEq + Send + 'static>(
    shared: Arc<Shared<T>>,
) -> Result<(), SyncError> {
    loop {
        if shared.shutdown.is_cancelled() {
            return Ok(());
        }

        match shared.drain() {
            Some(value) => {
                // A failed value stays undelivered for the replacement.
                shared.sink.flush(value.clone()).await?;
                shared.delivered(value);
                shared.flushed.fetch_add(1, Ordering::Relaxed);
                metrics::increment(metrics::FLUSHES, 1);
            }
            None => {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = shared.shutdown.cancelled() => return Ok(()),
                }
            }
        }
    }
}

async fn supervise<T: Clone + PartialEq + Send + 'static>(shared: Arc<Shared<T>>, monitor_period: Duration) {
    let mut consumer: JoinHandle<Result<(), SyncError>> = tokio::spawn(consume(Arc::clone(&shared)));
    let mut monitor = tokio::time::interval(monitor_period);
    monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = monitor.tick() => {}
        }
        if !consumer.is_finished() {
            continue;
        }

        let message = match (&mut consumer).await {
            Ok(Ok(())) if shared.shutdown.is_cancelled() => break,
            Ok(Ok(())) => "consumer exited".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(join_error) if join_error.is_panic() => panic_message(join_error.into_panic()),
            Err(join_error) => join_error.to_string(),
        };

        let restarts = shared.restarts.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::increment(metrics::CONSUMER_RESTARTS, 1);
        error!(key = %shared.key, restarts, error = %message, "conflation consumer failed, restarting");
        let _ = shared.faults.send(PipelineFault {
            key: shared.key.clone(),
            message,
            restarts,
        });

        consumer = tokio::spawn(consume(Arc::clone(&shared)));
    }

    let _ = consumer.await;
    info!(key = %shared.key, "conflation pipeline stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "consumer panicked".to_string()
    }
}
