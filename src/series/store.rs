//! Authoritative, versioned store for one series key.
//!
//! Each store is a single tokio task that owns a [`SeriesIndex`], the
//! pending long-poll table and the consumer demand table. Every mutation
//! (apply, eviction, waiter resolution) happens inside that task, so the
//! three index structures and the waiter table never need a lock.
//! Callers talk to it through a cloneable [`SourceStoreHandle`].
//!
//! Readers that only want the current state call
//! [`SourceStoreHandle::snapshot`], which returns the last published
//! immutable [`VersionedSnapshot`] without entering the task.

use super::config::SyncConfig;
use super::error::SyncError;
use super::index::SeriesIndex;
use super::metrics;
use super::point::{Kline, SeriesKey};
use super::repository::KlineRepository;
use super::snapshot::{ChangeSet, VersionedSnapshot};
use crate::utils::current_time_millis;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Requests served by the store task.
#[derive(Debug)]
enum StoreCommand {
    Apply {
        points: Vec<Kline>,
        reply: oneshot::Sender<Result<u64, SyncError>>,
    },
    WaitForChanges {
        since_version: Uuid,
        since_serial: u64,
        reply: oneshot::Sender<ChangeSet>,
    },
    RegisterDemand {
        consumer_id: String,
        periods: u32,
    },
    UnregisterDemand {
        consumer_id: String,
    },
    Sweep {
        now: i64,
        reply: oneshot::Sender<usize>,
    },
    MaxPeriods {
        reply: oneshot::Sender<u32>,
    },
    #[cfg(test)]
    Crash,
}

/// A long-poll parked until the serial it asked for exists.
#[derive(Debug)]
struct Waiter {
    deadline: Instant,
    reply: oneshot::Sender<ChangeSet>,
}

/// Client side of a source store.
///
/// Cloning is cheap; every clone talks to the same task.
#[derive(Debug, Clone)]
pub struct SourceStoreHandle {
    key: SeriesKey,
    version: Uuid,
    commands: mpsc::UnboundedSender<StoreCommand>,
    snapshots: watch::Receiver<Arc<VersionedSnapshot>>,
    shutdown: CancellationToken,
}

impl SourceStoreHandle {
    /// The key this store is authoritative for.
    #[must_use]
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Epoch of the store instance behind this handle.
    #[must_use]
    pub fn version(&self) -> Uuid {
        self.version
    }

    /// Whether the store task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Last published snapshot. Never blocks.
    #[must_use]
    pub fn snapshot(&self) -> Arc<VersionedSnapshot> {
        Arc::clone(&*self.snapshots.borrow())
    }

    /// Long-polls for changes after the caller's watermark.
    ///
    /// `since_serial` is the first serial the caller has not seen. The call
    /// returns immediately when the caller's epoch is stale or the serial
    /// already exists; otherwise it waits until a mutation reaches
    /// `since_serial` or the configured long-poll timeout elapses.
    pub async fn wait_for_changes(
        &self,
        since_version: Uuid,
        since_serial: u64,
    ) -> Result<ChangeSet, SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(StoreCommand::WaitForChanges {
            since_version,
            since_serial,
            reply,
        })?;
        response.await.map_err(|_| self.unavailable())
    }

    /// Applies one point and returns the serial assigned to it.
    pub async fn apply(&self, point: Kline) -> Result<u64, SyncError> {
        self.apply_batch(vec![point]).await
    }

    /// Applies points in order and returns the last serial assigned.
    ///
    /// The batch is rejected as a whole if any point belongs to another key.
    pub async fn apply_batch(&self, points: Vec<Kline>) -> Result<u64, SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(StoreCommand::Apply { points, reply })?;
        response.await.map_err(|_| self.unavailable())?
    }

    /// Declares that `consumer_id` needs the most recent `periods` intervals.
    ///
    /// A second registration from the same consumer replaces the first.
    pub fn register_demand(&self, consumer_id: impl Into<String>, periods: u32) -> Result<(), SyncError> {
        self.send(StoreCommand::RegisterDemand {
            consumer_id: consumer_id.into(),
            periods,
        })
    }

    /// Withdraws a consumer's demand.
    pub fn unregister_demand(&self, consumer_id: impl Into<String>) -> Result<(), SyncError> {
        self.send(StoreCommand::UnregisterDemand {
            consumer_id: consumer_id.into(),
        })
    }

    /// Largest window declared by any consumer.
    pub async fn max_periods(&self) -> Result<u32, SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(StoreCommand::MaxPeriods { reply })?;
        response.await.map_err(|_| self.unavailable())
    }

    /// Runs an eviction sweep now and returns how many points were removed.
    pub async fn sweep(&self) -> Result<usize, SyncError> {
        self.sweep_at(current_time_millis()).await
    }

    /// Runs an eviction sweep as of `now` (epoch milliseconds).
    pub async fn sweep_at(&self, now: i64) -> Result<usize, SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(StoreCommand::Sweep { now, reply })?;
        response.await.map_err(|_| self.unavailable())
    }

    /// Makes the store task panic as on index corruption.
    #[cfg(test)]
    pub(crate) fn crash(&self) {
        let _ = self.commands.send(StoreCommand::Crash);
    }

    fn send(&self, command: StoreCommand) -> Result<(), SyncError> {
        self.commands.send(command).map_err(|_| self.unavailable())
    }

    #[cold]
    fn unavailable(&self) -> SyncError {
        if self.shutdown.is_cancelled() {
            return SyncError::Shutdown;
        }
        SyncError::StoreUnavailable {
            key: self.key.clone(),
        }
    }
}

/// Spawns source store tasks.
pub struct SourceStore;

impl SourceStore {
    /// Spawns an empty store for `key` with a fresh version.
    pub fn spawn(key: SeriesKey, config: &SyncConfig, shutdown: CancellationToken) -> SourceStoreHandle {
        Self::spawn_inner(key, config, shutdown, None)
    }

    /// Spawns a store that first loads the trailing
    /// [`seed_periods`](SyncConfig::seed_periods) intervals from `repository`.
    ///
    /// Requests sent while seeding are queued and served afterwards.
    pub fn spawn_seeded(
        key: SeriesKey,
        config: &SyncConfig,
        shutdown: CancellationToken,
        repository: Arc<dyn KlineRepository>,
    ) -> SourceStoreHandle {
        Self::spawn_inner(key, config, shutdown, Some(repository))
    }

    fn spawn_inner(
        key: SeriesKey,
        config: &SyncConfig,
        shutdown: CancellationToken,
        repository: Option<Arc<dyn KlineRepository>>,
    ) -> SourceStoreHandle {
        let version = Uuid::new_v4();
        let (commands, receiver) = mpsc::unbounded_channel();
        let (publisher, snapshots) =
            watch::channel(Arc::new(VersionedSnapshot::empty(key.clone(), version)));

        let actor = StoreActor {
            index: SeriesIndex::new(key.clone()),
            version,
            pending: BTreeMap::new(),
            demand: HashMap::new(),
            evicted_before: None,
            config: config.clone(),
            publisher,
        };
        tokio::spawn(actor.run(receiver, shutdown.clone(), repository));

        info!(key = %key, %version, "source store spawned");
        SourceStoreHandle {
            key,
            version,
            commands,
            snapshots,
            shutdown,
        }
    }
}

struct StoreActor {
    index: SeriesIndex,
    version: Uuid,
    pending: BTreeMap<u64, Vec<Waiter>>,
    demand: HashMap<String, u32>,
    evicted_before: Option<i64>,
    config: SyncConfig,
    publisher: watch::Sender<Arc<VersionedSnapshot>>,
}

impl StoreActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<StoreCommand>,
        shutdown: CancellationToken,
        repository: Option<Arc<dyn KlineRepository>>,
    ) {
        if let Some(repository) = repository {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.seed(repository.as_ref()) => {}
            }
        }

        let mut sweep = tokio::time::interval_at(
            Instant::now() + self.config.eviction_period,
            self.config.eviction_period,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sweep.tick() => {
                    self.sweep(current_time_millis());
                }
                _ = sleep_until(deadline) => self.expire_waiters(Instant::now()),
            }
        }

        self.release_waiters();
        info!(key = %self.index.key(), version = %self.version, "source store stopped");
    }

    async fn seed(&mut self, repository: &dyn KlineRepository) {
        if self.config.seed_periods == 0 {
            return;
        }
        let key = self.index.key().clone();
        let now = current_time_millis();
        let start = now - key.interval.duration_ms() * i64::from(self.config.seed_periods);

        match repository.get_points(&key, start, now).await {
            Ok(points) => {
                let count = points.len();
                let foreign = points.iter().filter(|p| !p.belongs_to(&key)).count();
                for point in points.into_iter().filter(|p| p.belongs_to(&key)) {
                    self.index.insert(point);
                }
                if foreign > 0 {
                    warn!(key = %key, foreign, "repository returned points of another key");
                }
                self.publish();
                info!(key = %key, count, serial = self.index.current_serial(), "source store seeded");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "seeding from repository failed, starting empty");
            }
        }
    }

    fn handle(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::Apply { points, reply } => {
                let result = self.apply(points);
                let _ = reply.send(result);
            }
            StoreCommand::WaitForChanges {
                since_version,
                since_serial,
                reply,
            } => self.wait_for_changes(since_version, since_serial, reply),
            StoreCommand::RegisterDemand {
                consumer_id,
                periods,
            } => {
                debug!(key = %self.index.key(), consumer_id, periods, "demand registered");
                self.demand.insert(consumer_id, periods);
            }
            StoreCommand::UnregisterDemand { consumer_id } => {
                self.demand.remove(&consumer_id);
            }
            StoreCommand::Sweep { now, reply } => {
                let evicted = self.sweep(now);
                let _ = reply.send(evicted);
            }
            StoreCommand::MaxPeriods { reply } => {
                let _ = reply.send(self.max_periods());
            }
            #[cfg(test)]
            StoreCommand::Crash => panic!("source store {} crashed", self.index.key()),
        }
    }

    fn apply(&mut self, points: Vec<Kline>) -> Result<u64, SyncError> {
        if let Some(foreign) = points.iter().find(|p| !p.belongs_to(self.index.key())) {
            return Err(SyncError::KeyMismatch {
                expected: self.index.key().clone(),
                actual: foreign.key(),
            });
        }
        if points.is_empty() {
            return Ok(self.index.current_serial());
        }

        let count = points.len();
        for point in points {
            self.index.insert(point);
        }
        let serial = self.index.current_serial();
        trace!(key = %self.index.key(), count, serial, "points applied");
        metrics::increment(metrics::POINTS_APPLIED, count as u64);

        self.publish();
        self.resolve_waiters();
        Ok(serial)
    }

    fn wait_for_changes(
        &mut self,
        since_version: Uuid,
        since_serial: u64,
        reply: oneshot::Sender<ChangeSet>,
    ) {
        if since_version != self.version {
            debug!(key = %self.index.key(), %since_version, "stale epoch, sending snapshot");
            metrics::increment(metrics::LONG_POLLS_RESOLVED, 1);
            let _ = reply.send(ChangeSet::Snapshot(Arc::clone(&*self.publisher.borrow())));
            return;
        }

        let current = self.index.current_serial();
        if current >= since_serial {
            metrics::increment(metrics::LONG_POLLS_RESOLVED, 1);
            let _ = reply.send(self.delta(since_serial, current));
            return;
        }

        self.pending.entry(since_serial).or_default().push(Waiter {
            deadline: Instant::now() + self.config.long_poll_timeout,
            reply,
        });
    }

    fn delta(&self, from_serial: u64, to_serial: u64) -> ChangeSet {
        ChangeSet::Delta {
            version: self.version,
            from_serial,
            to_serial,
            points: self.index.replay(from_serial, to_serial),
        }
    }

    /// Answers every parked waiter whose serial now exists.
    fn resolve_waiters(&mut self) {
        let current = self.index.current_serial();
        let still_waiting = self.pending.split_off(&current.saturating_add(1));
        let ready = std::mem::replace(&mut self.pending, still_waiting);

        for (since_serial, waiters) in ready {
            let response = self.delta(since_serial, current);
            for waiter in waiters {
                metrics::increment(metrics::LONG_POLLS_RESOLVED, 1);
                let _ = waiter.reply.send(response.clone());
            }
            debug!(key = %self.index.key(), since_serial, current, "long-poll resolved");
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .flatten()
            .map(|waiter| waiter.deadline)
            .min()
    }

    /// Answers timed-out waiters with the "no new data" sentinel and drops
    /// waiters whose caller has gone away.
    fn expire_waiters(&mut self, now: Instant) {
        let unchanged = ChangeSet::Unchanged {
            version: self.version,
            serial: self.index.current_serial(),
        };
        for waiters in self.pending.values_mut() {
            let mut kept = Vec::with_capacity(waiters.len());
            for waiter in waiters.drain(..) {
                if waiter.reply.is_closed() {
                    continue;
                }
                if waiter.deadline <= now {
                    metrics::increment(metrics::LONG_POLLS_TIMED_OUT, 1);
                    let _ = waiter.reply.send(unchanged.clone());
                } else {
                    kept.push(waiter);
                }
            }
            *waiters = kept;
        }
        self.pending.retain(|_, waiters| !waiters.is_empty());
    }

    fn release_waiters(&mut self) {
        let unchanged = ChangeSet::Unchanged {
            version: self.version,
            serial: self.index.current_serial(),
        };
        for waiter in std::mem::take(&mut self.pending).into_values().flatten() {
            let _ = waiter.reply.send(unchanged.clone());
        }
    }

    fn max_periods(&self) -> u32 {
        self.demand.values().copied().max().unwrap_or(0)
    }

    /// Removes points older than the demand-driven retention horizon.
    ///
    /// With no declared demand nothing is removed.
    fn sweep(&mut self, now: i64) -> usize {
        let max_periods = self.max_periods();
        if max_periods == 0 {
            return 0;
        }
        let interval_ms = self.index.key().interval.duration_ms();
        let cutoff = now - interval_ms * i64::from(max_periods) - interval_ms;

        let evicted = self.index.evict_before(cutoff);
        if evicted > 0 {
            self.evicted_before = self.evicted_before.max(Some(cutoff));
            metrics::increment(metrics::POINTS_EVICTED, evicted as u64);
            self.publish();
            debug!(key = %self.index.key(), evicted, cutoff, max_periods, "eviction sweep");
        }
        evicted
    }

    fn publish(&self) {
        self.publisher.send_replace(Arc::new(VersionedSnapshot {
            key: self.index.key().clone(),
            version: self.version,
            serial: self.index.current_serial(),
            items: self.index.to_vec(),
            evicted_before: self.evicted_before,
        }));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
