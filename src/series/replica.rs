//! Per-process replica of a source store.

use super::config::SyncConfig;
use super::conflation::ConflationSink;
use super::error::SyncError;
use super::feed::ExchangeFeed;
use super::point::{Kline, SeriesKey};
use super::registry::SourceStoreRegistry;
use super::repository::KlineRepository;
use super::snapshot::{ChangeSet, ReplicationCursor, Revision, VersionedSnapshot, checksum_of};
use crate::utils::current_time_millis;
use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// A locally held revision and the store serial it was assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaEntry {
    /// Serial the source store assigned to this revision
    pub serial: u64,
    /// Store epoch the serial belongs to
    pub version: Uuid,
    /// The point itself
    pub point: Kline,
}

impl ReplicaEntry {
    /// Whether `self` may be replaced by a revision at `(version, serial)`.
    ///
    /// Serials only compare within one epoch; across epochs the incoming
    /// revision always wins.
    #[inline]
    fn superseded_by(&self, version: Uuid, serial: u64) -> bool {
        self.version != version || self.serial <= serial
    }
}

/// Lock-free local copy of one series, kept up to date by long-polling the
/// source store.
///
/// Readers go straight to a skip list ordered by open time and never enter
/// any task. Writes go through the durable repository first, then the
/// source store, and are applied locally with the serial the store returned.
pub struct ReplicaCache {
    key: SeriesKey,
    points: SkipMap<i64, ReplicaEntry>,
    cursor: AtomicCell<ReplicationCursor>,
    stores: Arc<SourceStoreRegistry>,
    repository: Arc<dyn KlineRepository>,
    demand: DashMap<String, u32>,
    config: SyncConfig,
    shutdown: CancellationToken,
    changed: Notify,
    rounds: AtomicU64,
}

impl ReplicaCache {
    /// Loads the store's current snapshot and starts the replication and
    /// local trim loops.
    pub fn start(
        key: SeriesKey,
        stores: Arc<SourceStoreRegistry>,
        repository: Arc<dyn KlineRepository>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let config = stores.config().clone();
        let replica = Arc::new(Self {
            key,
            points: SkipMap::new(),
            cursor: AtomicCell::new(ReplicationCursor::unset()),
            stores,
            repository,
            demand: DashMap::new(),
            config,
            shutdown: shutdown.child_token(),
            changed: Notify::new(),
            rounds: AtomicU64::new(0),
        });

        let initial = replica.stores.store(&replica.key).snapshot();
        replica.replace_all(&initial);

        tokio::spawn(Arc::clone(&replica).replicate());
        tokio::spawn(Arc::clone(&replica).trim_loop());

        info!(
            key = %replica.key,
            version = %initial.version,
            serial = initial.serial,
            points = initial.len(),
            "replica started"
        );
        replica
    }

    /// The key this replica mirrors.
    #[must_use]
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Every local point, ascending by open time.
    #[must_use]
    pub fn get_all(&self) -> Vec<Kline> {
        self.points
            .iter()
            .map(|entry| entry.value().point.clone())
            .collect()
    }

    /// The most recent `periods` points with `open_time <= tick_time`,
    /// oldest first.
    #[must_use]
    pub fn get_window(&self, tick_time: i64, periods: usize) -> Vec<Kline> {
        let mut window: Vec<Kline> = self
            .points
            .range(..=tick_time)
            .rev()
            .take(periods)
            .map(|entry| entry.value().point.clone())
            .collect();
        window.reverse();
        window
    }

    /// Point at `open_time`, if held locally.
    #[must_use]
    pub fn try_get(&self, open_time: i64) -> Option<Kline> {
        self.points
            .get(&open_time)
            .map(|entry| entry.value().point.clone())
    }

    /// Point with the highest open time.
    #[must_use]
    pub fn last(&self) -> Option<Kline> {
        self.points.back().map(|entry| entry.value().point.clone())
    }

    /// Number of local points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no point is held locally.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Replication watermark.
    #[must_use]
    pub fn cursor(&self) -> ReplicationCursor {
        self.cursor.load()
    }

    /// Change sets applied by the replication loop.
    #[must_use]
    pub fn replication_rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Checksum of the local points in the same form as
    /// [`VersionedSnapshot::items_checksum`].
    pub fn checksum(&self) -> Result<String, SyncError> {
        checksum_of(&self.get_all())
    }

    /// Waits until the replication cursor reaches `serial` in any epoch.
    pub async fn wait_for_serial(&self, serial: u64) {
        loop {
            let changed = self.changed.notified();
            if self.cursor().serial >= serial {
                return;
            }
            changed.await;
        }
    }

    /// Writes one point through the repository and the source store, then
    /// applies it locally. Returns the store serial.
    pub async fn set(&self, point: Kline) -> Result<u64, SyncError> {
        self.check_key(&point)?;
        self.repository.set_point(&point).await?;

        let store = self.stores.store(&self.key);
        let serial = store.apply(point.clone()).await?;
        self.apply_local(point, store.version(), serial);

        trace!(key = %self.key, serial, "point written through");
        Ok(serial)
    }

    /// Batched [`set`](Self::set). Returns the last serial assigned; an empty
    /// batch returns the store's current serial.
    pub async fn set_batch(&self, points: Vec<Kline>) -> Result<u64, SyncError> {
        for point in &points {
            self.check_key(point)?;
        }
        let store = self.stores.store(&self.key);
        if points.is_empty() {
            return Ok(store.snapshot().serial);
        }

        self.repository.set_points(&points).await?;
        let last = store.apply_batch(points.clone()).await?;

        // The store assigns consecutive serials in batch order.
        let first = last + 1 - points.len() as u64;
        for (offset, point) in points.into_iter().enumerate() {
            self.apply_local(point, store.version(), first + offset as u64);
        }
        Ok(last)
    }

    /// Declares that `consumer_id` needs the most recent `periods`
    /// intervals, both locally and at the source store.
    pub fn register_demand(&self, consumer_id: impl Into<String>, periods: u32) -> Result<(), SyncError> {
        let consumer_id = consumer_id.into();
        self.demand.insert(consumer_id.clone(), periods);
        self.stores
            .store(&self.key)
            .register_demand(consumer_id, periods)
    }

    /// Withdraws a consumer's demand locally and at the source store.
    pub fn unregister_demand(&self, consumer_id: &str) -> Result<(), SyncError> {
        self.demand.remove(consumer_id);
        self.stores
            .store(&self.key)
            .unregister_demand(consumer_id)
    }

    /// Largest window declared through this replica.
    #[must_use]
    pub fn max_local_periods(&self) -> u32 {
        self.demand
            .iter()
            .map(|entry| *entry.value())
            .max()
            .unwrap_or(0)
    }

    /// Drops local points older than `max_local_periods + 1` intervals and
    /// points the source store has already evicted.
    pub fn trim(&self) -> usize {
        self.trim_at(current_time_millis())
    }

    /// [`trim`](Self::trim) as of `now` (epoch milliseconds).
    pub fn trim_at(&self, now: i64) -> usize {
        let local = match self.max_local_periods() {
            0 => None,
            periods => Some(now - self.key.interval.duration_ms() * (i64::from(periods) + 1)),
        };
        let Some(cutoff) = local.max(self.store_retention_floor()) else {
            return 0;
        };

        let mut trimmed = 0;
        while let Some(front) = self.points.front() {
            if *front.key() >= cutoff {
                break;
            }
            if front.remove() {
                trimmed += 1;
            }
        }
        if trimmed > 0 {
            debug!(key = %self.key, trimmed, cutoff, "replica trimmed");
        }
        trimmed
    }

    /// Oldest open time the source store still retains after evicting in
    /// this replica's epoch.
    fn store_retention_floor(&self) -> Option<i64> {
        let snapshot = self.stores.store(&self.key).snapshot();
        if snapshot.version != self.cursor().version {
            return None;
        }
        let evicted_before = snapshot.evicted_before?;
        Some(match snapshot.items.first() {
            Some(oldest) => oldest.open_time.min(evicted_before),
            None => evicted_before,
        })
    }

    /// Returns the point for the interval containing `open_time`, fetching
    /// it from `feed` and writing it through when it is not held locally.
    pub async fn get_or_backfill(&self, open_time: i64, feed: &dyn ExchangeFeed) -> Result<Kline, SyncError> {
        let open_time = self.key.interval.align(open_time);
        if let Some(point) = self.try_get(open_time) {
            return Ok(point);
        }

        let close_time = open_time + self.key.interval.duration_ms() - 1;
        let page: Vec<Kline> = feed
            .get_page(&self.key, open_time, close_time, 1)
            .await?
            .into_iter()
            .filter(|point| point.belongs_to(&self.key))
            .collect();
        if !page.is_empty() {
            self.set_batch(page).await?;
        }

        self.try_get(open_time).ok_or_else(|| SyncError::NotFound {
            key: self.key.clone(),
            open_time,
        })
    }

    /// Stops the replication and trim loops. Local state stays readable.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`stop`](Self::stop) was called or the parent shut down.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn replicate(self: Arc<Self>) {
        loop {
            let store = self.stores.store(&self.key);
            let cursor = self.cursor();

            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                outcome = store.wait_for_changes(cursor.version, cursor.next_serial()) => outcome,
            };

            match outcome {
                Ok(change_set) => self.apply_change_set(change_set),
                Err(SyncError::Shutdown) => break,
                Err(e) => {
                    warn!(key = %self.key, error = %e, "long-poll failed, retrying");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.replication_retry_delay) => {}
                    }
                }
            }
        }
        info!(key = %self.key, "replica stopped");
    }

    async fn trim_loop(self: Arc<Self>) {
        let period = self.config.local_trim_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.trim();
                }
            }
        }
    }

    fn apply_change_set(&self, change_set: ChangeSet) {
        match change_set {
            ChangeSet::Snapshot(snapshot) => {
                let previous = self.cursor();
                self.replace_all(&snapshot);
                if previous.version != snapshot.version {
                    self.reregister_demand();
                }
            }
            ChangeSet::Delta {
                version,
                to_serial,
                points,
                ..
            } => {
                let count = points.len();
                for Revision { serial, point } in points {
                    self.apply_local(point, version, serial);
                }
                self.cursor.store(ReplicationCursor::new(version, to_serial));
                trace!(key = %self.key, count, serial = to_serial, "delta applied");
            }
            ChangeSet::Unchanged { .. } => {}
        }
        self.rounds.fetch_add(1, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    /// Replaces local state with `snapshot`, keeping only local revisions
    /// the snapshot has not caught up with yet.
    fn replace_all(&self, snapshot: &VersionedSnapshot) {
        let mut present = HashSet::with_capacity(snapshot.items.len());
        for point in &snapshot.items {
            present.insert(point.open_time);
            self.apply_local(point.clone(), snapshot.version, snapshot.serial);
        }

        for entry in self.points.iter() {
            if present.contains(entry.key()) {
                continue;
            }
            let local = entry.value();
            if local.version == snapshot.version && local.serial > snapshot.serial {
                continue;
            }
            entry.remove();
        }

        self.cursor.store(snapshot.cursor());
        debug!(
            key = %self.key,
            version = %snapshot.version,
            serial = snapshot.serial,
            points = snapshot.len(),
            "snapshot applied"
        );
    }

    /// Inserts a revision unless a newer one from the same epoch is held.
    fn apply_local(&self, point: Kline, version: Uuid, serial: u64) {
        let entry = ReplicaEntry {
            serial,
            version,
            point,
        };
        self.points.compare_insert(entry.point.open_time, entry, |local| {
            local.superseded_by(version, serial)
        });
    }

    fn reregister_demand(&self) {
        let store = self.stores.store(&self.key);
        for entry in self.demand.iter() {
            if let Err(e) = store.register_demand(entry.key().clone(), *entry.value()) {
                warn!(key = %self.key, error = %e, "re-registering demand failed");
            }
        }
    }

    fn check_key(&self, point: &Kline) -> Result<(), SyncError> {
        if point.belongs_to(&self.key) {
            Ok(())
        } else {
            Err(SyncError::KeyMismatch {
                expected: self.key.clone(),
                actual: point.key(),
            })
        }
    }
}

#[async_trait]
impl ConflationSink<Kline> for ReplicaCache {
    async fn flush(&self, value: Kline) -> Result<(), SyncError> {
        self.set(value).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::point::Interval;
    use crate::series::repository::MemoryRepository;

    fn point(open_time: i64, close: f64) -> Kline {
        Kline::new("BTCUSDT", Interval::OneMinute, open_time).with_prices(close, close, close, close)
    }

    fn start_replica(shutdown: &CancellationToken) -> Arc<ReplicaCache> {
        let config = SyncConfig::default().with_seed_periods(0);
        let stores = Arc::new(SourceStoreRegistry::new(config, shutdown.clone()));
        let repository: Arc<dyn KlineRepository> = Arc::new(MemoryRepository::new());
        ReplicaCache::start(
            SeriesKey::new("BTCUSDT", Interval::OneMinute),
            stores,
            repository,
            shutdown.clone(),
        )
    }

    #[test]
    fn entry_superseded_within_epoch_by_serial() {
        let version = Uuid::new_v4();
        let entry = ReplicaEntry {
            serial: 5,
            version,
            point: point(0, 1.0),
        };
        assert!(entry.superseded_by(version, 5));
        assert!(entry.superseded_by(version, 6));
        assert!(!entry.superseded_by(version, 4));
        assert!(entry.superseded_by(Uuid::new_v4(), 1));
    }

    #[tokio::test]
    async fn older_revision_never_overwrites_newer_local_one() {
        let shutdown = CancellationToken::new();
        let replica = start_replica(&shutdown);
        replica.set(point(0, 5.0)).await.unwrap();
        replica.stop();

        let version = replica.stores.store(&replica.key).version();
        replica.apply_local(point(0, 1.0), version, 0);
        assert_eq!(replica.try_get(0).map(|p| p.close), Some(5.0));

        replica.apply_local(point(0, 9.0), version, 2);
        assert_eq!(replica.try_get(0).map(|p| p.close), Some(9.0));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn snapshot_from_new_epoch_replaces_local_state() {
        let shutdown = CancellationToken::new();
        let replica = start_replica(&shutdown);
        replica
            .set_batch(vec![point(0, 1.0), point(60_000, 1.0)])
            .await
            .unwrap();
        replica.stop();

        let version = Uuid::new_v4();
        replica.apply_change_set(ChangeSet::Snapshot(Arc::new(VersionedSnapshot {
            key: replica.key.clone(),
            version,
            serial: 1,
            items: vec![point(120_000, 2.0)],
            evicted_before: None,
        })));

        let open_times: Vec<i64> = replica.get_all().iter().map(|p| p.open_time).collect();
        assert_eq!(open_times, vec![120_000]);
        assert_eq!(replica.cursor(), ReplicationCursor::new(version, 1));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn snapshot_keeps_local_writes_it_has_not_seen() {
        let shutdown = CancellationToken::new();
        let replica = start_replica(&shutdown);
        replica.set(point(0, 1.0)).await.unwrap();
        replica.set(point(60_000, 1.0)).await.unwrap();
        replica.stop();

        let version = replica.stores.store(&replica.key).version();
        replica.apply_change_set(ChangeSet::Snapshot(Arc::new(VersionedSnapshot {
            key: replica.key.clone(),
            version,
            serial: 1,
            items: vec![point(0, 1.0)],
            evicted_before: None,
        })));

        assert_eq!(replica.len(), 2);
        assert_eq!(replica.cursor().serial, 1);
        shutdown.cancel();
    }
}
