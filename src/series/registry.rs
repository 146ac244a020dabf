//! Process-wide directory of source stores, one per key.

use super::config::SyncConfig;
use super::point::SeriesKey;
use super::repository::KlineRepository;
use super::store::{SourceStore, SourceStoreHandle};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Lazily spawns and hands out [`SourceStoreHandle`]s.
///
/// A store is spawned the first time its key is touched. If its task has
/// stopped (a fatal invariant violation panics it), the next access spawns a
/// replacement with a new version, so replicas holding the old epoch receive
/// a full snapshot on their next long-poll.
pub struct SourceStoreRegistry {
    stores: DashMap<SeriesKey, SourceStoreHandle>,
    config: SyncConfig,
    repository: Option<Arc<dyn KlineRepository>>,
    shutdown: CancellationToken,
}

impl SourceStoreRegistry {
    /// Registry whose stores start empty.
    pub fn new(config: SyncConfig, shutdown: CancellationToken) -> Self {
        Self {
            stores: DashMap::new(),
            config,
            repository: None,
            shutdown,
        }
    }

    /// Registry whose stores seed themselves from `repository` when spawned.
    pub fn with_repository(
        config: SyncConfig,
        shutdown: CancellationToken,
        repository: Arc<dyn KlineRepository>,
    ) -> Self {
        Self {
            stores: DashMap::new(),
            config,
            repository: Some(repository),
            shutdown,
        }
    }

    /// Handle to the live store for `key`, spawning one if needed.
    pub fn store(&self, key: &SeriesKey) -> SourceStoreHandle {
        if let Some(handle) = self.stores.get(key) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let mut entry = self
            .stores
            .entry(key.clone())
            .or_insert_with(|| self.spawn(key));
        if entry.is_closed() && !self.shutdown.is_cancelled() {
            warn!(key = %key, old_version = %entry.version(), "source store stopped, respawning");
            *entry = self.spawn(key);
        }
        entry.clone()
    }

    /// Keys with a registered store.
    #[must_use]
    pub fn keys(&self) -> Vec<SeriesKey> {
        self.stores.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no store has been spawned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Configuration handed to new stores.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn spawn(&self, key: &SeriesKey) -> SourceStoreHandle {
        let shutdown = self.shutdown.child_token();
        match &self.repository {
            Some(repository) => {
                SourceStore::spawn_seeded(key.clone(), &self.config, shutdown, Arc::clone(repository))
            }
            None => SourceStore::spawn(key.clone(), &self.config, shutdown),
        }
    }
}
