//! Runtime knobs for stores, replicas and conflation pipelines

use super::error::SyncError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default long-poll deadline.
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Default period of the source store eviction sweep.
pub const DEFAULT_EVICTION_PERIOD: Duration = Duration::from_secs(60);

/// Default period of the replica trim loop.
pub const DEFAULT_LOCAL_TRIM_PERIOD: Duration = Duration::from_secs(60);

/// Default period of the conflation supervisor.
pub const DEFAULT_MONITOR_PERIOD: Duration = Duration::from_secs(1);

/// Default delay before a replica retries after its store became unreachable.
pub const DEFAULT_REPLICATION_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Default number of klines requested per backfill page.
pub const DEFAULT_BACKFILL_PAGE_SIZE: usize = 1_000;

/// Default capacity of the pipeline fault broadcast channel.
pub const DEFAULT_FAULT_CHANNEL_CAPACITY: usize = 64;

/// Default number of trailing intervals loaded when a store is activated.
pub const DEFAULT_SEED_PERIODS: u32 = 500;

/// Configuration shared by every component of the synchronization layer.
///
/// Durations are (de)serialized as integer milliseconds. Missing fields take
/// their default value.
///
/// ```
/// use klinecache_rs::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::from_json(r#"{ "long_poll_timeout": 5000 }"#).unwrap();
/// assert_eq!(config.long_poll_timeout, Duration::from_secs(5));
/// assert_eq!(config.monitor_period, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a parked long-poll waits before answering "no new data".
    #[serde(with = "duration_ms")]
    pub long_poll_timeout: Duration,

    /// Period of the demand-driven eviction sweep in each source store.
    #[serde(with = "duration_ms")]
    pub eviction_period: Duration,

    /// Period of the local retention trim in each replica.
    #[serde(with = "duration_ms")]
    pub local_trim_period: Duration,

    /// Period at which conflation supervisors check their consumer.
    #[serde(with = "duration_ms")]
    pub monitor_period: Duration,

    /// Pause before a replica re-resolves a store that stopped answering.
    #[serde(with = "duration_ms")]
    pub replication_retry_delay: Duration,

    /// Klines requested per exchange backfill page.
    pub backfill_page_size: usize,

    /// Buffered faults per subscriber before old ones are dropped.
    pub fault_channel_capacity: usize,

    /// Trailing intervals a newly spawned source store loads from the durable
    /// repository before serving. Zero disables seeding.
    pub seed_periods: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            eviction_period: DEFAULT_EVICTION_PERIOD,
            local_trim_period: DEFAULT_LOCAL_TRIM_PERIOD,
            monitor_period: DEFAULT_MONITOR_PERIOD,
            replication_retry_delay: DEFAULT_REPLICATION_RETRY_DELAY,
            backfill_page_size: DEFAULT_BACKFILL_PAGE_SIZE,
            fault_channel_capacity: DEFAULT_FAULT_CHANNEL_CAPACITY,
            seed_periods: DEFAULT_SEED_PERIODS,
        }
    }
}

impl SyncConfig {
    /// Set the long-poll deadline.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    /// Set the eviction sweep period.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_eviction_period(mut self, period: Duration) -> Self {
        self.eviction_period = period;
        self
    }

    /// Set the replica trim period.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_local_trim_period(mut self, period: Duration) -> Self {
        self.local_trim_period = period;
        self
    }

    /// Set the conflation supervisor period.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_monitor_period(mut self, period: Duration) -> Self {
        self.monitor_period = period;
        self
    }

    /// Set the replication retry delay.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_replication_retry_delay(mut self, delay: Duration) -> Self {
        self.replication_retry_delay = delay;
        self
    }

    /// Set the backfill page size.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_backfill_page_size(mut self, page_size: usize) -> Self {
        self.backfill_page_size = page_size;
        self
    }

    /// Set the fault channel capacity.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_fault_channel_capacity(mut self, capacity: usize) -> Self {
        self.fault_channel_capacity = capacity;
        self
    }

    /// Set how many trailing intervals new stores load from the repository.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_seed_periods(mut self, periods: u32) -> Self {
        self.seed_periods = periods;
        self
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(data: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_json::from_str(data).map_err(|e| SyncError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero periods and sizes, which would spin or never make progress.
    pub fn validate(&self) -> Result<(), SyncError> {
        let durations = [
            ("long_poll_timeout", self.long_poll_timeout),
            ("eviction_period", self.eviction_period),
            ("local_trim_period", self.local_trim_period),
            ("monitor_period", self.monitor_period),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(SyncError::Config {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }
        if self.backfill_page_size == 0 {
            return Err(SyncError::Config {
                message: "backfill_page_size must be greater than zero".to_string(),
            });
        }
        if self.fault_channel_capacity == 0 {
            return Err(SyncError::Config {
                message: "fault_channel_capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
