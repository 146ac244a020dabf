//! Durable repository boundary.
//!
//! The synchronization layer only needs three calls from durable storage:
//! a range read and single/batch upserts keyed by kline identity. The
//! [`KlineRepository`] trait captures exactly that. Rows cross the boundary
//! as [`KlineRow`], converted field by field.
//!
//! - [`MemoryRepository`] — in-process implementation, always available
//! - [`RetryingRepository`] — wraps any repository with bounded exponential
//!   backoff

use super::error::SyncError;
use super::point::{Interval, Kline, SeriesKey};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Default maximum number of retry attempts for failed repository calls.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay in milliseconds for exponential backoff between retries.
const BASE_RETRY_DELAY_MS: u64 = 10;

/// Durable kline storage.
///
/// Writes are idempotent upserts by identity and may be delivered more than
/// once.
#[async_trait]
pub trait KlineRepository: Send + Sync {
    /// Points of `key` with `start <= open_time <= end`, ascending.
    async fn get_points(&self, key: &SeriesKey, start: i64, end: i64)
    -> Result<Vec<Kline>, SyncError>;

    /// Upsert one point.
    async fn set_point(&self, point: &Kline) -> Result<(), SyncError>;

    /// Upsert many points.
    async fn set_points(&self, points: &[Kline]) -> Result<(), SyncError>;
}

/// Storage row for a kline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineRow {
    /// Trading symbol
    pub symbol: String,
    /// Interval short code
    pub interval: String,
    /// Open time (ms)
    pub open_time: i64,
    /// Close time (ms)
    pub close_time: i64,
    /// Opening price
    pub open: f64,
    /// Highest price
    pub high: f64,
    /// Lowest price
    pub low: f64,
    /// Last price
    pub close: f64,
    /// Base asset volume
    pub volume: f64,
    /// Quote asset volume
    pub quote_volume: f64,
    /// Number of trades, signed as stored
    pub trade_count: i64,
    /// Event time (ms)
    pub event_time: i64,
    /// Whether the interval has finished
    pub is_closed: bool,
}

impl From<&Kline> for KlineRow {
    fn from(kline: &Kline) -> Self {
        Self {
            symbol: kline.symbol.clone(),
            interval: kline.interval.code().to_string(),
            open_time: kline.open_time,
            close_time: kline.close_time,
            open: kline.open,
            high: kline.high,
            low: kline.low,
            close: kline.close,
            volume: kline.volume,
            quote_volume: kline.quote_volume,
            trade_count: i64::try_from(kline.trade_count).unwrap_or(i64::MAX),
            event_time: kline.event_time,
            is_closed: kline.is_closed,
        }
    }
}

impl TryFrom<KlineRow> for Kline {
    type Error = SyncError;

    fn try_from(row: KlineRow) -> Result<Self, Self::Error> {
        let interval: Interval = row.interval.parse()?;
        let trade_count = u64::try_from(row.trade_count).map_err(|_| SyncError::Repository {
            message: format!(
                "negative trade count {} for {}@{} at {}",
                row.trade_count, row.symbol, row.interval, row.open_time
            ),
        })?;

        Ok(Kline {
            symbol: row.symbol,
            interval,
            open_time: row.open_time,
            close_time: row.close_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            quote_volume: row.quote_volume,
            trade_count,
            event_time: row.event_time,
            is_closed: row.is_closed,
        })
    }
}

/// In-process repository keeping rows per series, ordered by open time.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: DashMap<SeriesKey, BTreeMap<i64, KlineRow>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for `key`.
    #[must_use]
    pub fn len(&self, key: &SeriesKey) -> usize {
        self.rows.get(key).map(|rows| rows.len()).unwrap_or(0)
    }

    /// Whether no row is stored for any key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|entry| entry.value().is_empty())
    }

    fn upsert(&self, point: &Kline) {
        self.rows
            .entry(point.key())
            .or_default()
            .insert(point.open_time, KlineRow::from(point));
    }
}

#[async_trait]
impl KlineRepository for MemoryRepository {
    async fn get_points(
        &self,
        key: &SeriesKey,
        start: i64,
        end: i64,
    ) -> Result<Vec<Kline>, SyncError> {
        if start > end {
            return Ok(Vec::new());
        }
        let Some(rows) = self.rows.get(key) else {
            return Ok(Vec::new());
        };
        rows.range(start..=end)
            .map(|(_, row)| Kline::try_from(row.clone()))
            .collect()
    }

    async fn set_point(&self, point: &Kline) -> Result<(), SyncError> {
        self.upsert(point);
        trace!(key = %point.key(), open_time = point.open_time, "row upserted");
        Ok(())
    }

    async fn set_points(&self, points: &[Kline]) -> Result<(), SyncError> {
        for point in points {
            self.upsert(point);
        }
        trace!(count = points.len(), "rows upserted");
        Ok(())
    }
}

/// Retries failed repository calls with exponential backoff.
///
/// Only [`SyncError::Repository`] failures are retried. After
/// `max_retries` additional attempts the last error is returned.
pub struct RetryingRepository<R> {
    inner: R,
    max_retries: u32,
    base_delay: Duration,
}

impl<R: KlineRepository> RetryingRepository<R> {
    /// Wrap a repository with the default retry policy.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        }
    }

    /// Set the maximum number of retry attempts. Zero disables retries.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry; it doubles on each attempt.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// The wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Convert into a shareable trait object.
    pub fn into_shared(self) -> Arc<dyn KlineRepository>
    where
        R: 'static,
    {
        Arc::new(self)
    }

    async fn with_retry<'a, T, F, Fut>(&'a self, operation: &str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut(&'a R) -> Fut,
        Fut: std::future::Future<Output = Result<T, SyncError>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            match call(&self.inner).await {
                Ok(value) => return Ok(value),
                Err(err @ SyncError::Repository { .. }) if attempt + 1 < max_attempts => {
                    let delay = self.base_delay.saturating_mul(1 << attempt.min(16));
                    warn!(
                        attempt = attempt + 1,
                        max = max_attempts,
                        operation,
                        error = %err,
                        "repository call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<R: KlineRepository> KlineRepository for RetryingRepository<R> {
    async fn get_points(
        &self,
        key: &SeriesKey,
        start: i64,
        end: i64,
    ) -> Result<Vec<Kline>, SyncError> {
        self.with_retry("get_points", |repo| repo.get_points(key, start, end))
            .await
    }

    async fn set_point(&self, point: &Kline) -> Result<(), SyncError> {
        self.with_retry("set_point", |repo| repo.set_point(point)).await
    }

    async fn set_points(&self, points: &[Kline]) -> Result<(), SyncError> {
        self.with_retry("set_points", |repo| repo.set_points(points))
            .await
    }
}
