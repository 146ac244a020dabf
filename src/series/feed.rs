//! Exchange feed boundary and the synchronizer that moves its data into
//! replicas.

use super::conflation::ConflationPipeline;
use super::error::SyncError;
use super::point::{Kline, SeriesKey};
use super::replica::ReplicaCache;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Historical kline source.
#[async_trait]
pub trait ExchangeFeed: Send + Sync {
    /// Up to `max_count` klines of `key` with `from <= open_time <= to`,
    /// ascending. A page shorter than `max_count` means history is exhausted.
    async fn get_page(
        &self,
        key: &SeriesKey,
        from: i64,
        to: i64,
        max_count: usize,
    ) -> Result<Vec<Kline>, SyncError>;
}

/// Outcome of a backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Pages requested from the feed
    pub pages: usize,
    /// Points written through the replica
    pub points: usize,
    /// Serial of the last write, zero when nothing was written
    pub last_serial: u64,
}

/// Moves feed data into replicas: paged history through
/// [`backfill`](Self::backfill) and live push subscriptions through
/// [`pump`](Self::pump).
pub struct Synchronizer {
    page_size: usize,
}

impl Synchronizer {
    /// Synchronizer requesting `page_size` klines per page.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// Configured page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages `from..=to` out of `feed` and writes each page through
    /// `replica`.
    ///
    /// Stops after the first page shorter than the page size. Feed and
    /// write failures abort the run and are returned as is.
    pub async fn backfill(
        &self,
        replica: &ReplicaCache,
        feed: &dyn ExchangeFeed,
        from: i64,
        to: i64,
    ) -> Result<BackfillReport, SyncError> {
        let key = replica.key().clone();
        let mut report = BackfillReport::default();
        let mut cursor = key.interval.align(from);

        while cursor <= to {
            let page = feed.get_page(&key, cursor, to, self.page_size).await?;
            report.pages += 1;
            let received = page.len();

            let points: Vec<Kline> = page.into_iter().filter(|p| p.belongs_to(&key)).collect();
            if points.len() < received {
                warn!(key = %key, dropped = received - points.len(), "feed page held foreign points");
            }
            let Some(newest) = points.iter().map(|point| point.open_time).max() else {
                break;
            };

            report.points += points.len();
            report.last_serial = replica.set_batch(points).await?;
            debug!(key = %key, page = report.pages, received, newest, "backfill page written");

            if received < self.page_size {
                break;
            }
            let next = newest + key.interval.duration_ms();
            if next <= cursor {
                warn!(key = %key, cursor, newest, "feed page did not advance, stopping backfill");
                break;
            }
            cursor = next;
        }

        info!(key = %key, pages = report.pages, points = report.points, "backfill finished");
        Ok(report)
    }

    /// Forwards a push subscription into a conflation pipeline until the
    /// channel closes or `shutdown` fires. Returns the number of klines
    /// forwarded.
    pub async fn pump(
        &self,
        mut receiver: mpsc::Receiver<Kline>,
        pipeline: &ConflationPipeline<Kline>,
        shutdown: CancellationToken,
    ) -> u64 {
        let mut forwarded = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(kline) => {
                        pipeline.push(kline);
                        forwarded += 1;
                    }
                    None => break,
                },
            }
        }
        debug!(key = pipeline.key(), forwarded, "push subscription ended");
        forwarded
    }
}
