//! Integration tests for backfill paging and push-subscription pumping.

use async_trait::async_trait;
use klinecache_rs::prelude::*;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MINUTE: i64 = 60_000;

fn config(page_size: usize) -> SyncConfig {
    SyncConfig::default()
        .with_long_poll_timeout(Duration::from_millis(200))
        .with_monitor_period(Duration::from_millis(20))
        .with_backfill_page_size(page_size)
        .with_seed_periods(0)
}

fn btc() -> SeriesKey {
    SeriesKey::new("BTCUSDT", Interval::OneMinute)
}

/// Serves a fixed history and records every page request.
struct HistoryFeed {
    history: Vec<Kline>,
    requests: Mutex<Vec<(i64, i64, usize)>>,
    fail: bool,
}

impl HistoryFeed {
    fn with_minutes(count: i64) -> Self {
        Self {
            history: (0..count)
                .map(|i| Kline::new("BTCUSDT", Interval::OneMinute, i * MINUTE).with_closed(true))
                .collect(),
            requests: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn requests(&self) -> Vec<(i64, i64, usize)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl ExchangeFeed for HistoryFeed {
    async fn get_page(
        &self,
        key: &SeriesKey,
        from: i64,
        to: i64,
        max_count: usize,
    ) -> Result<Vec<Kline>, SyncError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push((from, to, max_count));
        if self.fail {
            return Err(SyncError::feed("rate limited"));
        }
        Ok(self
            .history
            .iter()
            .filter(|k| k.belongs_to(key) && k.open_time >= from && k.open_time <= to)
            .take(max_count)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// backfill
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backfill_pages_until_a_short_page() {
    let manager = SeriesManager::in_memory(config(100)).expect("valid config");
    let feed = HistoryFeed::with_minutes(250);

    let report = manager
        .backfill(&btc(), &feed, 0, 1_000 * MINUTE)
        .await
        .expect("backfill");

    assert_eq!(report.pages, 3);
    assert_eq!(report.points, 250);
    assert_eq!(report.last_serial, 250);
    assert_eq!(manager.replica(&btc()).len(), 250);

    let starts: Vec<i64> = feed.requests().iter().map(|r| r.0).collect();
    assert_eq!(starts, vec![0, 100 * MINUTE, 200 * MINUTE]);
}

#[tokio::test]
async fn backfill_of_exact_multiple_ends_on_empty_page() {
    let manager = SeriesManager::in_memory(config(50)).expect("valid config");
    let feed = HistoryFeed::with_minutes(100);

    let report = manager
        .backfill(&btc(), &feed, 0, 1_000 * MINUTE)
        .await
        .expect("backfill");
    assert_eq!(report.pages, 3);
    assert_eq!(report.points, 100);
}

#[tokio::test]
async fn backfill_respects_the_upper_bound() {
    let manager = SeriesManager::in_memory(config(1_000)).expect("valid config");
    let feed = HistoryFeed::with_minutes(100);

    let report = manager
        .backfill(&btc(), &feed, 10 * MINUTE, 19 * MINUTE)
        .await
        .expect("backfill");
    assert_eq!(report.points, 10);
    let replica = manager.replica(&btc());
    assert_eq!(replica.get_all().first().map(|k| k.open_time), Some(10 * MINUTE));
    assert_eq!(replica.last().map(|k| k.open_time), Some(19 * MINUTE));
}

#[tokio::test]
async fn feed_failure_aborts_the_backfill() {
    let manager = SeriesManager::in_memory(config(10)).expect("valid config");
    let mut feed = HistoryFeed::with_minutes(10);
    feed.fail = true;

    let result = manager.backfill(&btc(), &feed, 0, MINUTE).await;
    assert_eq!(result, Err(SyncError::feed("rate limited")));
    assert!(manager.replica(&btc()).is_empty());
}

/// Answers every request with the same full page of old history.
struct RepeatingFeed {
    page: Vec<Kline>,
}

#[async_trait]
impl ExchangeFeed for RepeatingFeed {
    async fn get_page(
        &self,
        _key: &SeriesKey,
        _from: i64,
        _to: i64,
        _max_count: usize,
    ) -> Result<Vec<Kline>, SyncError> {
        Ok(self.page.clone())
    }
}

#[tokio::test]
async fn backfill_stops_when_the_feed_does_not_advance() {
    let manager = SeriesManager::in_memory(config(10)).expect("valid config");
    let feed = RepeatingFeed {
        page: (0..10)
            .map(|i| Kline::new("BTCUSDT", Interval::OneMinute, i * MINUTE))
            .collect(),
    };

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        manager.backfill(&btc(), &feed, 0, 1_000 * MINUTE),
    )
    .await
    .expect("backfill terminated")
    .expect("backfill");
    assert_eq!(report.pages, 2);
    assert_eq!(manager.replica(&btc()).len(), 10);
}

#[tokio::test]
async fn page_of_foreign_points_does_not_move_the_cursor() {
    let manager = SeriesManager::in_memory(config(5)).expect("valid config");
    let feed = RepeatingFeed {
        page: (0..5)
            .map(|i| Kline::new("ETHUSDT", Interval::OneMinute, (100 + i) * MINUTE))
            .collect(),
    };

    let report = manager
        .backfill(&btc(), &feed, 0, 1_000 * MINUTE)
        .await
        .expect("backfill");
    assert_eq!(report.pages, 1);
    assert_eq!(report.points, 0);
    assert!(manager.replica(&btc()).is_empty());
}

// ---------------------------------------------------------------------------
// pump
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscription_feeds_the_kline_pipeline() {
    let manager = SeriesManager::in_memory(config(10)).expect("valid config");
    let (sender, receiver) = mpsc::channel(16);
    let pump = manager.subscribe(&btc(), receiver);

    for event_time in 1..=20 {
        let kline = Kline::new("BTCUSDT", Interval::OneMinute, 0).with_event_time(event_time);
        sender.send(kline).await.expect("pump alive");
    }
    drop(sender);

    let forwarded = tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .expect("pump finished")
        .expect("pump task");
    assert_eq!(forwarded, 20);

    let replica = manager.replica(&btc());
    tokio::time::timeout(Duration::from_secs(5), async {
        while replica.try_get(0).map(|k| k.event_time) != Some(20) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("latest revision replicated");
}

#[tokio::test]
async fn pump_stops_on_shutdown() {
    let manager = SeriesManager::in_memory(config(10)).expect("valid config");
    let (_sender, receiver) = mpsc::channel::<Kline>(4);
    let pump = manager.subscribe(&btc(), receiver);

    manager.shutdown();
    let forwarded = tokio::time::timeout(Duration::from_secs(1), pump)
        .await
        .expect("pump finished")
        .expect("pump task");
    assert_eq!(forwarded, 0);
}
