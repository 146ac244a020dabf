//! Integration tests for the series manager facade.

use klinecache_rs::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MINUTE: i64 = 60_000;

fn config() -> SyncConfig {
    SyncConfig::default()
        .with_long_poll_timeout(Duration::from_millis(200))
        .with_monitor_period(Duration::from_millis(20))
        .with_replication_retry_delay(Duration::from_millis(10))
        .with_seed_periods(0)
}

fn btc() -> SeriesKey {
    SeriesKey::new("BTCUSDT", Interval::OneMinute)
}

fn kline(open_time: i64, close: f64, event_time: i64) -> Kline {
    Kline::new("BTCUSDT", Interval::OneMinute, open_time)
        .with_prices(close, close, close, close)
        .with_event_time(event_time)
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Replicas
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replica_is_created_once_per_key() {
    let manager = SeriesManager::in_memory(config()).expect("valid config");
    let a = manager.replica(&btc());
    let b = manager.replica(&btc());
    assert!(Arc::ptr_eq(&a, &b));

    manager.replica(&SeriesKey::new("ETHUSDT", Interval::OneMinute));
    assert_eq!(manager.replica_keys().len(), 2);
    assert_eq!(manager.stores().len(), 2);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let result = SeriesManager::in_memory(config().with_monitor_period(Duration::ZERO));
    assert!(matches!(result, Err(SyncError::Config { .. })));
}

#[tokio::test]
async fn manager_seeds_new_stores_from_repository() {
    let repository = Arc::new(MemoryRepository::new());
    let now = Interval::OneMinute.align(current_time_millis());
    repository
        .set_points(&[kline(now - MINUTE, 1.0, 0), kline(now, 2.0, 0)])
        .await
        .expect("seed rows");

    let manager = SeriesManager::new(config().with_seed_periods(10), repository).expect("valid config");
    let replica = manager.replica(&btc());

    tokio::time::timeout(Duration::from_secs(5), replica.wait_for_serial(2))
        .await
        .expect("seeded points replicated");
    assert_eq!(replica.len(), 2);
}

// ---------------------------------------------------------------------------
// Conflation through the manager
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pushed_klines_reach_the_replica_and_the_repository() {
    let manager = SeriesManager::in_memory(config()).expect("valid config");

    for event_time in 1..=500 {
        manager.push_kline(kline(0, event_time as f64, event_time));
    }

    let replica = manager.replica(&btc());
    eventually(|| replica.try_get(0).map(|k| k.event_time) == Some(500)).await;

    let rows = manager
        .repository()
        .get_points(&btc(), 0, 0)
        .await
        .expect("read repository");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_time, 500);

    let pipeline = manager.kline_pipeline(&btc());
    assert_eq!(pipeline.pushed(), 500);
    assert!(pipeline.flushed() < 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pushed_ticks_update_the_board() {
    let manager = SeriesManager::in_memory(config()).expect("valid config");
    for event_time in 1..=100 {
        manager.push_tick(Tick::new("BTCUSDT", event_time as f64, 1.0, event_time));
    }
    manager.push_tick(Tick::new("ETHUSDT", 3_000.0, 1.0, 1));

    eventually(|| manager.latest_tick("BTCUSDT").map(|t| t.event_time) == Some(100)).await;
    eventually(|| manager.latest_tick("ETHUSDT").is_some()).await;
    assert_eq!(manager.tick_board().symbols(), vec!["BTCUSDT", "ETHUSDT"]);
}

#[tokio::test]
async fn demand_is_forwarded_to_the_source_store() {
    let manager = SeriesManager::in_memory(config()).expect("valid config");
    manager.declare_demand("chart", &btc(), 120).expect("store reachable");
    manager.declare_demand("signal", &btc(), 30).expect("store reachable");

    let store = manager.stores().store(&btc());
    assert_eq!(store.max_periods().await, Ok(120));
    assert_eq!(manager.replica(&btc()).max_local_periods(), 120);
}

#[tokio::test]
async fn shutdown_stops_background_tasks() {
    let manager = SeriesManager::in_memory(config()).expect("valid config");
    let replica = manager.replica(&btc());
    let store = manager.stores().store(&btc());

    manager.shutdown();
    assert!(manager.is_shut_down());
    assert!(replica.is_stopped());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.is_closed());
}
