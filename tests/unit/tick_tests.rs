//! Integration tests for tick pipelines feeding the tick board.

use klinecache_rs::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hub_shares_one_pipeline_per_symbol() {
    let shutdown = CancellationToken::new();
    let config = SyncConfig::default().with_monitor_period(Duration::from_millis(20));
    let hub = ConflationHub::new(config, shutdown.clone());
    let board = Arc::new(TickBoard::new());

    let sink = || -> Arc<dyn ConflationSink<Tick>> { board.clone() };
    let first = hub.tick_pipeline("BTCUSDT", sink);
    let second = hub.tick_pipeline("BTCUSDT", sink);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(hub.pipeline_count(), (1, 0));

    for event_time in (1..=1_000).rev() {
        first.push(Tick::new("BTCUSDT", event_time as f64, 1.0, event_time));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while first.flushed() == 0 || first.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline drained");

    // Pushed newest first: the stale tail must not win.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(board.latest("BTCUSDT").map(|t| t.event_time), Some(1_000));
    assert!(hub.existing_tick_pipeline("ETHUSDT").is_none());
    shutdown.cancel();
}
