//! Example demonstrating long-poll replication between replicas
//!
//! This example shows how to:
//! 1. Start two replicas of the same series inside one manager
//! 2. Write klines through one replica
//! 3. Watch the other replica catch up through the source store
//! 4. Compare checksums of both replicas against the store snapshot

use klinecache_rs::prelude::*;
use std::time::Duration;
use tracing::info;

fn setup_logger() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    setup_logger();
    info!("=== Replication Demo ===\n");

    let config = SyncConfig::default()
        .with_long_poll_timeout(Duration::from_secs(2))
        .with_seed_periods(0);
    let manager = SeriesManager::in_memory(config)?;
    let key = SeriesKey::new("BTCUSDT", Interval::OneMinute);

    // The manager keeps one replica per key; the second one shares the same store.
    let writer = manager.replica(&key);
    let reader = ReplicaCache::start(
        key.clone(),
        manager.stores().clone(),
        manager.repository().clone(),
        tokio_util::sync::CancellationToken::new(),
    );

    info!("Step 1: Writing 60 one-minute klines through the writer");
    let start = Interval::OneMinute.align(current_time_millis()) - 59 * 60_000;
    let mut last_serial = 0;
    for i in 0..60 {
        let open_time = start + i * 60_000;
        let price = 42_000.0 + (i as f64) * 3.5;
        let kline = Kline::new("BTCUSDT", Interval::OneMinute, open_time)
            .with_prices(price, price + 10.0, price - 10.0, price + 2.0)
            .with_volume(1.5, price * 1.5)
            .with_closed(i < 59);
        last_serial = writer.set(kline).await?;
    }
    info!("  last serial assigned: {last_serial}");

    info!("\nStep 2: Waiting for the reader to catch up");
    reader.wait_for_serial(last_serial).await;
    let cursor = reader.cursor();
    info!("  reader cursor: version={} serial={}", cursor.version, cursor.serial);

    info!("\nStep 3: Comparing checksums");
    let store = manager.stores().store(&key).snapshot();
    info!("  store : {}", store.items_checksum()?);
    info!("  writer: {}", writer.checksum()?);
    info!("  reader: {}", reader.checksum()?);

    let window = reader.get_window(current_time_millis(), 5);
    info!("\nLast {} klines seen by the reader:", window.len());
    for kline in &window {
        info!(
            "  open_time={} close={:.2} closed={}",
            kline.open_time, kline.close, kline.is_closed
        );
    }

    reader.stop();
    manager.shutdown();
    Ok(())
}
