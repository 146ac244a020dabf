//! Example demonstrating paged backfill from an exchange feed
//!
//! This example shows how to:
//! 1. Implement `ExchangeFeed` over a synthetic price history
//! 2. Backfill a day of one-minute klines in pages
//! 3. Declare consumer demand and trim the replica to it
//! 4. Resolve a single missing candle with `get_or_backfill`

use async_trait::async_trait;
use klinecache_rs::prelude::*;
use tracing::info;

fn setup_logger() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();
}

/// Deterministic random-walk history ending at `now`.
struct SyntheticFeed {
    now: i64,
}

impl SyntheticFeed {
    fn price_at(open_time: i64) -> f64 {
        let minute = (open_time / 60_000) as f64;
        30_000.0 + (minute / 17.0).sin() * 250.0 + (minute / 3.0).cos() * 40.0
    }
}

#[async_trait]
impl ExchangeFeed for SyntheticFeed {
    async fn get_page(
        &self,
        key: &SeriesKey,
        from: i64,
        to: i64,
        max_count: usize,
    ) -> Result<Vec<Kline>, SyncError> {
        let step = key.interval.duration_ms();
        let mut open_time = key.interval.align(from);
        let mut page = Vec::with_capacity(max_count);
        while open_time <= to.min(self.now) && page.len() < max_count {
            let open = Self::price_at(open_time);
            let close = Self::price_at(open_time + step);
            page.push(
                Kline::new(key.symbol.clone(), key.interval, open_time)
                    .with_prices(open, open.max(close) + 5.0, open.min(close) - 5.0, close)
                    .with_volume(12.0, 12.0 * close)
                    .with_trade_count(340)
                    .with_closed(open_time + step <= self.now),
            );
            open_time += step;
        }
        Ok(page)
    }
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    setup_logger();
    info!("=== Backfill Demo ===\n");

    let manager = SeriesManager::in_memory(SyncConfig::default().with_backfill_page_size(500))?;
    let key = SeriesKey::new("ETHUSDT", Interval::OneMinute);
    let now = current_time_millis();
    let feed = SyntheticFeed { now };

    info!("Step 1: Backfilling the last 24 hours");
    let report = manager
        .backfill(&key, &feed, now - 24 * 3_600_000, now)
        .await?;
    info!(
        "  pages={} points={} last_serial={}",
        report.pages, report.points, report.last_serial
    );

    let replica = manager.replica(&key);
    info!("  replica holds {} klines", replica.len());

    info!("\nStep 2: Declaring demand for 120 periods and trimming");
    manager.declare_demand("chart", &key, 120)?;
    let trimmed = replica.trim();
    info!("  trimmed {trimmed}, kept {}", replica.len());

    info!("\nStep 3: Fetching an evicted candle on demand");
    let old = now - 6 * 3_600_000;
    let kline = replica.get_or_backfill(old, &feed).await?;
    info!(
        "  {} open={:.2} close={:.2} closed={}",
        kline.open_time, kline.open, kline.close, kline.is_closed
    );

    manager.shutdown();
    Ok(())
}
