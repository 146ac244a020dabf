//! Example demonstrating burst conflation and consumer supervision
//!
//! This example shows how to:
//! 1. Push a burst of ticks faster than the sink can absorb them
//! 2. Observe that only a handful of flushes reach the sink
//! 3. Watch the supervisor replace a consumer whose sink panics

use async_trait::async_trait;
use klinecache_rs::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn setup_logger() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();
}

/// A slow sink that panics on its second flush.
struct SlowSink {
    calls: AtomicU64,
    last_price: AtomicU64,
}

#[async_trait]
impl ConflationSink<Tick> for SlowSink {
    async fn flush(&self, value: Tick) -> Result<(), SyncError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        if call == 1 {
            panic!("simulated downstream crash");
        }
        self.last_price.store(value.price.to_bits(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    setup_logger();
    info!("=== Conflation Demo ===\n");

    let shutdown = CancellationToken::new();
    let config = SyncConfig::default().with_monitor_period(Duration::from_millis(100));
    let sink = Arc::new(SlowSink {
        calls: AtomicU64::new(0),
        last_price: AtomicU64::new(0),
    });
    let pipeline = ConflationPipeline::<Tick>::spawn(
        "tick:BTCUSDT",
        sink.clone(),
        ConflationAggregate::latest(),
        &config,
        shutdown.clone(),
    );

    let mut faults = pipeline.subscribe_faults();
    tokio::spawn(async move {
        while let Ok(fault) = faults.recv().await {
            warn!(
                "Fault on {}: {} (restart #{})",
                fault.key, fault.message, fault.restarts
            );
        }
    });

    info!("Step 1: Pushing 100,000 ticks in three bursts");
    let started = Instant::now();
    let mut event_time = 0;
    for burst in 0..3 {
        for _ in 0..100_000 / 3 {
            event_time += 1;
            pipeline.push(Tick::new("BTCUSDT", 42_000.0 + event_time as f64 * 0.01, 0.1, event_time));
        }
        info!("  burst {burst} queued, pending={}", pipeline.pending());
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    info!("\nStep 2: Waiting for the pipeline to settle");
    tokio::time::sleep(Duration::from_millis(500)).await;

    info!("\nResults after {:?}:", started.elapsed());
    info!("  pushed   : {}", pipeline.pushed());
    info!("  flushed  : {}", pipeline.flushed());
    info!("  restarts : {}", pipeline.restarts());
    info!(
        "  sink price: {:.2} (latest pushed {:.2})",
        f64::from_bits(sink.last_price.load(Ordering::SeqCst)),
        42_000.0 + event_time as f64 * 0.01
    );

    shutdown.cancel();
}
