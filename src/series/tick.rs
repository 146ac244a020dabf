//! Latest-tick board

use super::conflation::ConflationSink;
use super::error::SyncError;
use super::point::Tick;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

/// In-process cache of the most recent tick per symbol.
///
/// Fed by tick conflation pipelines. A flush carrying an older event time
/// than the tick already held is ignored.
#[derive(Debug, Default)]
pub struct TickBoard {
    ticks: DashMap<String, Tick>,
}

impl TickBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest tick of `symbol`.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<Tick> {
        self.ticks.get(symbol).map(|tick| tick.clone())
    }

    /// Symbols that received at least one tick.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.ticks.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Number of symbols on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Whether the board is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Stores `tick` unless a newer one is already held. Returns whether it
    /// was stored.
    pub fn update(&self, tick: Tick) -> bool {
        let mut entry = self.ticks.entry(tick.symbol.clone()).or_insert_with(|| tick.clone());
        if entry.event_time > tick.event_time {
            return false;
        }
        trace!(symbol = %tick.symbol, price = tick.price, "tick stored");
        *entry = tick;
        true
    }
}

#[async_trait]
impl ConflationSink<Tick> for TickBoard {
    async fn flush(&self, value: Tick) -> Result<(), SyncError> {
        self.update(value);
        Ok(())
    }
}
