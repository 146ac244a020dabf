/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 14/10/26
******************************************************************************/

//! Time-series units: klines, ticks and the keys that address them.

use super::error::SyncError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Kline interval, serialized with the exchange short code (`"1m"`, `"4h"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    /// One minute
    #[serde(rename = "1m")]
    OneMinute,
    /// Three minutes
    #[serde(rename = "3m")]
    ThreeMinutes,
    /// Five minutes
    #[serde(rename = "5m")]
    FiveMinutes,
    /// Fifteen minutes
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// Thirty minutes
    #[serde(rename = "30m")]
    ThirtyMinutes,
    /// One hour
    #[serde(rename = "1h")]
    OneHour,
    /// Two hours
    #[serde(rename = "2h")]
    TwoHours,
    /// Four hours
    #[serde(rename = "4h")]
    FourHours,
    /// Six hours
    #[serde(rename = "6h")]
    SixHours,
    /// Eight hours
    #[serde(rename = "8h")]
    EightHours,
    /// Twelve hours
    #[serde(rename = "12h")]
    TwelveHours,
    /// One day
    #[serde(rename = "1d")]
    OneDay,
    /// Three days
    #[serde(rename = "3d")]
    ThreeDays,
    /// One week
    #[serde(rename = "1w")]
    OneWeek,
}

impl Interval {
    /// All supported intervals, shortest first.
    pub const ALL: [Interval; 14] = [
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
    ];

    /// Length of one interval in milliseconds.
    #[must_use]
    #[inline]
    pub fn duration_ms(self) -> i64 {
        match self {
            Interval::OneMinute => MINUTE_MS,
            Interval::ThreeMinutes => 3 * MINUTE_MS,
            Interval::FiveMinutes => 5 * MINUTE_MS,
            Interval::FifteenMinutes => 15 * MINUTE_MS,
            Interval::ThirtyMinutes => 30 * MINUTE_MS,
            Interval::OneHour => HOUR_MS,
            Interval::TwoHours => 2 * HOUR_MS,
            Interval::FourHours => 4 * HOUR_MS,
            Interval::SixHours => 6 * HOUR_MS,
            Interval::EightHours => 8 * HOUR_MS,
            Interval::TwelveHours => 12 * HOUR_MS,
            Interval::OneDay => DAY_MS,
            Interval::ThreeDays => 3 * DAY_MS,
            Interval::OneWeek => 7 * DAY_MS,
        }
    }

    /// Exchange short code for this interval.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::ThreeDays => "3d",
            Interval::OneWeek => "1w",
        }
    }

    /// Aligns a timestamp to the open time of the interval containing it.
    ///
    /// Alignment is against multiples of the interval length since the Unix
    /// epoch.
    #[must_use]
    #[inline]
    pub fn align(self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.duration_ms())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Interval {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .iter()
            .copied()
            .find(|interval| interval.code() == s)
            .ok_or_else(|| SyncError::InvalidInterval(s.to_string()))
    }
}

/// Address of one time series: a symbol at one interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Trading symbol, e.g. `BTCUSDT`
    pub symbol: String,
    /// Kline interval
    pub interval: Interval,
}

impl SeriesKey {
    /// Create a new key.
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Identity of a kline. Never changes across revisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KlineId {
    /// Trading symbol
    pub symbol: String,
    /// Kline interval
    pub interval: Interval,
    /// Open time in milliseconds since epoch
    pub open_time: i64,
}

impl Ord for KlineId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.symbol
            .cmp(&other.symbol)
            .then(self.interval.cmp(&other.interval))
            .then(self.open_time.cmp(&other.open_time))
    }
}

impl PartialOrd for KlineId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Anything carrying an exchange event time, in milliseconds since epoch.
pub trait EventTimed {
    /// Exchange event time of this value.
    fn event_time(&self) -> i64;
}

/// One candlestick revision.
///
/// `(symbol, interval, open_time)` is the identity; every other field may be
/// superseded by a newer revision with the same identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Trading symbol
    pub symbol: String,
    /// Kline interval
    pub interval: Interval,
    /// Open time in milliseconds since epoch
    pub open_time: i64,
    /// Close time in milliseconds since epoch (inclusive)
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
    /// Number of trades
    pub trade_count: u64,
    /// Time the exchange emitted this revision
    pub event_time: i64,
    /// Whether the interval has finished
    pub is_closed: bool,
}

impl Kline {
    /// Creates an empty, open kline for the interval that starts at `open_time`.
    ///
    /// `open_time` is aligned down to the interval boundary.
    pub fn new(symbol: impl Into<String>, interval: Interval, open_time: i64) -> Self {
        let open_time = interval.align(open_time);
        Self {
            symbol: symbol.into(),
            interval,
            open_time,
            close_time: open_time + interval.duration_ms() - 1,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
            quote_volume: 0.0,
            trade_count: 0,
            event_time: open_time,
            is_closed: false,
        }
    }

    /// Sets the OHLC prices.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_prices(mut self, open: f64, high: f64, low: f64, close: f64) -> Self {
        self.open = open;
        self.high = high;
        self.low = low;
        self.close = close;
        self
    }

    /// Sets base and quote volume.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_volume(mut self, volume: f64, quote_volume: f64) -> Self {
        self.volume = volume;
        self.quote_volume = quote_volume;
        self
    }

    /// Sets the trade count.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_trade_count(mut self, trade_count: u64) -> Self {
        self.trade_count = trade_count;
        self
    }

    /// Sets the event time.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_event_time(mut self, event_time: i64) -> Self {
        self.event_time = event_time;
        self
    }

    /// Marks the kline closed or open.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_closed(mut self, is_closed: bool) -> Self {
        self.is_closed = is_closed;
        self
    }

    /// Identity of this kline.
    #[must_use]
    pub fn id(&self) -> KlineId {
        KlineId {
            symbol: self.symbol.clone(),
            interval: self.interval,
            open_time: self.open_time,
        }
    }

    /// The series this kline belongs to.
    #[must_use]
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.symbol.clone(), self.interval)
    }

    /// Whether this kline belongs to `key`.
    #[must_use]
    #[inline]
    pub fn belongs_to(&self, key: &SeriesKey) -> bool {
        self.interval == key.interval && self.symbol == key.symbol
    }

    /// Identity comparer: true when both revisions describe the same candle,
    /// regardless of their mutable fields.
    #[must_use]
    #[inline]
    pub fn same_identity(&self, other: &Kline) -> bool {
        self.open_time == other.open_time
            && self.interval == other.interval
            && self.symbol == other.symbol
    }

    /// Ordering comparer by open time.
    #[must_use]
    #[inline]
    pub fn cmp_open_time(a: &Kline, b: &Kline) -> Ordering {
        a.open_time.cmp(&b.open_time)
    }
}

impl EventTimed for Kline {
    #[inline]
    fn event_time(&self) -> i64 {
        self.event_time
    }
}

/// Latest traded price for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Trading symbol
    pub symbol: String,
    /// Last traded price
    pub price: f64,
    /// Last traded quantity
    pub quantity: f64,
    /// Time the exchange emitted this tick
    pub event_time: i64,
}

impl Tick {
    /// Create a new tick.
    pub fn new(symbol: impl Into<String>, price: f64, quantity: f64, event_time: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            quantity,
            event_time,
        }
    }
}

impl EventTimed for Tick {
    #[inline]
    fn event_time(&self) -> i64 {
        self.event_time
    }
}
