//! Topic keys and payload shapes used by the trading dashboard
//!
//! Topic keys are plain strings on the wire. These helpers keep their format
//! in one place:
//!
//! | Key                          | Payload          |
//! |------------------------------|------------------|
//! | `kline:{SYMBOL}`             | [`Kline`]        |
//! | `kline:{interval}:{SYMBOL}`  | [`Kline`]        |
//! | `books{depth}:{SYMBOL}`      | [`OrderBook`]    |
//! | `state:{profile}:{SYMBOL}`   | opaque JSON      |
//!
//! Intervals are upper-cased on the hour unit for the wire ("1h" -> "1H");
//! minute and day units pass through unchanged.

use serde::{Deserialize, Serialize};

/// Latest candle for a symbol, default interval
pub fn kline(symbol: &str) -> String {
    format!("kline:{}", symbol.to_uppercase())
}

/// Candles for a symbol at a given interval ("30m", "1h", "4h", ...)
pub fn kline_interval(symbol: &str, interval: &str) -> String {
    format!("kline:{}:{}", normalize_interval(interval), symbol.to_uppercase())
}

/// Order book snapshots at the given depth (5, 15, 50)
pub fn order_book(symbol: &str, depth: u16) -> String {
    format!("books{}:{}", depth, symbol.to_uppercase())
}

/// Live trading-state updates for one symbol under one profile
pub fn trading_state(profile_code: &str, symbol: &str) -> String {
    format!("state:{}:{}", profile_code, symbol.to_uppercase())
}

/// "1h" -> "1H", "4h" -> "4H", "30m" -> "30m"
pub fn normalize_interval(interval: &str) -> String {
    match interval.strip_suffix('h') {
        Some(count) => format!("{}H", count),
        None => interval.to_string(),
    }
}

/// "1H" -> "1h", "30m" -> "30m"
pub fn denormalize_interval(interval: &str) -> String {
    match interval.strip_suffix('H') {
        Some(count) => format!("{}h", count),
        None => interval.to_string(),
    }
}

/// One candlestick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    pub symbol: String,
    #[serde(default)]
    pub interval: Option<String>,
    /// Candle open time, epoch milliseconds
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Kline {
    /// Interval in dashboard notation ("1h" rather than the wire's "1H")
    pub fn display_interval(&self) -> Option<String> {
        self.interval.as_deref().map(denormalize_interval)
    }
}

/// Price/quantity ladder snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    /// `[price, quantity]`, best first
    #[serde(default)]
    pub bids: Vec<[f64; 2]>,
    #[serde(default)]
    pub asks: Vec<[f64; 2]>,
    pub timestamp: i64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|level| level[0])
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|level| level[0])
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }
}
