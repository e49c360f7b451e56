//! Core types used throughout TrancheBot
//!
//! Defines position sides, order shapes and candles shared by the engine and its collaborators.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Futures position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Default for Side {
    fn default() -> Self {
        Side::Long
    }
}

impl Side {
    /// Order side that reduces this position
    pub fn closing_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// Order side that adds to this position
    pub fn opening_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Signed PnL for moving from `entry` to `exit` with `qty` units
    pub fn pnl(&self, entry: Decimal, exit: Decimal, qty: Decimal) -> Decimal {
        match self {
            Side::Long => (exit - entry) * qty,
            Side::Short => (entry - exit) * qty,
        }
    }

    /// True when `a` is more favorable than `b` for this side
    pub fn is_better(&self, a: Decimal, b: Decimal) -> bool {
        match self {
            Side::Long => a > b,
            Side::Short => a < b,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LONG" | "BUY" => Some(Side::Long),
            "SHORT" | "SELL" => Some(Side::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    /// `price` carries the trigger
    StopMarket,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopMarket => write!(f, "STOP_MARKET"),
        }
    }
}

/// Order submitted to the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            reduce_only: false,
        }
    }

    pub fn stop_market(symbol: &str, side: OrderSide, quantity: Decimal, trigger: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::StopMarket,
            quantity,
            price: Some(trigger),
            reduce_only: true,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Kline interval requested from market data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Min1,
    Min5,
    Min15,
    Hour1,
}

impl Interval {
    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Interval::Min1 => 60,
            Interval::Min5 => 5 * 60,
            Interval::Min15 => 15 * 60,
            Interval::Hour1 => 60 * 60,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" => Some(Interval::Min1),
            "5m" => Some(Interval::Min5),
            "15m" => Some(Interval::Min15),
            "1h" => Some(Interval::Hour1),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Min1 => write!(f, "1m"),
            Interval::Min5 => write!(f, "5m"),
            Interval::Min15 => write!(f, "15m"),
            Interval::Hour1 => write!(f, "1h"),
        }
    }
}

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Coarse trend label used by the agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Default for Trend {
    fn default() -> Self {
        Trend::Neutral
    }
}

impl Trend {
    /// Whether this trend points in the position's favor
    pub fn favors(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (Trend::Bullish, Side::Long) | (Trend::Bearish, Side::Short)
        )
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}
