//! Market data collaborator and the per-tick snapshot handed to the agents

pub mod indicators;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::Position;
use crate::precision::to_f64;
use crate::types::{Candle, Interval, Side, Trend};

/// Price and kline source
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<Decimal>;

    async fn klines(&self, symbol: &str, interval: Interval, count: usize) -> Result<Vec<Candle>>;
}

/// Candles fetched per interval when building a snapshot
pub const SNAPSHOT_CANDLES: usize = 100;

/// Market context for one position at one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub side: Side,
    pub current_price: f64,
    pub entry_price: f64,
    pub breakeven: f64,
    /// Percent distance of price from breakeven (absolute)
    pub distance_from_be: f64,

    pub price_change_1m: f64,
    pub price_change_5m: f64,
    pub price_change_15m: f64,

    pub rsi14: f64,
    pub macd: f64,
    pub ema20: f64,
    pub ema50: f64,
    pub bollinger_upper: f64,
    pub bollinger_lower: f64,
    pub atr14: f64,

    pub volume_ratio: f64,

    pub trend_5m: Trend,
    pub trend_15m: Trend,
    pub trend_1h: Trend,
    /// 0..=100, from ADX
    pub trend_strength: f64,
    pub adx: f64,

    pub nearest_support: f64,
    pub nearest_resistance: f64,
}

impl MarketSnapshot {
    /// Fetch klines and compute the indicator set for `position`
    pub async fn build(market: &dyn MarketData, position: &Position, price: Decimal) -> Result<Self> {
        let symbol = position.symbol.as_str();
        let (m1, m5, m15, h1) = tokio::join!(
            market.klines(symbol, Interval::Min1, SNAPSHOT_CANDLES),
            market.klines(symbol, Interval::Min5, SNAPSHOT_CANDLES),
            market.klines(symbol, Interval::Min15, SNAPSHOT_CANDLES),
            market.klines(symbol, Interval::Hour1, SNAPSHOT_CANDLES),
        );
        let m1 = m1.with_context(|| format!("1m klines for {}", symbol))?;
        let m5 = m5.with_context(|| format!("5m klines for {}", symbol))?;
        let m15 = m15.with_context(|| format!("15m klines for {}", symbol))?;
        let h1 = h1.with_context(|| format!("1h klines for {}", symbol))?;

        Ok(Self::from_candles(position, to_f64(price), &m1, &m5, &m15, &h1))
    }

    /// Pure indicator pass; missing indicators fall back to neutral values
    pub fn from_candles(
        position: &Position,
        price: f64,
        m1: &[Candle],
        m5: &[Candle],
        m15: &[Candle],
        h1: &[Candle],
    ) -> Self {
        use indicators::*;

        let breakeven = to_f64(position.ledger.current_breakeven);
        let distance_from_be = if breakeven > 0.0 {
            (price - breakeven).abs() / breakeven * 100.0
        } else {
            0.0
        };
        let (bb_upper, _, bb_lower) = bollinger(m5, 20, 2.0).unwrap_or((price, price, price));
        let (support, resistance) = support_resistance(m15, 50).unwrap_or((price, price));
        let adx_value = adx(m15, 14).unwrap_or(0.0);

        Self {
            symbol: position.symbol.clone(),
            side: position.side,
            current_price: price,
            entry_price: to_f64(position.entry_price),
            breakeven,
            distance_from_be,
            price_change_1m: price_change_pct(m1, 1).unwrap_or(0.0),
            price_change_5m: price_change_pct(m5, 1).unwrap_or(0.0),
            price_change_15m: price_change_pct(m15, 1).unwrap_or(0.0),
            rsi14: rsi_wilders(m5, 14).unwrap_or(50.0),
            macd: macd(m5).unwrap_or(0.0),
            ema20: ema(m5, 20).unwrap_or(price),
            ema50: ema(m5, 50).unwrap_or(price),
            bollinger_upper: bb_upper,
            bollinger_lower: bb_lower,
            atr14: atr(m5, 14).unwrap_or(0.0),
            volume_ratio: relative_volume(m5, 20).unwrap_or(1.0),
            trend_5m: trend(m5),
            trend_15m: trend(m15),
            trend_1h: trend(h1),
            trend_strength: adx_value.clamp(0.0, 100.0),
            adx: adx_value,
            nearest_support: support,
            nearest_resistance: resistance,
        }
    }

    /// Neutral snapshot used when klines are unavailable
    pub fn neutral(position: &Position, price: f64) -> Self {
        Self::from_candles(position, price, &[], &[], &[], &[])
    }
}
