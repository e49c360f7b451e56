//! Technical indicators over candle slices
//!
//! Stateless: each call recomputes from the slice it is given. All return `None`
//! when there are not enough candles.

use crate::types::{Candle, Trend};

/// RSI with Wilder smoothing, seeded by a simple average of the first `period` changes
pub fn rsi_wilders(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = candles[i].close - candles[i - 1].close;
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    let p = period as f64;
    for i in (period + 1)..candles.len() {
        let change = candles[i].close - candles[i - 1].close;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    if avg_loss < 1e-12 && avg_gain < 1e-12 {
        return Some(50.0); // No movement = neutral
    }
    if avg_loss < 1e-12 {
        return Some(99.0);
    }
    if avg_gain < 1e-12 {
        return Some(1.0);
    }
    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - (100.0 / (1.0 + rs));
    Some(rsi.clamp(1.0, 99.0)) // Clamp to avoid exact 0/100
}

/// Exponential moving average of closes
pub fn ema(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = candles[0].close;
    for c in candles.iter().skip(1) {
        ema = (c.close - ema) * multiplier + ema;
    }
    Some(ema)
}

/// MACD line (EMA12 - EMA26)
pub fn macd(candles: &[Candle]) -> Option<f64> {
    Some(ema(candles, 12)? - ema(candles, 26)?)
}

/// Bollinger Bands (upper, middle, lower)
pub fn bollinger(candles: &[Candle], period: usize, multiplier: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let recent: Vec<f64> = candles.iter().rev().take(period).map(|c| c.close).collect();
    let sma = recent.iter().sum::<f64>() / period as f64;
    let variance: f64 = recent.iter().map(|p| (p - sma).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();

    Some((sma + multiplier * std, sma, sma - multiplier * std))
}

/// Average True Range over the last `period` candles
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut total = 0.0;
    for i in 1..=period {
        let idx = candles.len() - i;
        total += true_range(&candles[idx], &candles[idx - 1]);
    }
    Some(total / period as f64)
}

fn true_range(curr: &Candle, prev: &Candle) -> f64 {
    (curr.high - curr.low)
        .max((curr.high - prev.close).abs())
        .max((curr.low - prev.close).abs())
}

/// ADX with Wilder-smoothed directional movement
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period * 2 + 1 {
        return None;
    }

    let start = candles.len() - period * 2;
    let mut plus_dm = Vec::with_capacity(period * 2);
    let mut minus_dm = Vec::with_capacity(period * 2);
    let mut tr = Vec::with_capacity(period * 2);

    for i in (start + 1)..candles.len() {
        let curr = &candles[i];
        let prev = &candles[i - 1];
        let up_move = curr.high - prev.high;
        let down_move = prev.low - curr.low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        tr.push(true_range(curr, prev));
    }

    let p = period as f64;
    let mut s_plus = plus_dm.iter().take(period).sum::<f64>();
    let mut s_minus = minus_dm.iter().take(period).sum::<f64>();
    let mut s_tr = tr.iter().take(period).sum::<f64>();

    let mut dx_values = Vec::new();
    for i in period..tr.len() {
        s_plus = s_plus - s_plus / p + plus_dm[i];
        s_minus = s_minus - s_minus / p + minus_dm[i];
        s_tr = s_tr - s_tr / p + tr[i];
        if s_tr == 0.0 {
            continue;
        }
        let plus_di = 100.0 * s_plus / s_tr;
        let minus_di = 100.0 * s_minus / s_tr;
        let di_sum = plus_di + minus_di;
        if di_sum > 0.0 {
            dx_values.push(100.0 * (plus_di - minus_di).abs() / di_sum);
        }
    }

    if dx_values.is_empty() {
        return None;
    }
    Some(dx_values.iter().sum::<f64>() / dx_values.len() as f64)
}

/// Current volume / average of the previous `period` volumes
pub fn relative_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let current_volume = candles.last()?.volume;
    let avg_volume: f64 = candles
        .iter()
        .rev()
        .skip(1)
        .take(period)
        .map(|c| c.volume)
        .sum::<f64>()
        / period as f64;

    if avg_volume > 0.0 {
        Some(current_volume / avg_volume)
    } else {
        None
    }
}

/// Percent change of the close over the last `lookback` candles
pub fn price_change_pct(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }
    let last = candles.last()?.close;
    let base = candles[candles.len() - 1 - lookback].close;
    if base == 0.0 {
        return None;
    }
    Some((last - base) / base * 100.0)
}

/// EMA20 vs EMA50 with a 0.05% dead band
pub fn trend(candles: &[Candle]) -> Trend {
    let (Some(fast), Some(slow)) = (ema(candles, 20), ema(candles, 50)) else {
        return Trend::Neutral;
    };
    if slow == 0.0 {
        return Trend::Neutral;
    }
    let spread = (fast - slow) / slow * 100.0;
    if spread > 0.05 {
        Trend::Bullish
    } else if spread < -0.05 {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

/// Lowest low and highest high of the `lookback` candles before the current one
pub fn support_resistance(candles: &[Candle], lookback: usize) -> Option<(f64, f64)> {
    if candles.len() < 2 {
        return None;
    }
    let window = candles.iter().rev().skip(1).take(lookback);
    let (mut low, mut high) = (f64::MAX, f64::MIN);
    for c in window {
        low = low.min(c.low);
        high = high.max(c.high);
    }
    if low == f64::MAX {
        return None;
    }
    Some((low, high))
}
