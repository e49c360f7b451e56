//! Instrument precision rules
//!
//! Tick/step rounding on `Decimal` so tier thresholds, breakeven and order sizes
//! never drift the way repeated float multiplication does.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Exchange trading rules for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRules {
    pub symbol: String,
    /// Minimum price increment
    pub tick_size: Decimal,
    /// Minimum quantity increment
    pub step_size: Decimal,
    /// Minimum tradable quantity
    pub min_qty: Decimal,
}

impl InstrumentRules {
    pub fn new(symbol: &str, tick_size: Decimal, step_size: Decimal, min_qty: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            tick_size,
            step_size,
            min_qty,
        }
    }

    /// Built-in rules for common USDT perpetuals; unknown symbols get 2 price / 3 qty decimals
    pub fn for_symbol(symbol: &str) -> Self {
        let (price_dp, qty_dp) = match symbol.to_uppercase().as_str() {
            "BTCUSDT" | "ETHUSDT" => (2, 3),
            "BNBUSDT" | "LTCUSDT" => (2, 2),
            "SOLUSDT" | "AVAXUSDT" | "DOTUSDT" => (3, 0),
            "LINKUSDT" | "ATOMUSDT" => (3, 1),
            "XRPUSDT" => (4, 0),
            "UNIUSDT" | "NEARUSDT" => (4, 0),
            "DOGEUSDT" | "ADAUSDT" => (5, 0),
            _ => (2, 3),
        };
        let tick = Decimal::new(1, price_dp);
        let step = Decimal::new(1, qty_dp);
        Self::new(symbol, tick, step, step)
    }

    /// Round to the nearest tick
    pub fn round_price(&self, price: Decimal) -> Decimal {
        quantize(price, self.tick_size, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Round a take-profit target so it triggers no later than intended
    pub fn round_price_for_tp(&self, price: Decimal, side: Side) -> Decimal {
        let strategy = match side {
            Side::Long => RoundingStrategy::ToNegativeInfinity,
            Side::Short => RoundingStrategy::ToPositiveInfinity,
        };
        quantize(price, self.tick_size, strategy)
    }

    /// Round a stop so it sits on the protective side of the raw value
    pub fn round_price_for_sl(&self, price: Decimal, side: Side) -> Decimal {
        let strategy = match side {
            Side::Long => RoundingStrategy::ToPositiveInfinity,
            Side::Short => RoundingStrategy::ToNegativeInfinity,
        };
        quantize(price, self.tick_size, strategy)
    }

    /// Floor a quantity to the step size
    pub fn round_quantity(&self, qty: Decimal) -> Decimal {
        quantize(qty, self.step_size, RoundingStrategy::ToNegativeInfinity)
    }

    /// Whether `qty` can be sent as an order
    pub fn is_tradable(&self, qty: Decimal) -> bool {
        qty > Decimal::ZERO && qty >= self.min_qty
    }
}

fn quantize(value: Decimal, unit: Decimal, strategy: RoundingStrategy) -> Decimal {
    if unit <= Decimal::ZERO {
        return value;
    }
    ((value / unit).round_dp_with_strategy(0, strategy) * unit).normalize()
}

/// `value × pct / 100` with an integer percent
pub fn percent_of(value: Decimal, pct: u32) -> Decimal {
    value * Decimal::from(pct) / Decimal::ONE_HUNDRED
}

/// `value × pct / 100` with a fractional percent from configuration
pub fn fraction_of(value: Decimal, pct: f64) -> Decimal {
    value * to_decimal(pct) / Decimal::ONE_HUNDRED
}

/// Conversion at the f64/Decimal boundary (config, indicators).
/// Goes through the shortest decimal repr so `0.4` stays exactly `0.4`.
pub fn to_decimal(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
        .unwrap_or_default()
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}
