//! Paper venue
//!
//! In-memory market data + execution. Marketable orders fill at the current price;
//! non-marketable limits and stop orders rest until cancelled (stops are never triggered
//! here, the engine's own controllers close the final tranche).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info, warn};

use super::Execution;
use crate::error::ExchangeError;
use crate::market::MarketData;
use crate::precision::{to_decimal, to_f64};
use crate::types::{Candle, Interval, OrderRequest, OrderSide, OrderType, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperOrderStatus {
    Filled,
    Resting,
    Cancelled,
}

/// Order as recorded by the paper venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperOrder {
    pub id: String,
    pub request: OrderRequest,
    pub status: PaperOrderStatus,
    pub fill_price: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PaperMarket {
    price: Decimal,
    candles: VecDeque<Candle>,
    /// Signed net quantity (long > 0)
    net_position: Decimal,
}

pub struct PaperExchange {
    markets: RwLock<HashMap<String, PaperMarket>>,
    orders: RwLock<Vec<PaperOrder>>,
    /// Remaining forced rejections per symbol
    reject_next: RwLock<HashMap<String, u32>>,
    max_candles: usize,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            markets: RwLock::new(HashMap::new()),
            orders: RwLock::new(Vec::new()),
            reject_next: RwLock::new(HashMap::new()),
            max_candles: 500,
        }
    }

    /// Update the price and append a one-tick candle
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let Ok(mut markets) = self.markets.write() else {
            return;
        };
        let market = markets.entry(symbol.to_string()).or_default();
        let close = to_f64(price);
        let open = market.candles.back().map(|c| c.close).unwrap_or(close);
        let open_time = market.candles.back().map(|c| c.close_time).unwrap_or(0);
        market.candles.push_back(Candle {
            open_time,
            close_time: open_time + 60_000,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1000.0,
        });
        while market.candles.len() > self.max_candles {
            market.candles.pop_front();
        }
        market.price = price;
    }

    /// Replace the candle history (tests, warm-up)
    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        if let Ok(mut markets) = self.markets.write() {
            let market = markets.entry(symbol.to_string()).or_default();
            market.candles = candles.into_iter().collect();
        }
    }

    /// Simulate a position change the engine did not initiate (exchange-side TP fill)
    pub fn force_position(&self, symbol: &str, net: Decimal) {
        if let Ok(mut markets) = self.markets.write() {
            markets.entry(symbol.to_string()).or_default().net_position = net;
        }
    }

    /// Reject the next `count` orders for `symbol`
    pub fn reject_next(&self, symbol: &str, count: u32) {
        if let Ok(mut rejects) = self.reject_next.write() {
            rejects.insert(symbol.to_string(), count);
        }
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.orders.read().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn filled_orders(&self, symbol: &str) -> Vec<PaperOrder> {
        self.orders()
            .into_iter()
            .filter(|o| o.request.symbol == symbol && o.status == PaperOrderStatus::Filled)
            .collect()
    }

    pub fn net_position(&self, symbol: &str) -> Decimal {
        self.markets
            .read()
            .ok()
            .and_then(|m| m.get(symbol).map(|m| m.net_position))
            .unwrap_or_default()
    }

    fn take_rejection(&self, symbol: &str) -> bool {
        let Ok(mut rejects) = self.reject_next.write() else {
            return false;
        };
        match rejects.get_mut(symbol) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn is_marketable(order: &OrderRequest, price: Decimal) -> bool {
        match (order.order_type, order.price) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Some(limit)) => match order.side {
                OrderSide::Buy => limit >= price,
                OrderSide::Sell => limit <= price,
            },
            _ => false,
        }
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Execution for PaperExchange {
    async fn place_order(&self, order: OrderRequest) -> Result<String, ExchangeError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "quantity {} must be positive",
                order.quantity
            )));
        }
        if self.take_rejection(&order.symbol) {
            warn!(symbol = %order.symbol, side = %order.side, "[PAPER] Forced rejection");
            return Err(ExchangeError::Rejected("paper venue rejection".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut markets = self
            .markets
            .write()
            .map_err(|_| ExchangeError::Network("paper venue lock poisoned".to_string()))?;
        let market = markets
            .get_mut(&order.symbol)
            .filter(|m| m.price > Decimal::ZERO)
            .ok_or_else(|| ExchangeError::NoPrice(order.symbol.clone()))?;

        let (status, fill_price) = if Self::is_marketable(&order, market.price) {
            let signed = match order.side {
                OrderSide::Buy => order.quantity,
                OrderSide::Sell => -order.quantity,
            };
            market.net_position += signed;
            (PaperOrderStatus::Filled, Some(market.price))
        } else {
            (PaperOrderStatus::Resting, None)
        };
        drop(markets);

        debug!(
            order_id = %id,
            symbol = %order.symbol,
            side = %order.side,
            order_type = %order.order_type,
            qty = %order.quantity,
            status = ?status,
            "[PAPER] Order placed"
        );

        if let Ok(mut orders) = self.orders.write() {
            orders.push(PaperOrder {
                id: id.clone(),
                request: order,
                status,
                fill_price,
                placed_at: Utc::now(),
            });
        }
        Ok(id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| ExchangeError::Network("paper venue lock poisoned".to_string()))?;
        let order = orders
            .iter_mut()
            .find(|o| o.id == order_id && o.request.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownOrder(order_id.to_string()))?;
        if order.status == PaperOrderStatus::Resting {
            order.status = PaperOrderStatus::Cancelled;
        }
        Ok(())
    }

    async fn position_quantity(&self, symbol: &str, side: Side) -> Result<Option<Decimal>, ExchangeError> {
        let net = self.net_position(symbol);
        let qty = match side {
            Side::Long => net.max(Decimal::ZERO),
            Side::Short => (-net).max(Decimal::ZERO),
        };
        Ok(Some(qty))
    }
}

#[async_trait]
impl MarketData for PaperExchange {
    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        let markets = self
            .markets
            .read()
            .map_err(|_| anyhow!("paper venue lock poisoned"))?;
        markets
            .get(symbol)
            .map(|m| m.price)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| anyhow!("no price for {}", symbol))
    }

    /// Every interval is served from the same one-tick candle series
    async fn klines(&self, symbol: &str, _interval: Interval, count: usize) -> Result<Vec<Candle>> {
        let markets = self
            .markets
            .read()
            .map_err(|_| anyhow!("paper venue lock poisoned"))?;
        let candles = markets
            .get(symbol)
            .map(|m| {
                let skip = m.candles.len().saturating_sub(count);
                m.candles.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default();
        Ok(candles)
    }
}

#[derive(Debug, Deserialize)]
struct PricePathRecord {
    price: f64,
}

/// Load a replay path from a CSV with a `price` column
pub fn load_price_path(path: &Path) -> Result<Vec<Decimal>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open price path {}", path.display()))?;
    let mut prices = Vec::new();
    for record in reader.deserialize::<PricePathRecord>() {
        let record = record.context("Malformed price path row")?;
        prices.push(to_decimal(record.price));
    }
    info!(path = %path.display(), points = prices.len(), "Loaded price path");
    Ok(prices)
}

/// Seeded Gaussian-ish random walk (sum of uniforms), `volatility_pct` per step
pub struct RandomWalk {
    rng: StdRng,
    price: f64,
    volatility_pct: f64,
}

impl RandomWalk {
    pub fn new(start: f64, volatility_pct: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            price: start,
            volatility_pct,
        }
    }
}

impl Iterator for RandomWalk {
    type Item = Decimal;

    fn next(&mut self) -> Option<Decimal> {
        let shock: f64 = (0..4).map(|_| self.rng.gen_range(-1.0..1.0)).sum::<f64>() / 2.0;
        self.price *= 1.0 + shock * self.volatility_pct / 100.0;
        Some(to_decimal((self.price * 1e6).round() / 1e6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_marketable_limit_fills_at_market() {
        let venue = PaperExchange::new();
        venue.set_price("BTCUSDT", dec!(100));

        let id = venue
            .place_order(OrderRequest::limit("BTCUSDT", OrderSide::Buy, dec!(2), dec!(100.05)))
            .await
            .unwrap();
        let fills = venue.filled_orders("BTCUSDT");
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].id, id);
        assert_eq!(fills[0].fill_price, Some(dec!(100)));
        assert_eq!(venue.net_position("BTCUSDT"), dec!(2));
    }

    #[tokio::test]
    async fn test_stop_rests_and_cancels() {
        let venue = PaperExchange::new();
        venue.set_price("BTCUSDT", dec!(100));
        let id = venue
            .place_order(OrderRequest::stop_market("BTCUSDT", OrderSide::Sell, dec!(1), dec!(99)))
            .await
            .unwrap();
        venue.cancel_order("BTCUSDT", &id).await.unwrap();
        assert_eq!(venue.orders()[0].status, PaperOrderStatus::Cancelled);
        assert_eq!(venue.net_position("BTCUSDT"), dec!(0));
        assert!(venue.cancel_order("BTCUSDT", "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_forced_rejection_counts_down() {
        let venue = PaperExchange::new();
        venue.set_price("ETHUSDT", dec!(2000));
        venue.reject_next("ETHUSDT", 1);
        let order = OrderRequest::market("ETHUSDT", OrderSide::Sell, dec!(1));
        assert!(venue.place_order(order.clone()).await.is_err());
        assert!(venue.place_order(order).await.is_ok());
        assert_eq!(
            venue.position_quantity("ETHUSDT", Side::Short).await.unwrap(),
            Some(dec!(1))
        );
    }

    #[tokio::test]
    async fn test_klines_return_tail() {
        let venue = PaperExchange::new();
        for p in [dec!(100), dec!(101), dec!(102)] {
            venue.set_price("BTCUSDT", p);
        }
        let candles = venue.klines("BTCUSDT", Interval::Min5, 2).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 102.0);
        assert!(venue.current_price("SOLUSDT").await.is_err());
    }

    #[test]
    fn test_random_walk_is_seeded() {
        let a: Vec<Decimal> = RandomWalk::new(100.0, 0.1, 42).take(5).collect();
        let b: Vec<Decimal> = RandomWalk::new(100.0, 0.1, 42).take(5).collect();
        assert_eq!(a, b);
    }
}
