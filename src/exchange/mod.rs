//! Order execution collaborator

pub mod paper;

pub use paper::PaperExchange;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::types::{OrderRequest, Side};

/// Limit orders are priced this far through the market (0.05%)
pub const LIMIT_OFFSET_BPS: i64 = 5;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Execution: Send + Sync {
    /// Submit an order, returning the venue's order id
    async fn place_order(&self, order: OrderRequest) -> Result<String, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    /// Live position size on the venue, `None` if the venue cannot report it
    async fn position_quantity(&self, _symbol: &str, _side: Side) -> Result<Option<Decimal>, ExchangeError> {
        Ok(None)
    }
}
