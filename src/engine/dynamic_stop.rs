//! Dynamic profit-protecting stop for the final tranche

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{PositionEngine, Tick, TickEvent};
use crate::error::EngineResult;
use crate::ledger::Position;
use crate::precision::percent_of;
use crate::types::{OrderRequest, Side};

/// Unrounded stop that risks `max_loss_pct` of total profit; `None` when nothing is at stake
pub fn stop_candidate(position: &Position, price: Decimal, max_loss_pct: u32) -> Option<Decimal> {
    let ledger = &position.ledger;
    let remaining = ledger.remaining_quantity;
    if remaining <= Decimal::ZERO {
        return None;
    }
    let unrealized = position.side.pnl(position.entry_price, price, remaining);
    let total = ledger.accumulated_profit + unrealized;
    if total <= Decimal::ZERO {
        return None;
    }
    let per_unit = percent_of(total, max_loss_pct) / remaining;

    let mut candidate = match position.side {
        Side::Long => price - per_unit,
        Side::Short => price + per_unit,
    };
    if ledger.accumulated_profit > Decimal::ZERO {
        candidate = match position.side {
            Side::Long => candidate.max(position.entry_price),
            Side::Short => candidate.min(position.entry_price),
        };
    }
    Some(candidate)
}

/// A stop only makes sense on the losing side of the current price
fn below_price(side: Side, stop: Decimal, price: Decimal) -> bool {
    side.is_better(price, stop)
}

impl PositionEngine {
    /// Risk agent's recommendation when it is confident enough
    pub(crate) async fn ai_stop_candidate(&self, position: &Position, tick: &Tick) -> Option<Decimal> {
        if !tick.config.ai_dynamic_sl {
            return None;
        }
        let decision = self.consult(position, tick).await?;
        let risk = decision.risk?;
        if risk.confidence < tick.config.ai_min_confidence {
            return None;
        }
        Some(risk.recommended_stop)
    }

    /// Tighten-only stop update; publishes a replacement STOP_MARKET when it moves
    pub(crate) async fn update_dynamic_stop(
        &self,
        position: &mut Position,
        tick: &mut Tick,
        ai_stop: Option<Decimal>,
    ) -> EngineResult<()> {
        let side = position.side;
        let price = tick.price;
        let remaining = position.ledger.remaining_quantity;
        if position.ledger.needs_manual_intervention || !position.rules.is_tradable(remaining) {
            debug!(symbol = %position.symbol, remaining = %remaining, "Untradeable remainder, leaving stop as is");
            return Ok(());
        }
        let Some(mut candidate) = stop_candidate(position, price, tick.config.dynamic_sl_max_loss_pct) else {
            return Ok(());
        };

        if let Some(ai) = ai_stop {
            if below_price(side, ai, price) && side.is_better(ai, candidate) {
                debug!(symbol = %position.symbol, ai_stop = %ai, candidate = %candidate, "Using tighter agent stop");
                candidate = ai;
            }
        }

        let stop = position.rules.round_price_for_sl(candidate, side);
        if !below_price(side, stop, price) {
            return Ok(());
        }
        let current = position.ledger.dynamic_stop_price;
        if current > Decimal::ZERO && !side.is_better(stop, current) {
            return Ok(());
        }

        // Replacement goes in before the old stop comes out
        let order = OrderRequest::stop_market(&position.symbol, side.closing_order(), remaining, stop);
        let order_id = self.execution.place_order(order).await?;
        if let Some(old) = position.ledger.stop_order_id.take() {
            if let Err(e) = self.execution.cancel_order(&position.symbol, &old).await {
                warn!(symbol = %position.symbol, order_id = %old, error = %e, "Failed to cancel previous stop");
            }
        }

        let unrealized = side.pnl(position.entry_price, price, remaining);
        let total = position.ledger.accumulated_profit + unrealized;
        let ledger = &mut position.ledger;
        ledger.dynamic_stop_price = stop;
        ledger.stop_order_id = Some(order_id);
        ledger.protected_profit = percent_of(total, tick.config.dynamic_sl_protect_pct);
        ledger.max_allowable_loss = percent_of(total, tick.config.dynamic_sl_max_loss_pct);
        ledger.log_event(format!("dynamic stop {} -> {}", current, stop), tick.now);

        info!(
            symbol = %position.symbol,
            previous = %current,
            stop = %stop,
            price = %price,
            protected = %position.ledger.protected_profit,
            "🛡️ Dynamic stop tightened"
        );
        tick.emit(TickEvent::StopUpdated { price: stop });
        Ok(())
    }
}
