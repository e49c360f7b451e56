//! Final tranche trailing exit

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{PositionEngine, Tick, TickEvent};
use crate::error::EngineResult;
use crate::ledger::{CycleOutcome, Position, ReentryCycle};
use crate::types::{OrderRequest, Side};

pub fn trailing_stop(side: Side, peak: Decimal, trailing_pct: Decimal) -> Decimal {
    let pct = trailing_pct / Decimal::ONE_HUNDRED;
    match side {
        Side::Long => peak * (Decimal::ONE - pct),
        Side::Short => peak * (Decimal::ONE + pct),
    }
}

fn breached(side: Side, price: Decimal, stop: Decimal) -> bool {
    match side {
        Side::Long => price <= stop,
        Side::Short => price >= stop,
    }
}

impl PositionEngine {
    /// Returns true when the final tranche was closed
    pub(crate) async fn trail_final_tranche(&self, position: &mut Position, tick: &mut Tick) -> EngineResult<bool> {
        let side = position.side;
        let price = tick.price;

        if side.is_better(price, position.ledger.trailing_peak) {
            position.ledger.trailing_peak = price;
            tick.dirty = true;
        }

        let stop = trailing_stop(side, position.ledger.trailing_peak, position.ledger.trailing_percent);
        let dynamic = position.ledger.dynamic_stop_price;
        let reason = if dynamic > Decimal::ZERO && breached(side, price, dynamic) {
            "dynamic_sl"
        } else if breached(side, price, stop) {
            "trailing_stop"
        } else {
            return Ok(false);
        };

        let rules = position.rules.clone();
        let mut quantity = rules.round_quantity(position.ledger.final_tranche_quantity);
        if !rules.is_tradable(quantity) {
            let whole = rules.round_quantity(position.ledger.remaining_quantity);
            if rules.is_tradable(whole) {
                quantity = whole;
            } else {
                let reason = format!(
                    "Final tranche quantity {} is below minimum tradeable {}. Cannot execute {} exit. Please close manually.",
                    position.ledger.remaining_quantity, rules.min_qty, reason
                );
                self.raise_manual_intervention(position, reason, tick);
                return Ok(false);
            }
        }

        let order = OrderRequest::market(&position.symbol, side.closing_order(), quantity).reduce_only();
        let order_id = self.execution.place_order(order).await?;

        let pnl = side.pnl(position.entry_price, price, quantity);
        let ledger = &mut position.ledger;
        let mut cycle = ReentryCycle::from_sell(
            ledger.next_cycle_number(),
            ledger.tp_level_unlocked,
            side,
            price,
            quantity,
            pnl,
            tick.now,
        );
        cycle.close_without_reentry(CycleOutcome::from_pnl(pnl), reason, tick.now);
        ledger.push_cycle(cycle);
        ledger.total_cycles_completed += 1;
        ledger.record_sell(quantity, pnl);

        info!(
            symbol = %position.symbol,
            reason,
            quantity = %quantity,
            price = %price,
            peak = %position.ledger.trailing_peak,
            pnl = %pnl,
            total_profit = %position.ledger.accumulated_profit,
            order_id = %order_id,
            "🏁 Final tranche exited"
        );
        tick.emit(TickEvent::FinalExit {
            reason: reason.to_string(),
            quantity,
            price,
        });
        self.close_position(position, reason.to_string(), tick).await;

        if let Some(learner) = &self.learner {
            learner.record_position(position, price, tick.now);
            if let Err(e) = learner.save_state().await {
                warn!(error = %e, "Failed to save learning state");
            }
        }
        Ok(true)
    }
}
