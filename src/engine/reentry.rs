//! Re-entry scheduler
//!
//! Buys back part of a sold tranche once price returns to the pre-sell breakeven band.

use chrono::Duration;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::ladder::through_market;
use super::{PositionEngine, Tick, TickEvent};
use crate::config::MAX_REENTRY_TIMEOUT_SECS;
use crate::error::EngineResult;
use crate::ledger::{CycleOutcome, Position, ReentryState};
use crate::precision::{to_decimal, to_f64};
use crate::types::{OrderRequest, Side};

/// Inclusive re-entry band around `target`
pub fn reentry_band(target: Decimal, buffer_pct: f64) -> (Decimal, Decimal) {
    let buffer = to_decimal(buffer_pct) / Decimal::ONE_HUNDRED;
    (target * (Decimal::ONE - buffer), target * (Decimal::ONE + buffer))
}

impl PositionEngine {
    pub(crate) async fn evaluate_reentry(&self, position: &mut Position, tick: &mut Tick) -> EngineResult<()> {
        let Some(cycle) = position.ledger.current_cycle() else {
            debug!(symbol = %position.symbol, "No active cycle");
            return Ok(());
        };
        if cycle.reentry_state != ReentryState::Waiting {
            return Ok(());
        }

        let cycle_number = cycle.cycle_number;
        let (lower, upper) = reentry_band(cycle.reentry_target_price, tick.config.reentry_price_buffer);
        let in_band = tick.price >= lower && tick.price <= upper;

        if !in_band {
            let waited = tick.now - cycle.start_time;
            if waited > Duration::seconds(tick.config.reentry_timeout_secs.min(MAX_REENTRY_TIMEOUT_SECS) as i64) {
                info!(
                    symbol = %position.symbol,
                    cycle = cycle_number,
                    waited_secs = waited.num_seconds(),
                    price = %tick.price,
                    target = %cycle.reentry_target_price,
                    "⏱️ Re-entry timed out"
                );
                self.skip_reentry(position, "timeout", tick);
            }
            return Ok(());
        }

        let mut quantity = cycle.reentry_quantity;

        if tick.config.use_ai_decisions {
            if let Some(decision) = self.consult(position, tick).await {
                if let Some(reentry) = decision.reentry {
                    if !reentry.should_reenter {
                        info!(
                            symbol = %position.symbol,
                            cycle = cycle_number,
                            confidence = reentry.confidence,
                            reasoning = %reentry.reasoning,
                            "Agents declined re-entry"
                        );
                        if let Some(c) = position.ledger.current_cycle_mut() {
                            c.ai_decision = Some(reentry);
                        }
                        self.skip_reentry(position, "ai_decision", tick);
                        return Ok(());
                    }
                    let fraction = reentry.recommended_qty_pct;
                    if fraction > 0.0 && fraction < 1.0 {
                        quantity *= to_decimal(fraction);
                        debug!(symbol = %position.symbol, fraction, quantity = %quantity, "Re-entry scaled");
                    }
                    if let Some(c) = position.ledger.current_cycle_mut() {
                        c.ai_decision = Some(reentry);
                    }
                }
            }
        }

        let rules = position.rules.clone();
        let quantity = rules.round_quantity(quantity);
        let notional = to_f64(quantity * tick.price);
        if !rules.is_tradable(quantity) || notional < tick.config.min_position_size_usd {
            info!(
                symbol = %position.symbol,
                cycle = cycle_number,
                quantity = %quantity,
                notional,
                min_qty = %rules.min_qty,
                "Re-entry below minimum size"
            );
            self.skip_reentry(position, "below_minimum_qty", tick);
            return Ok(());
        }

        let order_side = position.side.opening_order();
        let limit = through_market(position, order_side, tick.price);
        if let Some(c) = position.ledger.current_cycle_mut() {
            c.reentry_state = ReentryState::Executing;
        }

        let order = OrderRequest::limit(&position.symbol, order_side, quantity, limit);
        match self.execution.place_order(order).await {
            Ok(order_id) => {
                self.complete_reentry(position, quantity, &order_id, tick).await;
                Ok(())
            }
            Err(e) => {
                let max_attempts = tick.config.max_reentry_attempts;
                let mut exhausted = false;
                if let Some(c) = position.ledger.current_cycle_mut() {
                    c.reentry_attempts += 1;
                    if c.reentry_attempts >= max_attempts {
                        c.finish(ReentryState::Failed, CycleOutcome::Failed, e.to_string(), tick.now);
                        exhausted = true;
                    } else {
                        c.reentry_state = ReentryState::Waiting;
                    }
                }
                if exhausted {
                    position.ledger.next_tier_blocked = false;
                    position.ledger.total_cycles_completed += 1;
                    warn!(symbol = %position.symbol, cycle = cycle_number, error = %e, "Re-entry failed, giving up");
                    position.ledger.log_event(format!("re-entry {} failed: {}", cycle_number, e), tick.now);
                    tick.emit(TickEvent::ReentryFailed {
                        cycle: cycle_number,
                        reason: e.to_string(),
                    });
                } else {
                    warn!(symbol = %position.symbol, cycle = cycle_number, error = %e, "Re-entry order failed, will retry");
                    position.ledger.log_event(format!("re-entry {} attempt failed: {}", cycle_number, e), tick.now);
                    tick.dirty = true;
                }
                Err(e.into())
            }
        }
    }

    async fn complete_reentry(&self, position: &mut Position, quantity: Decimal, order_id: &str, tick: &mut Tick) {
        let now = tick.now;
        let price = tick.price;
        let mut cycle_number = 0;
        if let Some(c) = position.ledger.current_cycle_mut() {
            c.reentry_filled_price = price;
            c.reentry_filled_quantity = quantity;
            c.reentry_filled_time = Some(now);
            let outcome = CycleOutcome::from_pnl(c.sell_pnl);
            c.finish(ReentryState::Completed, outcome, "filled", now);
            cycle_number = c.cycle_number;
        }

        let ledger = &mut position.ledger;
        ledger.record_reentry_fill(quantity);
        ledger.next_tier_blocked = false;
        ledger.total_cycles_completed += 1;
        ledger.current_breakeven = ledger.recompute_breakeven(&position.rules);
        let breakeven = ledger.current_breakeven;
        ledger.log_event(
            format!("re-entry {} filled {} @ {} BE {}", cycle_number, quantity, price, breakeven),
            now,
        );
        self.budget.record_completed(now);

        info!(
            symbol = %position.symbol,
            cycle = cycle_number,
            quantity = %quantity,
            price = %price,
            breakeven = %breakeven,
            remaining = %position.ledger.remaining_quantity,
            order_id = %order_id,
            "🔄 Re-entry filled"
        );
        tick.emit(TickEvent::ReentryCompleted {
            cycle: cycle_number,
            quantity,
            price,
            breakeven,
        });

        self.refresh_protective_stop(position, tick).await;
    }

    /// Re-place the protective stop around the new breakeven; failures only log
    async fn refresh_protective_stop(&self, position: &mut Position, tick: &mut Tick) {
        let pct = to_decimal(tick.config.stop_loss_percent) / Decimal::ONE_HUNDRED;
        let breakeven = position.ledger.current_breakeven;
        let raw = match position.side {
            Side::Long => breakeven * (Decimal::ONE - pct),
            Side::Short => breakeven * (Decimal::ONE + pct),
        };
        let stop = position.rules.round_price_for_sl(raw, position.side);

        let order = OrderRequest::stop_market(
            &position.symbol,
            position.side.closing_order(),
            position.ledger.remaining_quantity,
            stop,
        );
        match self.execution.place_order(order).await {
            Ok(order_id) => {
                debug!(symbol = %position.symbol, stop = %stop, order_id = %order_id, "Protective stop refreshed");
                if let Some(old) = position.ledger.stop_order_id.replace(order_id) {
                    if let Err(e) = self.execution.cancel_order(&position.symbol, &old).await {
                        warn!(symbol = %position.symbol, order_id = %old, error = %e, "Failed to cancel previous stop");
                    }
                }
            }
            Err(e) => {
                // The previous stop stays live
                warn!(symbol = %position.symbol, stop = %stop, error = %e, "Protective stop refresh failed");
            }
        }
    }

    /// Resolve the pending cycle as SKIPPED and unblock the ladder
    pub(crate) fn skip_reentry(&self, position: &mut Position, reason: &str, tick: &mut Tick) {
        let mut cycle_number = 0;
        if let Some(c) = position.ledger.current_cycle_mut() {
            if c.reentry_state.is_terminal() {
                return;
            }
            c.finish(ReentryState::Skipped, CycleOutcome::Skipped, reason, tick.now);
            cycle_number = c.cycle_number;
        }
        let ledger = &mut position.ledger;
        ledger.next_tier_blocked = false;
        ledger.skipped_reentries += 1;
        ledger.total_cycles_completed += 1;
        ledger.log_event(format!("re-entry {} skipped: {}", cycle_number, reason), tick.now);
        self.budget.record_skipped(tick.now);
        tick.emit(TickEvent::ReentrySkipped {
            cycle: cycle_number,
            reason: reason.to_string(),
        });
    }
}
