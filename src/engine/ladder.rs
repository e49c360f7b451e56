//! TP ladder: tier detection and tranche sells

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use super::{PositionEngine, Tick, TickEvent};
use crate::config::{PositionOptimizationConfig, TierLadder};
use crate::error::{EngineError, EngineResult};
use crate::exchange::LIMIT_OFFSET_BPS;
use crate::ledger::{CycleOutcome, Position, ReentryCycle, ReentryState};
use crate::precision::{percent_of, to_decimal};
use crate::types::{OrderRequest, OrderSide, Side};

/// Rounded TP price for `tier`; floors for LONG, ceils for SHORT
pub fn tier_price(position: &Position, ladder: &TierLadder, tier: u8) -> Option<Decimal> {
    let spec = ladder.tier(tier)?;
    let pct = to_decimal(spec.profit_percent) / Decimal::ONE_HUNDRED;
    let raw = match position.side {
        Side::Long => position.entry_price * (Decimal::ONE + pct),
        Side::Short => position.entry_price * (Decimal::ONE - pct),
    };
    Some(position.rules.round_price_for_tp(raw, position.side))
}

pub fn check_tier(position: &Position, ladder: &TierLadder, price: Decimal, tier: u8) -> bool {
    match tier_price(position, ladder, tier) {
        Some(tp) => match position.side {
            Side::Long => price >= tp,
            Side::Short => price <= tp,
        },
        None => false,
    }
}

/// Price a limit order `LIMIT_OFFSET_BPS` through the market
pub(crate) fn through_market(position: &Position, side: OrderSide, price: Decimal) -> Decimal {
    let offset = Decimal::new(LIMIT_OFFSET_BPS, 4);
    let raw = match side {
        OrderSide::Buy => price * (Decimal::ONE + offset),
        OrderSide::Sell => price * (Decimal::ONE - offset),
    };
    position.rules.round_price(raw)
}

impl PositionEngine {
    /// Sell the tranche for `tier` and book it
    pub(crate) async fn advance_tier(&self, position: &mut Position, tier: u8, tick: &mut Tick) -> EngineResult<()> {
        let spec = *tick.config.ladder.tier(tier).ok_or(EngineError::InvalidTier(tier))?;
        let rules = position.rules.clone();
        let remaining = position.remaining_quantity();

        let mut quantity = rules.round_quantity(percent_of(remaining, spec.sell_percent));
        let mut full_close = false;
        if !rules.is_tradable(quantity) {
            let whole = rules.round_quantity(remaining);
            if rules.is_tradable(whole) {
                info!(
                    symbol = %position.symbol,
                    tier,
                    planned = %quantity,
                    whole = %whole,
                    "Tier quantity below minimum, closing whole position"
                );
                quantity = whole;
                full_close = true;
            } else {
                let reason = format!(
                    "Position quantity {} is below minimum tradeable {}. Cannot execute TP{} sell. Please close manually.",
                    remaining, rules.min_qty, tier
                );
                self.raise_manual_intervention(position, reason, tick);
                return Ok(());
            }
        }
        if quantity >= remaining {
            full_close = true;
        }

        let order_side = position.side.closing_order();
        let limit = through_market(position, order_side, tick.price);
        let order = OrderRequest::limit(&position.symbol, order_side, quantity, limit).reduce_only();
        let order_id = self.execution.place_order(order).await?;

        let pnl = position.side.pnl(position.entry_price, tick.price, quantity);
        info!(
            symbol = %position.symbol,
            side = %position.side,
            tier,
            quantity = %quantity,
            price = %tick.price,
            pnl = %pnl,
            order_id = %order_id,
            "🎯 TP tier hit"
        );

        self.book_tier_sell(position, tier, quantity, pnl, full_close, tick).await;
        tick.emit(TickEvent::TierAdvanced {
            tier,
            quantity,
            price: tick.price,
        });
        Ok(())
    }

    /// Ledger side of a tier sell, shared with exchange-fill reconciliation
    pub(crate) async fn book_tier_sell(
        &self,
        position: &mut Position,
        tier: u8,
        quantity: Decimal,
        pnl: Decimal,
        full_close: bool,
        tick: &mut Tick,
    ) {
        let now = tick.now;
        let price = tick.price;
        let side = position.side;
        let config = Arc::clone(&tick.config);

        position.ledger.record_sell(quantity, pnl);
        position.ledger.tp_level_unlocked = position.ledger.tp_level_unlocked.max(tier);

        let cycle_number = position.ledger.next_cycle_number();
        let mut cycle = ReentryCycle::from_sell(cycle_number, tier, side, price, quantity, pnl, now);

        if full_close || position.ledger.remaining_quantity <= Decimal::ZERO {
            cycle.close_without_reentry(
                CycleOutcome::FullCloseSmallPosition,
                CycleOutcome::FullCloseSmallPosition.to_string(),
                now,
            );
            position.ledger.push_cycle(cycle);
            position.ledger.total_cycles_completed += 1;
            self.close_position(position, CycleOutcome::FullCloseSmallPosition.to_string(), tick)
                .await;
            return;
        }

        if tier < TierLadder::FINAL_TIER {
            self.schedule_reentry(position, cycle, &config, tick);
        } else {
            cycle.close_without_reentry(CycleOutcome::from_pnl(pnl), "final_tier", now);
            position.ledger.push_cycle(cycle);
            position.ledger.total_cycles_completed += 1;
            self.activate_final_tranche(position, &config, price, now);
        }
        position.ledger.log_event(
            format!("TP{} sold {} @ {} (pnl {})", tier, quantity, price, pnl),
            now,
        );
    }

    fn schedule_reentry(
        &self,
        position: &mut Position,
        mut cycle: ReentryCycle,
        config: &PositionOptimizationConfig,
        tick: &mut Tick,
    ) {
        let now = tick.now;
        match self.budget.check(cycle.cycle_number, config, now) {
            Ok(()) => {
                cycle.reentry_state = ReentryState::Waiting;
                cycle.reentry_target_price = position.rules.round_price(position.ledger.current_breakeven);
                cycle.reentry_quantity = percent_of(cycle.sell_quantity, config.reentry_percent);
                let (number, target, quantity) =
                    (cycle.cycle_number, cycle.reentry_target_price, cycle.reentry_quantity);
                position.ledger.push_cycle(cycle);
                position.ledger.next_tier_blocked = true;
                self.budget.record_scheduled(now);
                info!(
                    symbol = %position.symbol,
                    cycle = number,
                    target = %target,
                    quantity = %quantity,
                    "Re-entry scheduled"
                );
                tick.emit(TickEvent::ReentryScheduled {
                    cycle: number,
                    target,
                    quantity,
                });
            }
            Err(denial) => {
                warn!(symbol = %position.symbol, cycle = cycle.cycle_number, "{}", denial);
                let number = cycle.cycle_number;
                cycle.finish(ReentryState::Skipped, CycleOutcome::Skipped, denial.reason(), now);
                position.ledger.push_cycle(cycle);
                position.ledger.skipped_reentries += 1;
                position.ledger.total_cycles_completed += 1;
                self.budget.record_skipped(now);
                tick.emit(TickEvent::ReentrySkipped {
                    cycle: number,
                    reason: denial.reason().to_string(),
                });
            }
        }
    }

    fn activate_final_tranche(
        &self,
        position: &mut Position,
        config: &PositionOptimizationConfig,
        price: Decimal,
        now: DateTime<Utc>,
    ) {
        let ledger = &mut position.ledger;
        ledger.final_tranche_active = true;
        ledger.final_tranche_quantity = ledger.remaining_quantity;
        ledger.trailing_peak = price;
        ledger.trailing_percent = to_decimal(config.final_trailing_percent);

        ledger.dynamic_stop_active = true;
        ledger.protected_profit = percent_of(ledger.accumulated_profit, config.dynamic_sl_protect_pct);
        ledger.max_allowable_loss = percent_of(ledger.accumulated_profit, config.dynamic_sl_max_loss_pct);

        info!(
            symbol = %position.symbol,
            quantity = %ledger.final_tranche_quantity,
            peak = %price,
            trailing_pct = %ledger.trailing_percent,
            protected = %ledger.protected_profit,
            "Final tranche active"
        );
        ledger.log_event(
            format!(
                "final tranche {} trailing {}% protected {}",
                ledger.final_tranche_quantity, ledger.trailing_percent, ledger.protected_profit
            ),
            now,
        );
    }

    /// Disable the position and pull any resting protective stop
    pub(crate) async fn close_position(&self, position: &mut Position, reason: String, tick: &mut Tick) {
        if let Some(stop_id) = position.ledger.stop_order_id.take() {
            if let Err(e) = self.execution.cancel_order(&position.symbol, &stop_id).await {
                warn!(symbol = %position.symbol, order_id = %stop_id, error = %e, "Failed to cancel stop on close");
            }
        }
        position.ledger.close_out();
        position.ledger.log_event(format!("position closed: {}", reason), tick.now);
        info!(symbol = %position.symbol, reason = %reason, accumulated = %position.ledger.accumulated_profit, "✅ Position closed");
        tick.emit(TickEvent::PositionClosed { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::InstrumentRules;
    use rust_decimal_macros::dec;

    fn position(side: Side) -> Position {
        Position::open(
            "TESTUSDT",
            side,
            dec!(100),
            dec!(100),
            InstrumentRules::for_symbol("TESTUSDT"),
            Utc::now(),
        )
    }

    #[test]
    fn test_tier_prices_round_toward_entry() {
        let ladder = TierLadder::new((0.4, 30), (0.7, 50), (1.0, 80));
        let mut long = position(Side::Long);
        long.entry_price = dec!(100.013);
        // 100.4130 floors to 100.41
        assert_eq!(tier_price(&long, &ladder, 1), Some(dec!(100.41)));

        let mut short = position(Side::Short);
        short.entry_price = dec!(100.013);
        // 99.612 ceils to 99.62
        assert_eq!(tier_price(&short, &ladder, 1), Some(dec!(99.62)));
        assert_eq!(tier_price(&short, &ladder, 4), None);
    }

    #[test]
    fn test_check_tier_by_side() {
        let ladder = TierLadder::new((0.4, 30), (0.7, 50), (1.0, 80));
        assert!(check_tier(&position(Side::Long), &ladder, dec!(100.4), 1));
        assert!(!check_tier(&position(Side::Long), &ladder, dec!(100.39), 1));
        assert!(check_tier(&position(Side::Short), &ladder, dec!(99.6), 1));
        assert!(!check_tier(&position(Side::Short), &ladder, dec!(99.61), 1));
    }

    #[test]
    fn test_limit_goes_through_market() {
        let pos = position(Side::Long);
        assert_eq!(through_market(&pos, OrderSide::Sell, dec!(100)), dec!(99.95));
        assert_eq!(through_market(&pos, OrderSide::Buy, dec!(100)), dec!(100.05));
    }
}
