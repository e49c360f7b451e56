//! Exchange-fill reconciliation
//!
//! A venue position well below the tracked remainder means a resting order filled on the
//! exchange side. The difference is booked as the next tier's sell.

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{PositionEngine, Tick, TickEvent};
use crate::config::TierLadder;
use crate::error::EngineResult;
use crate::ledger::{CycleOutcome, Position, ReentryCycle};

/// Venue quantity below this share of the tracked remainder counts as a fill
const FILL_THRESHOLD_PCT: u32 = 95;

impl PositionEngine {
    /// Returns true when the position turned out to be fully closed
    pub(crate) async fn reconcile(&self, position: &mut Position, tick: &mut Tick) -> EngineResult<bool> {
        let tracked = position.remaining_quantity();
        let Some(actual) = self
            .execution
            .position_quantity(&position.symbol, position.side)
            .await?
        else {
            return Ok(false);
        };

        let threshold = tracked * Decimal::from(FILL_THRESHOLD_PCT) / Decimal::ONE_HUNDRED;
        if tracked <= Decimal::ZERO || actual >= threshold {
            return Ok(false);
        }

        let filled = tracked - actual;
        let pnl = position.side.pnl(position.entry_price, tick.price, filled);
        warn!(
            symbol = %position.symbol,
            tracked = %tracked,
            actual = %actual,
            filled = %filled,
            "Venue position below tracked quantity"
        );

        // A pending buy-back is moot once the venue moved the position
        if position.ledger.is_waiting_for_reentry() {
            self.skip_reentry(position, "exchange_fill", tick);
        }

        if actual <= Decimal::ZERO {
            let ledger = &mut position.ledger;
            let tier = ledger.next_tier().min(TierLadder::FINAL_TIER);
            let mut cycle = ReentryCycle::from_sell(
                ledger.next_cycle_number(),
                tier,
                position.side,
                tick.price,
                filled,
                pnl,
                tick.now,
            );
            cycle.close_without_reentry(
                CycleOutcome::FullCloseExchange,
                CycleOutcome::FullCloseExchange.to_string(),
                tick.now,
            );
            ledger.push_cycle(cycle);
            ledger.total_cycles_completed += 1;
            ledger.record_sell(filled, pnl);
            tick.emit(TickEvent::ExchangeFill {
                tier,
                quantity: filled,
            });
            self.close_position(position, CycleOutcome::FullCloseExchange.to_string(), tick)
                .await;
            if let Some(learner) = &self.learner {
                learner.record_position(position, tick.price, tick.now);
            }
            return Ok(true);
        }

        if position.ledger.final_tranche_active {
            // Partial fill of the trailing slice
            let ledger = &mut position.ledger;
            let mut cycle = ReentryCycle::from_sell(
                ledger.next_cycle_number(),
                TierLadder::FINAL_TIER,
                position.side,
                tick.price,
                filled,
                pnl,
                tick.now,
            );
            cycle.close_without_reentry(CycleOutcome::from_pnl(pnl), "exchange_fill", tick.now);
            ledger.push_cycle(cycle);
            ledger.total_cycles_completed += 1;
            ledger.record_sell(filled, pnl);
            ledger.final_tranche_quantity = ledger.remaining_quantity;
            ledger.log_event(format!("venue reduced final tranche by {}", filled), tick.now);
            tick.emit(TickEvent::ExchangeFill {
                tier: TierLadder::FINAL_TIER,
                quantity: filled,
            });
            return Ok(false);
        }

        let tier = position.ledger.next_tier();
        info!(symbol = %position.symbol, tier, filled = %filled, "Booking venue fill as tier sell");
        self.book_tier_sell(position, tier, filled, pnl, false, tick).await;
        tick.emit(TickEvent::ExchangeFill {
            tier,
            quantity: filled,
        });
        Ok(!position.is_open())
    }
}
