//! Read-only status views for dashboards and logs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{CycleOutcome, Position, ReentryCycle, ReentryState};
use crate::types::Side;

/// Summary of one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStatus {
    pub cycle_number: u32,
    pub tp_level: u8,
    pub sell_price: Decimal,
    pub sell_quantity: Decimal,
    pub sell_pnl: Decimal,
    pub reentry_state: ReentryState,
    pub reentry_target_price: Decimal,
    pub reentry_filled_quantity: Decimal,
    pub outcome: Option<CycleOutcome>,
    pub outcome_reason: String,
}

impl From<&ReentryCycle> for CycleStatus {
    fn from(c: &ReentryCycle) -> Self {
        Self {
            cycle_number: c.cycle_number,
            tp_level: c.tp_level,
            sell_price: c.sell_price,
            sell_quantity: c.sell_quantity,
            sell_pnl: c.sell_pnl,
            reentry_state: c.reentry_state,
            reentry_target_price: c.reentry_target_price,
            reentry_filled_quantity: c.reentry_filled_quantity,
            outcome: c.outcome,
            outcome_reason: c.outcome_reason.clone(),
        }
    }
}

/// Snapshot of a position's ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStatus {
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub enabled: bool,
    pub entry_price: Decimal,
    pub breakeven: Decimal,
    pub remaining_quantity: Decimal,
    pub tp_level_unlocked: u8,
    pub next_tier_blocked: bool,
    pub accumulated_profit: Decimal,
    pub dynamic_stop_active: bool,
    pub dynamic_stop_price: Decimal,
    pub final_tranche_active: bool,
    pub trailing_peak: Decimal,
    pub current_cycle: Option<CycleStatus>,
    pub cycles: usize,
    pub successful_reentries: u32,
    pub skipped_reentries: u32,
    pub needs_manual_intervention: bool,
    pub manual_intervention_reason: String,
    pub manual_intervention_at: Option<DateTime<Utc>>,
    pub recent_events: Vec<String>,
}

impl LedgerStatus {
    pub fn from_position(position: &Position) -> Self {
        let ledger = &position.ledger;
        Self {
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            enabled: ledger.enabled,
            entry_price: position.entry_price,
            breakeven: ledger.current_breakeven,
            remaining_quantity: ledger.remaining_quantity,
            tp_level_unlocked: ledger.tp_level_unlocked,
            next_tier_blocked: ledger.next_tier_blocked,
            accumulated_profit: ledger.accumulated_profit,
            dynamic_stop_active: ledger.dynamic_stop_active,
            dynamic_stop_price: ledger.dynamic_stop_price,
            final_tranche_active: ledger.final_tranche_active,
            trailing_peak: ledger.trailing_peak,
            current_cycle: ledger.current_cycle().map(CycleStatus::from),
            cycles: ledger.cycles.len(),
            successful_reentries: ledger.successful_reentries,
            skipped_reentries: ledger.skipped_reentries,
            needs_manual_intervention: ledger.needs_manual_intervention,
            manual_intervention_reason: ledger.manual_intervention_reason.clone(),
            manual_intervention_at: ledger.manual_intervention_at,
            recent_events: ledger.debug_log.iter().rev().take(10).cloned().collect(),
        }
    }
}
