//! Position ledger
//!
//! Pure bookkeeping for one open position: remaining quantity, breakeven, accumulated profit
//! and the append-only cycle history. Nothing here talks to an exchange.

mod cycle;
mod status;

pub use cycle::{CycleOutcome, ReentryCycle, ReentryState};
pub use status::{CycleStatus, LedgerStatus};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::precision::InstrumentRules;
use crate::types::Side;

/// Entries kept in the per-position debug log
pub const DEBUG_LOG_CAPACITY: usize = 50;

/// Tranche / re-entry state for one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLedger {
    /// False once the position is fully closed
    pub enabled: bool,

    pub original_entry: Decimal,
    pub original_quantity: Decimal,
    pub current_breakeven: Decimal,
    pub remaining_quantity: Decimal,

    pub tp_level_unlocked: u8,
    pub next_tier_blocked: bool,
    pub accumulated_profit: Decimal,

    // Dynamic stop (final tier only)
    pub dynamic_stop_active: bool,
    pub dynamic_stop_price: Decimal,
    pub protected_profit: Decimal,
    pub max_allowable_loss: Decimal,
    /// Live protective stop order, if any
    pub stop_order_id: Option<String>,

    // Final tranche
    pub final_tranche_active: bool,
    pub final_tranche_quantity: Decimal,
    pub trailing_peak: Decimal,
    /// Percent (5 = 5%)
    pub trailing_percent: Decimal,

    pub cycles: Vec<ReentryCycle>,
    /// 1-based index into `cycles`, 0 = none
    pub current_cycle: usize,

    // Stats
    pub total_cycles_completed: u32,
    pub total_reentries: u32,
    pub successful_reentries: u32,
    pub skipped_reentries: u32,

    // Sticky operator alert
    pub needs_manual_intervention: bool,
    pub manual_intervention_reason: String,
    pub manual_intervention_at: Option<DateTime<Utc>>,

    pub debug_log: Vec<String>,
    pub last_update: DateTime<Utc>,
}

impl PositionLedger {
    pub fn new(entry: Decimal, quantity: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            original_entry: entry,
            original_quantity: quantity,
            current_breakeven: entry,
            remaining_quantity: quantity,
            tp_level_unlocked: 0,
            next_tier_blocked: false,
            accumulated_profit: Decimal::ZERO,
            dynamic_stop_active: false,
            dynamic_stop_price: Decimal::ZERO,
            protected_profit: Decimal::ZERO,
            max_allowable_loss: Decimal::ZERO,
            stop_order_id: None,
            final_tranche_active: false,
            final_tranche_quantity: Decimal::ZERO,
            trailing_peak: Decimal::ZERO,
            trailing_percent: Decimal::ZERO,
            cycles: Vec::new(),
            current_cycle: 0,
            total_cycles_completed: 0,
            total_reentries: 0,
            successful_reentries: 0,
            skipped_reentries: 0,
            needs_manual_intervention: false,
            manual_intervention_reason: String::new(),
            manual_intervention_at: None,
            debug_log: Vec::new(),
            last_update: now,
        }
    }

    pub fn current_cycle(&self) -> Option<&ReentryCycle> {
        if self.current_cycle == 0 {
            return None;
        }
        self.cycles.get(self.current_cycle - 1)
    }

    pub fn current_cycle_mut(&mut self) -> Option<&mut ReentryCycle> {
        if self.current_cycle == 0 {
            return None;
        }
        self.cycles.get_mut(self.current_cycle - 1)
    }

    pub fn is_waiting_for_reentry(&self) -> bool {
        self.next_tier_blocked && self.current_cycle().map_or(false, |c| c.is_waiting())
    }

    /// Tier advancement is allowed once the pending cycle has resolved
    pub fn can_proceed_to_next_tier(&self) -> bool {
        if !self.next_tier_blocked {
            return true;
        }
        self.current_cycle()
            .map_or(false, |c| c.reentry_state.is_terminal())
    }

    pub fn next_tier(&self) -> u8 {
        self.tp_level_unlocked + 1
    }

    pub fn next_cycle_number(&self) -> u32 {
        self.cycles.len() as u32 + 1
    }

    /// Append a cycle and make it current
    pub fn push_cycle(&mut self, cycle: ReentryCycle) {
        self.cycles.push(cycle);
        self.current_cycle = self.cycles.len();
    }

    /// Book a sell leg. Quantity is clamped so remaining never goes negative.
    pub fn record_sell(&mut self, quantity: Decimal, pnl: Decimal) {
        let quantity = if quantity > self.remaining_quantity {
            warn!(
                sold = %quantity,
                remaining = %self.remaining_quantity,
                "Sell exceeds tracked remaining quantity, clamping"
            );
            self.remaining_quantity
        } else {
            quantity
        };
        self.remaining_quantity -= quantity;
        self.accumulated_profit += pnl;
    }

    pub fn record_reentry_fill(&mut self, quantity: Decimal) {
        self.remaining_quantity += quantity;
        self.total_reentries += 1;
        self.successful_reentries += 1;
    }

    /// Replay the whole cycle history into a rounded breakeven
    pub fn recompute_breakeven(&self, rules: &InstrumentRules) -> Decimal {
        let raw = replay_breakeven(self.original_entry, self.original_quantity, &self.cycles);
        rules.round_price(raw)
    }

    /// Mark the position fully closed
    pub fn close_out(&mut self) {
        self.final_tranche_active = false;
        self.final_tranche_quantity = Decimal::ZERO;
        self.dynamic_stop_active = false;
        self.next_tier_blocked = false;
        self.remaining_quantity = Decimal::ZERO;
        self.enabled = false;
    }

    /// Raise the sticky operator alert. Returns false if it was already raised.
    pub fn flag_manual_intervention(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.needs_manual_intervention {
            return false;
        }
        self.needs_manual_intervention = true;
        self.manual_intervention_reason = reason.into();
        self.manual_intervention_at = Some(now);
        true
    }

    pub fn clear_manual_intervention(&mut self) {
        self.needs_manual_intervention = false;
        self.manual_intervention_reason.clear();
        self.manual_intervention_at = None;
    }

    /// Append to the bounded debug log and bump `last_update`
    pub fn log_event(&mut self, message: impl AsRef<str>, now: DateTime<Utc>) {
        self.debug_log
            .push(format!("{}: {}", now.format("%H:%M:%S"), message.as_ref()));
        if self.debug_log.len() > DEBUG_LOG_CAPACITY {
            let excess = self.debug_log.len() - DEBUG_LOG_CAPACITY;
            self.debug_log.drain(..excess);
        }
        self.last_update = now;
    }

    /// Sum of completed re-entry fills across the history
    pub fn total_reentered_quantity(&self) -> Decimal {
        self.cycles
            .iter()
            .filter(|c| c.reentry_state == ReentryState::Completed)
            .map(|c| c.reentry_filled_quantity)
            .sum()
    }

    pub fn total_sold_quantity(&self) -> Decimal {
        self.cycles.iter().map(|c| c.sell_quantity).sum()
    }
}

/// Weighted cost basis of what is still held.
///
/// Every recorded sell leaves the book; only completed re-entries come back in.
/// Falls back to `entry` when nothing is held.
pub fn replay_breakeven(entry: Decimal, quantity: Decimal, cycles: &[ReentryCycle]) -> Decimal {
    let mut net_cost = entry * quantity;
    let mut net_qty = quantity;

    for cycle in cycles {
        net_cost -= cycle.sell_price * cycle.sell_quantity;
        net_qty -= cycle.sell_quantity;

        if cycle.reentry_state == ReentryState::Completed {
            net_cost += cycle.reentry_filled_price * cycle.reentry_filled_quantity;
            net_qty += cycle.reentry_filled_quantity;
        }
    }

    if net_qty <= Decimal::ZERO {
        return entry;
    }
    net_cost / net_qty
}

/// An open position. Quantity lives only on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub rules: InstrumentRules,
    pub opened_at: DateTime<Utc>,
    pub ledger: PositionLedger,
}

impl Position {
    pub fn open(
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        rules: InstrumentRules,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            rules,
            opened_at: now,
            ledger: PositionLedger::new(entry_price, quantity, now),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.ledger.remaining_quantity
    }

    pub fn is_open(&self) -> bool {
        self.ledger.enabled && self.ledger.remaining_quantity > Decimal::ZERO
    }

    pub fn status(&self) -> LedgerStatus {
        LedgerStatus::from_position(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sell_cycle(n: u32, price: Decimal, qty: Decimal) -> ReentryCycle {
        ReentryCycle::from_sell(n, n as u8, Side::Long, price, qty, dec!(0), Utc::now())
    }

    fn complete(cycle: &mut ReentryCycle, price: Decimal, qty: Decimal) {
        cycle.reentry_state = ReentryState::Completed;
        cycle.reentry_filled_price = price;
        cycle.reentry_filled_quantity = qty;
    }

    #[test]
    fn test_breakeven_after_sell_only() {
        let rules = InstrumentRules::for_symbol("TESTUSDT");
        let mut ledger = PositionLedger::new(dec!(100), dec!(10), Utc::now());
        ledger.push_cycle(sell_cycle(1, dec!(100.30), dec!(3)));

        // (1000 - 300.9) / 7 = 99.8714...
        assert_eq!(ledger.recompute_breakeven(&rules), dec!(99.87));
    }

    #[test]
    fn test_breakeven_after_reentry() {
        let rules = InstrumentRules::for_symbol("TESTUSDT");
        let mut ledger = PositionLedger::new(dec!(100), dec!(10), Utc::now());
        let mut cycle = sell_cycle(1, dec!(100.30), dec!(3));
        complete(&mut cycle, dec!(100), dec!(2.4));
        ledger.push_cycle(cycle);

        // (699.1 + 240) / 9.4 = 99.904...
        assert_eq!(ledger.recompute_breakeven(&rules), dec!(99.90));
    }

    #[test]
    fn test_breakeven_ignores_skipped_reentry() {
        let rules = InstrumentRules::for_symbol("TESTUSDT");
        let mut ledger = PositionLedger::new(dec!(100), dec!(10), Utc::now());
        let mut cycle = sell_cycle(1, dec!(100.30), dec!(3));
        cycle.reentry_state = ReentryState::Skipped;
        cycle.reentry_filled_quantity = dec!(2.4);
        ledger.push_cycle(cycle);

        assert_eq!(ledger.recompute_breakeven(&rules), dec!(99.87));
    }

    #[test]
    fn test_breakeven_falls_back_to_entry_when_flat() {
        let cycles = vec![sell_cycle(1, dec!(101), dec!(10))];
        assert_eq!(replay_breakeven(dec!(100), dec!(10), &cycles), dec!(100));
    }

    #[test]
    fn test_quantity_conservation() {
        let mut ledger = PositionLedger::new(dec!(100), dec!(100), Utc::now());
        let mut c1 = sell_cycle(1, dec!(100.4), dec!(30));
        ledger.record_sell(dec!(30), dec!(12));
        complete(&mut c1, dec!(100), dec!(24));
        ledger.record_reentry_fill(dec!(24));
        ledger.push_cycle(c1);
        ledger.push_cycle(sell_cycle(2, dec!(100.7), dec!(47)));
        ledger.record_sell(dec!(47), dec!(32.9));

        let expected = ledger.original_quantity - ledger.total_sold_quantity()
            + ledger.total_reentered_quantity();
        assert_eq!(ledger.remaining_quantity, expected);
        assert_eq!(ledger.remaining_quantity, dec!(47));
    }

    #[test]
    fn test_record_sell_never_goes_negative() {
        let mut ledger = PositionLedger::new(dec!(100), dec!(1), Utc::now());
        ledger.record_sell(dec!(2), dec!(1));
        assert_eq!(ledger.remaining_quantity, dec!(0));
    }

    #[test]
    fn test_current_cycle_is_one_based() {
        let mut ledger = PositionLedger::new(dec!(100), dec!(10), Utc::now());
        assert!(ledger.current_cycle().is_none());
        ledger.push_cycle(sell_cycle(1, dec!(100.4), dec!(3)));
        assert_eq!(ledger.current_cycle().map(|c| c.cycle_number), Some(1));
        ledger.current_cycle = 5;
        assert!(ledger.current_cycle().is_none());
    }

    #[test]
    fn test_can_proceed_only_after_resolution() {
        let mut ledger = PositionLedger::new(dec!(100), dec!(10), Utc::now());
        let mut cycle = sell_cycle(1, dec!(100.4), dec!(3));
        cycle.reentry_state = ReentryState::Waiting;
        ledger.push_cycle(cycle);
        ledger.next_tier_blocked = true;
        assert!(ledger.is_waiting_for_reentry());
        assert!(!ledger.can_proceed_to_next_tier());

        if let Some(c) = ledger.current_cycle_mut() {
            c.finish(ReentryState::Skipped, CycleOutcome::Skipped, "timeout", Utc::now());
        }
        assert!(ledger.can_proceed_to_next_tier());
    }

    #[test]
    fn test_debug_log_is_bounded() {
        let mut ledger = PositionLedger::new(dec!(100), dec!(10), Utc::now());
        for i in 0..60 {
            ledger.log_event(format!("event {}", i), Utc::now());
        }
        assert_eq!(ledger.debug_log.len(), DEBUG_LOG_CAPACITY);
        assert!(ledger.debug_log[0].ends_with("event 10"));
    }

    #[test]
    fn test_manual_intervention_is_sticky() {
        let mut ledger = PositionLedger::new(dec!(100), dec!(10), Utc::now());
        assert!(ledger.flag_manual_intervention("too small", Utc::now()));
        assert!(!ledger.flag_manual_intervention("again", Utc::now()));
        assert_eq!(ledger.manual_intervention_reason, "too small");
        ledger.clear_manual_intervention();
        assert!(!ledger.needs_manual_intervention);
    }
}
