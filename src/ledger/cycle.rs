//! Re-entry cycle records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ai::ReentryDecision;
use crate::types::Side;

/// Re-entry side of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReentryState {
    /// No buy-back planned (final tier, exchange close)
    None,
    Waiting,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl ReentryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReentryState::Completed | ReentryState::Failed | ReentryState::Skipped
        )
    }
}

impl fmt::Display for ReentryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReentryState::None => write!(f, "NONE"),
            ReentryState::Waiting => write!(f, "WAITING"),
            ReentryState::Executing => write!(f, "EXECUTING"),
            ReentryState::Completed => write!(f, "COMPLETED"),
            ReentryState::Failed => write!(f, "FAILED"),
            ReentryState::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Outcome classification assigned when a cycle goes terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Profit,
    Loss,
    Breakeven,
    Skipped,
    Failed,
    FullCloseSmallPosition,
    FullCloseExchange,
}

impl CycleOutcome {
    /// Classify a completed cycle by the PnL of its sell leg
    pub fn from_pnl(pnl: Decimal) -> Self {
        if pnl > Decimal::ZERO {
            CycleOutcome::Profit
        } else if pnl < Decimal::ZERO {
            CycleOutcome::Loss
        } else {
            CycleOutcome::Breakeven
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Profit => write!(f, "profit"),
            CycleOutcome::Loss => write!(f, "loss"),
            CycleOutcome::Breakeven => write!(f, "breakeven"),
            CycleOutcome::Skipped => write!(f, "skipped"),
            CycleOutcome::Failed => write!(f, "failed"),
            CycleOutcome::FullCloseSmallPosition => write!(f, "full_close_small_position"),
            CycleOutcome::FullCloseExchange => write!(f, "full_close_exchange"),
        }
    }
}

/// One tranche sell and its optional buy-back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReentryCycle {
    pub cycle_number: u32,
    pub tp_level: u8,
    pub side: Side,

    // Sell leg, immutable once recorded
    pub sell_price: Decimal,
    pub sell_quantity: Decimal,
    pub sell_pnl: Decimal,
    pub sell_time: DateTime<Utc>,

    // Re-entry leg
    pub reentry_target_price: Decimal,
    pub reentry_quantity: Decimal,
    pub reentry_state: ReentryState,
    pub reentry_attempts: u32,
    pub reentry_filled_price: Decimal,
    pub reentry_filled_quantity: Decimal,
    pub reentry_filled_time: Option<DateTime<Utc>>,

    /// Re-entry agent judgment consulted for this cycle
    pub ai_decision: Option<ReentryDecision>,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Option<CycleOutcome>,
    pub outcome_pnl: Decimal,
    pub outcome_reason: String,
}

impl ReentryCycle {
    /// Record a tranche sell; the re-entry leg starts as `None`
    pub fn from_sell(
        cycle_number: u32,
        tp_level: u8,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            cycle_number,
            tp_level,
            side,
            sell_price: price,
            sell_quantity: quantity,
            sell_pnl: pnl,
            sell_time: now,
            reentry_target_price: Decimal::ZERO,
            reentry_quantity: Decimal::ZERO,
            reentry_state: ReentryState::None,
            reentry_attempts: 0,
            reentry_filled_price: Decimal::ZERO,
            reentry_filled_quantity: Decimal::ZERO,
            reentry_filled_time: None,
            ai_decision: None,
            start_time: now,
            end_time: None,
            outcome: None,
            outcome_pnl: Decimal::ZERO,
            outcome_reason: String::new(),
        }
    }

    /// Move to a terminal state. No-op if already terminal.
    pub fn finish(
        &mut self,
        state: ReentryState,
        outcome: CycleOutcome,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        if self.reentry_state.is_terminal() {
            return;
        }
        self.reentry_state = state;
        self.outcome = Some(outcome);
        self.outcome_reason = reason.into();
        self.outcome_pnl = self.sell_pnl;
        self.end_time = Some(now);
    }

    /// Close a cycle that never had a re-entry leg (final tier, full closes)
    pub fn close_without_reentry(
        &mut self,
        outcome: CycleOutcome,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.reentry_state = ReentryState::None;
        self.outcome = Some(outcome);
        self.outcome_reason = reason.into();
        self.outcome_pnl = self.sell_pnl;
        self.end_time = Some(now);
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_seconds())
    }

    pub fn is_waiting(&self) -> bool {
        self.reentry_state == ReentryState::Waiting
    }
}
