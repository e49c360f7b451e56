//! Stuck-position sentinel

use tracing::error;

use super::{PositionEngine, Tick, TickEvent};
use crate::ledger::Position;

impl PositionEngine {
    /// Raise the sticky manual-intervention alert; no trading happens until cleared
    pub(crate) fn raise_manual_intervention(&self, position: &mut Position, reason: String, tick: &mut Tick) {
        if !position.ledger.flag_manual_intervention(reason.clone(), tick.now) {
            return;
        }
        error!(
            position_id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            remaining = %position.remaining_quantity(),
            at = %tick.now.to_rfc3339(),
            reason = %reason,
            "🚨 Manual intervention required"
        );
        position.ledger.log_event(format!("MANUAL INTERVENTION: {}", reason), tick.now);
        tick.emit(TickEvent::ManualIntervention { reason });
    }
}
