//! Cycle audit export

use csv::WriterBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::info;

use crate::error::PersistenceError;
use crate::ledger::Position;

/// One cycle, flattened for CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleAuditRecord {
    pub position_id: String,
    pub symbol: String,
    pub side: String,
    pub cycle_number: u32,
    pub tp_level: u8,
    pub sell_time: i64,
    pub sell_price: Decimal,
    pub sell_quantity: Decimal,
    pub sell_pnl: Decimal,
    pub reentry_state: String,
    pub reentry_target_price: Decimal,
    pub reentry_filled_price: Decimal,
    pub reentry_filled_quantity: Decimal,
    pub reentry_attempts: u32,
    pub outcome: String,
    pub outcome_reason: String,
    pub duration_secs: Option<i64>,
}

impl CycleAuditRecord {
    pub fn from_position(position: &Position) -> Vec<Self> {
        position
            .ledger
            .cycles
            .iter()
            .map(|c| Self {
                position_id: position.id.clone(),
                symbol: position.symbol.clone(),
                side: position.side.to_string(),
                cycle_number: c.cycle_number,
                tp_level: c.tp_level,
                sell_time: c.sell_time.timestamp_millis(),
                sell_price: c.sell_price,
                sell_quantity: c.sell_quantity,
                sell_pnl: c.sell_pnl,
                reentry_state: c.reentry_state.to_string(),
                reentry_target_price: c.reentry_target_price,
                reentry_filled_price: c.reentry_filled_price,
                reentry_filled_quantity: c.reentry_filled_quantity,
                reentry_attempts: c.reentry_attempts,
                outcome: c.outcome.map(|o| o.to_string()).unwrap_or_default(),
                outcome_reason: c.outcome_reason.clone(),
                duration_secs: c.duration_secs(),
            })
            .collect()
    }
}

/// Write every cycle of `positions` to `output_path`, replacing the file
pub fn export_cycles(output_path: &Path, positions: &[Position]) -> Result<usize, PersistenceError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output_path)?;

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    let mut written = 0;
    for position in positions {
        for record in CycleAuditRecord::from_position(position) {
            writer.serialize(&record)?;
            written += 1;
        }
    }

    writer.flush()?;
    info!(path = %output_path.display(), cycles = written, "Exported cycle audit");
    Ok(written)
}
