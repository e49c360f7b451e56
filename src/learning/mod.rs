//! Adaptive re-entry tuning
//!
//! Scores every completed re-entry once its position fully closes and nudges the
//! re-entry percent and AI confidence floor from recent win rates.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::config::{LearningConfig, PositionOptimizationConfig};
use crate::ledger::{Position, ReentryState};
use crate::precision::to_f64;
use crate::types::Side;

/// Outcomes retained in memory and on disk
const HISTORY_CAPACITY: usize = 500;

/// Result of one bought-back tranche, scored at final exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReentryOutcome {
    pub symbol: String,
    pub side: Side,
    pub tp_level: u8,
    pub market_condition: String,
    /// Whether an AI/heuristic decision approved this re-entry
    pub ai_approved: bool,
    pub ai_confidence: Option<f64>,
    pub pnl: f64,
    pub timestamp: DateTime<Utc>,
}

impl ReentryOutcome {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub trades: u32,
    pub wins: u32,
    pub total_pnl: f64,
}

impl OutcomeStats {
    fn record(&mut self, outcome: &ReentryOutcome) {
        self.trades += 1;
        if outcome.is_win() {
            self.wins += 1;
        }
        self.total_pnl += outcome.pnl;
    }

    /// Percent, 0 when empty
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64 * 100.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningState {
    pub outcomes: VecDeque<ReentryOutcome>,
    pub by_tier: HashMap<u8, OutcomeStats>,
    pub by_condition: HashMap<String, OutcomeStats>,
    pub by_symbol: HashMap<String, OutcomeStats>,
    pub adjusted_reentry_percent: Option<f64>,
    pub adjusted_min_confidence: Option<f64>,
}

pub struct AdaptiveLearner {
    config: LearningConfig,
    default_reentry_percent: f64,
    default_min_confidence: f64,
    state: RwLock<LearningState>,
    state_file: Option<PathBuf>,
}

impl AdaptiveLearner {
    pub fn new(config: LearningConfig, base: &PositionOptimizationConfig) -> Self {
        Self {
            config,
            default_reentry_percent: base.reentry_percent as f64,
            default_min_confidence: base.ai_min_confidence,
            state: RwLock::new(LearningState::default()),
            state_file: None,
        }
    }

    /// Enable persistence to a state file
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Score every completed re-entry of a closed position against its exit price
    pub fn record_position(&self, position: &Position, exit_price: Decimal, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        let outcomes: Vec<ReentryOutcome> = position
            .ledger
            .cycles
            .iter()
            .filter(|c| c.reentry_state == ReentryState::Completed)
            .map(|c| ReentryOutcome {
                symbol: position.symbol.clone(),
                side: position.side,
                tp_level: c.tp_level,
                market_condition: c
                    .ai_decision
                    .as_ref()
                    .map(|d| d.market_condition.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
                ai_approved: c.ai_decision.as_ref().map_or(false, |d| d.should_reenter),
                ai_confidence: c.ai_decision.as_ref().map(|d| d.confidence),
                pnl: to_f64(position.side.pnl(
                    c.reentry_filled_price,
                    exit_price,
                    c.reentry_filled_quantity,
                )),
                timestamp: now,
            })
            .collect();

        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn record(&self, outcome: ReentryOutcome) {
        let Ok(mut state) = self.state.write() else {
            return;
        };
        state.by_tier.entry(outcome.tp_level).or_default().record(&outcome);
        state
            .by_condition
            .entry(outcome.market_condition.clone())
            .or_default()
            .record(&outcome);
        state
            .by_symbol
            .entry(outcome.symbol.clone())
            .or_default()
            .record(&outcome);
        state.outcomes.push_back(outcome);
        while state.outcomes.len() > HISTORY_CAPACITY {
            state.outcomes.pop_front();
        }

        if state.outcomes.len() >= self.config.min_trades {
            self.adjust(&mut state);
        }
    }

    fn adjust(&self, state: &mut LearningState) {
        let window: Vec<&ReentryOutcome> = state
            .outcomes
            .iter()
            .rev()
            .take(self.config.window_trades.max(1))
            .collect();
        let wins = window.iter().filter(|o| o.is_win()).count();
        let win_rate = wins as f64 / window.len() as f64 * 100.0;
        let max_adj = self.config.max_reentry_adjust;

        let current = state
            .adjusted_reentry_percent
            .unwrap_or(self.default_reentry_percent);
        let next = if win_rate > 70.0 {
            (current + (win_rate - 70.0) / 30.0 * max_adj).min(100.0)
        } else if win_rate < 50.0 {
            (current - (50.0 - win_rate) / 50.0 * max_adj).max(50.0)
        } else {
            current * 0.9 + self.default_reentry_percent * 0.1
        };
        state.adjusted_reentry_percent = Some(next);

        let approved: Vec<&&ReentryOutcome> = window.iter().filter(|o| o.ai_approved).collect();
        if !approved.is_empty() {
            let false_positives = approved.iter().filter(|o| !o.is_win()).count();
            let fp_rate = false_positives as f64 / approved.len() as f64;
            let avg_pnl = window.iter().map(|o| o.pnl).sum::<f64>() / window.len() as f64;
            let confidence = state
                .adjusted_min_confidence
                .unwrap_or(self.default_min_confidence);
            let confidence = if fp_rate > 0.3 {
                (confidence + 0.05).min(0.9)
            } else if fp_rate < 0.1 && avg_pnl > 0.0 {
                (confidence - 0.02).max(0.5)
            } else {
                confidence
            };
            state.adjusted_min_confidence = Some(confidence);
        }

        info!(
            win_rate = format!("{:.1}", win_rate),
            reentry_percent = format!("{:.1}", next),
            min_confidence = ?state.adjusted_min_confidence,
            window = window.len(),
            "🧠 Adaptive re-entry parameters updated"
        );
    }

    /// Overlay learned adjustments on a settings snapshot
    pub fn apply(&self, base: &PositionOptimizationConfig) -> PositionOptimizationConfig {
        let mut cfg = base.clone();
        if !self.config.enabled {
            return cfg;
        }
        if let Ok(state) = self.state.read() {
            if let Some(pct) = state.adjusted_reentry_percent {
                cfg.reentry_percent = pct.round().clamp(1.0, 100.0) as u32;
            }
            if let Some(conf) = state.adjusted_min_confidence {
                cfg.ai_min_confidence = conf;
            }
        }
        cfg
    }

    pub fn stats_by_tier(&self, tier: u8) -> OutcomeStats {
        self.state
            .read()
            .ok()
            .and_then(|s| s.by_tier.get(&tier).cloned())
            .unwrap_or_default()
    }

    pub fn stats_by_symbol(&self, symbol: &str) -> OutcomeStats {
        self.state
            .read()
            .ok()
            .and_then(|s| s.by_symbol.get(symbol).cloned())
            .unwrap_or_default()
    }

    pub fn stats_by_condition(&self, condition: &str) -> OutcomeStats {
        self.state
            .read()
            .ok()
            .and_then(|s| s.by_condition.get(condition).cloned())
            .unwrap_or_default()
    }

    /// Save state to JSON file
    pub async fn save_state(&self) -> Result<()> {
        let state_file = match &self.state_file {
            Some(p) => p.clone(),
            None => return Ok(()), // No state file configured, skip saving
        };
        let state = self
            .state
            .read()
            .map(|s| s.clone())
            .map_err(|_| anyhow::anyhow!("learning state lock poisoned"))?;
        let json = serde_json::to_string_pretty(&state)?;
        tokio::fs::write(&state_file, json).await?;
        info!(path = %state_file.display(), outcomes = state.outcomes.len(), "💾 Learning state saved");
        Ok(())
    }

    /// Load state from JSON file
    pub fn load_state(&self) -> Result<()> {
        let state_file = match &self.state_file {
            Some(p) => p,
            None => return Ok(()),
        };
        if !state_file.exists() {
            return Ok(());
        }
        let json = fs::read_to_string(state_file)?;
        match serde_json::from_str::<LearningState>(&json) {
            Ok(loaded) => {
                if let Ok(mut state) = self.state.write() {
                    info!(
                        path = %state_file.display(),
                        outcomes = loaded.outcomes.len(),
                        "Learning state restored"
                    );
                    *state = loaded;
                }
            }
            Err(e) => {
                warn!(path = %state_file.display(), error = %e, "Ignoring unreadable learning state");
            }
        }
        Ok(())
    }
}
