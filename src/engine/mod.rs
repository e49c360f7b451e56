//! Position lifecycle engine
//!
//! One `monitor` pass per position per tick. Controllers run in a fixed order against the
//! position's ledger while its slot mutex is held:
//! reconcile, final trailing, re-entry, tier advance, dynamic stop.

mod dynamic_stop;
mod ladder;
mod reconcile;
mod reentry;
mod sentinel;
mod trailing;

pub use ladder::{check_tier, tier_price};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{PositionOptimizationConfig, SettingsProvider, TierLadder};
use crate::error::{EngineError, EngineResult, PersistenceError};
use crate::exchange::Execution;
use crate::learning::AdaptiveLearner;
use crate::ledger::{LedgerStatus, Position};
use crate::market::{MarketData, MarketSnapshot};
use crate::orchestrator::{Orchestrator, OrchestratorDecision};
use crate::persistence::{await_pending, spawn_save, LedgerStore};
use crate::risk::ReentryBudget;

/// Something a tick did to a position
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TickEvent {
    ExchangeFill { tier: u8, quantity: Decimal },
    TierAdvanced { tier: u8, quantity: Decimal, price: Decimal },
    ReentryScheduled { cycle: u32, target: Decimal, quantity: Decimal },
    ReentryCompleted { cycle: u32, quantity: Decimal, price: Decimal, breakeven: Decimal },
    ReentrySkipped { cycle: u32, reason: String },
    ReentryFailed { cycle: u32, reason: String },
    StopUpdated { price: Decimal },
    FinalExit { reason: String, quantity: Decimal, price: Decimal },
    PositionClosed { reason: String },
    ManualIntervention { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub position_id: String,
    pub price: Option<Decimal>,
    pub events: Vec<TickEvent>,
}

impl TickReport {
    fn idle(position_id: &str) -> Self {
        Self {
            position_id: position_id.to_string(),
            price: None,
            events: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Per-tick inputs shared by the controllers
pub(crate) struct Tick {
    pub now: DateTime<Utc>,
    pub price: Decimal,
    pub config: Arc<PositionOptimizationConfig>,
    pub events: Vec<TickEvent>,
    /// Ledger changed; persist at the end of the tick
    pub dirty: bool,
}

impl Tick {
    pub fn emit(&mut self, event: TickEvent) {
        self.events.push(event);
        self.dirty = true;
    }
}

struct PositionSlot {
    position: Position,
    pending_save: Option<JoinHandle<Result<(), PersistenceError>>>,
}

pub struct PositionEngine {
    settings: Arc<dyn SettingsProvider>,
    market: Arc<dyn MarketData>,
    execution: Arc<dyn Execution>,
    store: Arc<dyn LedgerStore>,
    orchestrator: Option<Arc<Orchestrator>>,
    budget: Arc<ReentryBudget>,
    learner: Option<Arc<AdaptiveLearner>>,
    positions: RwLock<HashMap<String, Arc<Mutex<PositionSlot>>>>,
}

impl PositionEngine {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        market: Arc<dyn MarketData>,
        execution: Arc<dyn Execution>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            settings,
            market,
            execution,
            store,
            orchestrator: None,
            budget: Arc::new(ReentryBudget::new()),
            learner: None,
            positions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_learner(mut self, learner: Arc<AdaptiveLearner>) -> Self {
        self.learner = Some(learner);
        self
    }

    /// Share one daily budget across several engines
    pub fn with_budget(mut self, budget: Arc<ReentryBudget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> &ReentryBudget {
        &self.budget
    }

    /// Start tracking a position and persist its initial ledger
    pub fn add_position(&self, position: Position) -> EngineResult<String> {
        let id = position.id.clone();
        info!(
            position_id = %id,
            symbol = %position.symbol,
            side = %position.side,
            entry = %position.entry_price,
            quantity = %position.remaining_quantity(),
            "📌 Tracking position"
        );
        let pending = Some(spawn_save(Arc::clone(&self.store), position.clone()));
        let slot = Arc::new(Mutex::new(PositionSlot {
            position,
            pending_save: pending,
        }));
        self.positions
            .write()
            .map_err(|_| EngineError::PositionNotFound(id.clone()))?
            .insert(id.clone(), slot);
        Ok(id)
    }

    /// Reload every still-open ledger from the store
    pub async fn resume_from_store(&self) -> EngineResult<usize> {
        let stored = self.store.load_all().await?;
        let mut resumed = 0;
        for position in stored.into_iter().filter(|p| p.ledger.enabled) {
            info!(
                position_id = %position.id,
                symbol = %position.symbol,
                tier = position.ledger.tp_level_unlocked,
                cycles = position.ledger.cycles.len(),
                "Resuming position"
            );
            let slot = Arc::new(Mutex::new(PositionSlot {
                position: position.clone(),
                pending_save: None,
            }));
            if let Ok(mut positions) = self.positions.write() {
                positions.insert(position.id.clone(), slot);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    fn slot(&self, position_id: &str) -> EngineResult<Arc<Mutex<PositionSlot>>> {
        self.positions
            .read()
            .ok()
            .and_then(|p| p.get(position_id).cloned())
            .ok_or_else(|| EngineError::PositionNotFound(position_id.to_string()))
    }

    pub fn position_ids(&self) -> Vec<String> {
        self.positions
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn monitor(&self, position_id: &str) -> EngineResult<TickReport> {
        self.monitor_at(position_id, Utc::now()).await
    }

    /// One evaluation pass at an explicit clock
    pub async fn monitor_at(&self, position_id: &str, now: DateTime<Utc>) -> EngineResult<TickReport> {
        let slot = self.slot(position_id)?;
        let mut guard = slot.lock().await;
        let PositionSlot {
            position,
            pending_save,
        } = &mut *guard;

        if let Err(e) = await_pending(pending_save).await {
            warn!(position_id = %position_id, error = %e, "Previous ledger save did not complete");
        }

        if !position.is_open() {
            return Ok(TickReport::idle(position_id));
        }
        if position.ledger.needs_manual_intervention {
            debug!(
                position_id = %position_id,
                reason = %position.ledger.manual_intervention_reason,
                "Awaiting manual intervention, skipping"
            );
            return Ok(TickReport::idle(position_id));
        }

        let config = self.effective_config();
        let price = self
            .market
            .current_price(&position.symbol)
            .await
            .map_err(|e| EngineError::MarketData(format!("{:#}", e)))?;

        let mut tick = Tick {
            now,
            price,
            config,
            events: Vec::new(),
            dirty: false,
        };

        let result = self.run_controllers(position, &mut tick).await;

        if tick.dirty {
            *pending_save = Some(spawn_save(Arc::clone(&self.store), position.clone()));
        }

        result.map(|_| TickReport {
            position_id: position_id.to_string(),
            price: Some(price),
            events: tick.events,
        })
    }

    async fn run_controllers(&self, position: &mut Position, tick: &mut Tick) -> EngineResult<()> {
        if self.reconcile(position, tick).await? {
            return Ok(());
        }

        if position.ledger.final_tranche_active {
            if self.trail_final_tranche(position, tick).await? || position.ledger.needs_manual_intervention {
                return Ok(());
            }
        }

        if position.ledger.is_waiting_for_reentry() {
            self.evaluate_reentry(position, tick).await?;
        } else if position.ledger.can_proceed_to_next_tier() {
            let tier = position.ledger.next_tier();
            if tier <= TierLadder::FINAL_TIER && check_tier(position, &tick.config.ladder, tick.price, tier) {
                self.advance_tier(position, tier, tick).await?;
            }
        }

        if position.ledger.needs_manual_intervention {
            return Ok(());
        }

        if position.ledger.dynamic_stop_active && position.is_open() {
            let ai_stop = self.ai_stop_candidate(position, tick).await;
            self.update_dynamic_stop(position, tick, ai_stop).await?;
        }
        Ok(())
    }

    fn effective_config(&self) -> Arc<PositionOptimizationConfig> {
        let base = self.settings.snapshot();
        match &self.learner {
            Some(learner) => Arc::new(learner.apply(&base)),
            None => base,
        }
    }

    /// Ask the orchestrator; `None` when it or the market snapshot is unavailable
    pub(crate) async fn consult(&self, position: &Position, tick: &Tick) -> Option<OrchestratorDecision> {
        let orchestrator = self.orchestrator.as_ref()?;
        let snapshot = match MarketSnapshot::build(self.market.as_ref(), position, tick.price).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(symbol = %position.symbol, error = %format!("{:#}", e), "Snapshot unavailable, deciding without agents");
                return None;
            }
        };
        Some(orchestrator.process(position, &snapshot, Arc::clone(&tick.config)).await)
    }

    pub async fn monitor_all(&self) -> Vec<(String, EngineResult<TickReport>)> {
        let ids = self.position_ids();
        let results = join_all(ids.iter().map(|id| self.monitor(id))).await;
        ids.into_iter()
            .zip(results)
            .inspect(|(id, result)| {
                if let Err(e) = result {
                    error!(position_id = %id, error = %e, "Monitor pass failed");
                }
            })
            .collect()
    }

    pub async fn status(&self, position_id: &str) -> EngineResult<LedgerStatus> {
        let slot = self.slot(position_id)?;
        let guard = slot.lock().await;
        Ok(guard.position.status())
    }

    pub async fn statuses(&self) -> Vec<LedgerStatus> {
        let mut out = Vec::new();
        for id in self.position_ids() {
            if let Ok(status) = self.status(&id).await {
                out.push(status);
            }
        }
        out
    }

    /// Current ledger copies, for export
    pub async fn positions(&self) -> Vec<Position> {
        let mut out = Vec::new();
        for id in self.position_ids() {
            if let Ok(slot) = self.slot(&id) {
                out.push(slot.lock().await.position.clone());
            }
        }
        out
    }

    /// Operator acknowledgement of a stuck position
    pub async fn clear_manual_intervention(&self, position_id: &str) -> EngineResult<()> {
        let slot = self.slot(position_id)?;
        let mut guard = slot.lock().await;
        let PositionSlot {
            position,
            pending_save,
        } = &mut *guard;
        if !position.ledger.needs_manual_intervention {
            return Ok(());
        }
        await_pending(pending_save).await?;
        info!(
            position_id = %position_id,
            reason = %position.ledger.manual_intervention_reason,
            "Manual intervention cleared"
        );
        position.ledger.clear_manual_intervention();
        position.ledger.log_event("manual intervention cleared", Utc::now());
        *pending_save = Some(spawn_save(Arc::clone(&self.store), position.clone()));
        Ok(())
    }

    /// Wait for every outstanding ledger save
    pub async fn flush(&self) -> EngineResult<()> {
        for id in self.position_ids() {
            let slot = self.slot(&id)?;
            let mut guard = slot.lock().await;
            await_pending(&mut guard.pending_save).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedSettings;
    use crate::error::ExchangeError;
    use crate::exchange::{MockExecution, PaperExchange};
    use crate::persistence::MemoryLedgerStore;
    use crate::precision::InstrumentRules;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::open(
            "BTCUSDT",
            Side::Long,
            dec!(100),
            dec!(10),
            InstrumentRules::for_symbol("BTCUSDT"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_failed_tier_sell_leaves_ledger_untouched() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_price("BTCUSDT", dec!(100.5));

        let mut execution = MockExecution::new();
        execution
            .expect_position_quantity()
            .returning(|_, _| Ok(None));
        execution
            .expect_place_order()
            .times(1)
            .returning(|_| Err(ExchangeError::Network("timeout".to_string())));

        let engine = PositionEngine::new(
            Arc::new(SharedSettings::new(PositionOptimizationConfig::default())),
            paper,
            Arc::new(execution),
            Arc::new(MemoryLedgerStore::new()),
        );
        let pos = position();
        let before = pos.ledger.clone();
        let id = engine.add_position(pos).unwrap();

        let err = engine.monitor(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));

        let after = engine.positions().await.remove(0).ledger;
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_unknown_position_is_reported() {
        let paper = Arc::new(PaperExchange::new());
        let engine = PositionEngine::new(
            Arc::new(SharedSettings::new(PositionOptimizationConfig::default())),
            paper.clone(),
            paper,
            Arc::new(MemoryLedgerStore::new()),
        );
        let err = engine.monitor("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::PositionNotFound(_)));
    }
}
