//! End-to-end engine scenarios against the paper venue

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use tranchebot::ai::{AiAnalyzer, ReentryAnalysisRequest, ReentryDecision, RiskLevel};
use tranchebot::config::{OrchestratorConfig, PositionOptimizationConfig, SharedSettings};
use tranchebot::exchange::paper::{PaperOrder, PaperOrderStatus};
use tranchebot::exchange::PaperExchange;
use tranchebot::ledger::{CycleOutcome, Position, ReentryState};
use tranchebot::orchestrator::Orchestrator;
use tranchebot::persistence::{LedgerStore, MemoryLedgerStore};
use tranchebot::precision::InstrumentRules;
use tranchebot::types::{OrderType, Side};
use tranchebot::{EngineError, PositionEngine, TickEvent};

const SYMBOL: &str = "TESTUSDT";

struct Harness {
    paper: Arc<PaperExchange>,
    store: Arc<MemoryLedgerStore>,
    engine: PositionEngine,
    id: String,
    start: DateTime<Utc>,
}

impl Harness {
    fn new(config: PositionOptimizationConfig, symbol: &str, quantity: Decimal) -> Self {
        Self::build(config, symbol, Side::Long, quantity, None)
    }

    fn build(
        config: PositionOptimizationConfig,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        orchestrator: Option<Arc<Orchestrator>>,
    ) -> Self {
        let position = Position::open(
            symbol,
            side,
            dec!(100),
            quantity,
            InstrumentRules::for_symbol(symbol),
            Utc::now(),
        );
        Self::with_position(config, position, orchestrator)
    }

    /// Track a prepared ledger; the venue holds its remaining quantity
    fn with_position(
        config: PositionOptimizationConfig,
        position: Position,
        orchestrator: Option<Arc<Orchestrator>>,
    ) -> Self {
        let symbol = position.symbol.clone();
        let paper = Arc::new(PaperExchange::new());
        paper.set_price(&symbol, dec!(100));
        let net = match position.side {
            Side::Long => position.remaining_quantity(),
            Side::Short => -position.remaining_quantity(),
        };
        paper.force_position(&symbol, net);

        let store = Arc::new(MemoryLedgerStore::new());
        let mut engine = PositionEngine::new(
            Arc::new(SharedSettings::new(config)),
            paper.clone(),
            paper.clone(),
            store.clone(),
        );
        if let Some(orchestrator) = orchestrator {
            engine = engine.with_orchestrator(orchestrator);
        }

        let start = position.opened_at;
        let id = engine.add_position(position).unwrap();

        Self {
            paper,
            store,
            engine,
            id,
            start,
        }
    }

    async fn tick(&self, price: Decimal, secs: i64) -> Result<Vec<TickEvent>, EngineError> {
        self.paper.set_price(SYMBOL, price);
        self.engine
            .monitor_at(&self.id, self.start + Duration::seconds(secs))
            .await
            .map(|r| r.events)
    }

    async fn position(&self) -> Position {
        self.engine.positions().await.remove(0)
    }
}

fn no_ai() -> PositionOptimizationConfig {
    PositionOptimizationConfig {
        use_ai_decisions: false,
        ..Default::default()
    }
}

/// Every re-entry is refused by the daily budget, so tiers follow each other directly
fn no_reentries() -> PositionOptimizationConfig {
    PositionOptimizationConfig {
        max_daily_reentries: 0,
        ..no_ai()
    }
}

/// TP1 at 100.4, TP2 at 100.7, TP3 at 101
async fn climb_to_final_tranche(h: &Harness) {
    h.tick(dec!(100.4), 0).await.unwrap();
    h.tick(dec!(100.7), 10).await.unwrap();
    h.tick(dec!(101), 20).await.unwrap();
    assert!(h.position().await.ledger.final_tranche_active);
}

fn stop_orders(paper: &PaperExchange) -> Vec<PaperOrder> {
    paper
        .orders()
        .into_iter()
        .filter(|o| o.request.order_type == OrderType::StopMarket)
        .collect()
}

#[tokio::test]
async fn test_full_ladder_long() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(100));

    // Tier 1 at 100.4 sells 30 and schedules a 24-unit re-entry at breakeven
    let events = h.tick(dec!(100.4), 0).await.unwrap();
    assert!(events.contains(&TickEvent::TierAdvanced {
        tier: 1,
        quantity: dec!(30),
        price: dec!(100.4)
    }));
    let pos = h.position().await;
    assert_eq!(pos.remaining_quantity(), dec!(70));
    assert_eq!(pos.ledger.accumulated_profit, dec!(12));
    assert!(pos.ledger.next_tier_blocked);
    let cycle = pos.ledger.current_cycle().unwrap();
    assert_eq!(cycle.reentry_state, ReentryState::Waiting);
    assert_eq!(cycle.reentry_target_price, dec!(100));
    assert_eq!(cycle.reentry_quantity, dec!(24));

    // Blocked: tier 2 price does nothing while the re-entry is pending and out of band
    let events = h.tick(dec!(100.7), 10).await.unwrap();
    assert!(events.is_empty());

    // Back at breakeven: buy back 24
    let events = h.tick(dec!(100), 20).await.unwrap();
    assert!(matches!(events[0], TickEvent::ReentryCompleted { cycle: 1, .. }));
    let pos = h.position().await;
    assert_eq!(pos.remaining_quantity(), dec!(94));
    // (10000 - 3012 + 2400) / 94 = 99.87...
    assert_eq!(pos.ledger.current_breakeven, dec!(99.87));
    assert_eq!(pos.ledger.successful_reentries, 1);
    assert!(!pos.ledger.next_tier_blocked);
    assert!(pos.ledger.stop_order_id.is_some());

    // Tier 2 sells half of 94
    h.tick(dec!(100.7), 30).await.unwrap();
    let pos = h.position().await;
    assert_eq!(pos.ledger.tp_level_unlocked, 2);
    assert_eq!(pos.remaining_quantity(), dec!(47));
    assert_eq!(pos.ledger.current_cycle().unwrap().reentry_quantity, dec!(37.6));

    // Let that re-entry time out, then tier 3 sells 80% of 47
    let events = h.tick(dec!(100.8), 30 + 301).await.unwrap();
    assert!(events.contains(&TickEvent::ReentrySkipped {
        cycle: 2,
        reason: "timeout".to_string()
    }));
    h.tick(dec!(101), 340).await.unwrap();
    let pos = h.position().await;
    assert_eq!(pos.ledger.tp_level_unlocked, 3);
    assert_eq!(pos.remaining_quantity(), dec!(9.4));
    assert!(pos.ledger.final_tranche_active);
    assert_eq!(pos.ledger.final_tranche_quantity, dec!(9.4));
    assert_eq!(pos.ledger.trailing_peak, dec!(101));
    assert!(pos.ledger.dynamic_stop_active);
    // Banked profit clamps the first stop to entry
    assert_eq!(pos.ledger.dynamic_stop_price, dec!(100));
    let first_stop = pos.ledger.dynamic_stop_price;

    // New peak raises the stop
    h.tick(dec!(106), 350).await.unwrap();
    let pos = h.position().await;
    assert_eq!(pos.ledger.trailing_peak, dec!(106));
    assert!(pos.ledger.dynamic_stop_price > first_stop);

    // 5% off the peak is 100.7; 100.5 trips the trailing stop first
    let events = h.tick(dec!(100.5), 360).await.unwrap();
    assert!(events.contains(&TickEvent::FinalExit {
        reason: "trailing_stop".to_string(),
        quantity: dec!(9.4),
        price: dec!(100.5)
    }));

    let pos = h.position().await;
    assert!(!pos.ledger.enabled);
    assert_eq!(pos.remaining_quantity(), dec!(0));
    assert!(!pos.ledger.final_tranche_active);
    assert!(!pos.ledger.dynamic_stop_active);
    // 12 + 32.9 + 37.6 + 4.7
    assert_eq!(pos.ledger.accumulated_profit, dec!(87.2));
    assert_eq!(
        pos.ledger.original_quantity - pos.ledger.total_sold_quantity() + pos.ledger.total_reentered_quantity(),
        dec!(0)
    );
    assert_eq!(h.paper.net_position(SYMBOL), dec!(0));

    // Every protective stop was pulled on close
    assert!(h
        .paper
        .orders()
        .iter()
        .filter(|o| o.request.order_type == OrderType::StopMarket)
        .all(|o| o.status == PaperOrderStatus::Cancelled));

    // Closed positions are inert
    assert!(h.tick(dec!(90), 400).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reentry_timeout_is_strict() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(100));
    h.tick(dec!(100.4), 0).await.unwrap();

    // Out of band for exactly the timeout: still waiting
    assert!(h.tick(dec!(100.3), 300).await.unwrap().is_empty());
    assert!(h.position().await.ledger.is_waiting_for_reentry());

    let events = h.tick(dec!(100.3), 301).await.unwrap();
    assert_eq!(
        events,
        vec![TickEvent::ReentrySkipped {
            cycle: 1,
            reason: "timeout".to_string()
        }]
    );
    let pos = h.position().await;
    let cycle = pos.ledger.current_cycle().unwrap();
    assert_eq!(cycle.reentry_state, ReentryState::Skipped);
    assert_eq!(cycle.outcome, Some(CycleOutcome::Skipped));
    assert_eq!(pos.ledger.skipped_reentries, 1);
    assert!(!pos.ledger.next_tier_blocked);
    assert_eq!(pos.remaining_quantity(), dec!(70));
}

#[tokio::test]
async fn test_small_position_escalates_to_full_close() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(0.002));
    let events = h.tick(dec!(100.4), 0).await.unwrap();
    assert!(events.contains(&TickEvent::PositionClosed {
        reason: "full_close_small_position".to_string()
    }));

    let pos = h.position().await;
    assert!(!pos.ledger.enabled);
    assert_eq!(pos.remaining_quantity(), dec!(0));
    assert_eq!(pos.ledger.cycles[0].sell_quantity, dec!(0.002));
    assert_eq!(pos.ledger.cycles[0].outcome, Some(CycleOutcome::FullCloseSmallPosition));
    assert!(!pos.ledger.needs_manual_intervention);
}

#[tokio::test]
async fn test_untradeable_position_needs_manual_intervention() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(0.0005));
    let events = h.tick(dec!(100.4), 0).await.unwrap();
    assert!(matches!(events[0], TickEvent::ManualIntervention { .. }));
    assert!(h.paper.orders().is_empty());

    let pos = h.position().await;
    assert!(pos.ledger.needs_manual_intervention);
    assert!(pos.ledger.manual_intervention_reason.contains("Cannot execute TP1 sell"));
    assert!(pos.ledger.manual_intervention_at.is_some());
    assert_eq!(pos.remaining_quantity(), dec!(0.0005));

    // Sticky: later ticks do nothing
    assert!(h.tick(dec!(101), 10).await.unwrap().is_empty());
    assert!(h.paper.orders().is_empty());

    h.engine.clear_manual_intervention(&h.id).await.unwrap();
    let status = h.engine.status(&h.id).await.unwrap();
    assert!(!status.needs_manual_intervention);
}

#[tokio::test]
async fn test_noop_tick_leaves_ledger_byte_identical() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(100));
    let before = serde_json::to_string(&h.position().await).unwrap();

    let events = h.tick(dec!(100.1), 5).await.unwrap();
    assert!(events.is_empty());
    h.engine.flush().await.unwrap();

    let after = serde_json::to_string(&h.position().await).unwrap();
    assert_eq!(before, after);
    // Only the initial save
    assert_eq!(h.store.save_count(), 1);
}

#[tokio::test]
async fn test_tier_sell_is_persisted_before_next_tick() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(100));
    h.tick(dec!(100.4), 0).await.unwrap();
    // Next tick awaits the pending save first
    h.tick(dec!(100.2), 1).await.unwrap();

    let stored = h.store.load_ledger(&h.id).await.unwrap().unwrap();
    assert_eq!(stored.ledger.tp_level_unlocked, 1);
    assert_eq!(stored.remaining_quantity(), dec!(70));
}

#[tokio::test]
async fn test_venue_fill_is_booked_as_next_tier() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(100));
    h.paper.force_position(SYMBOL, dec!(60));

    let events = h.tick(dec!(100.2), 0).await.unwrap();
    assert!(events.contains(&TickEvent::ExchangeFill {
        tier: 1,
        quantity: dec!(40)
    }));
    let pos = h.position().await;
    assert_eq!(pos.ledger.tp_level_unlocked, 1);
    assert_eq!(pos.remaining_quantity(), dec!(60));
    assert_eq!(pos.ledger.current_cycle().unwrap().reentry_quantity, dec!(32));

    // Venue flat: the position closes as an exchange close
    h.paper.force_position(SYMBOL, dec!(0));
    h.tick(dec!(100.5), 10).await.unwrap();
    let pos = h.position().await;
    assert!(!pos.ledger.enabled);
    assert_eq!(
        pos.ledger.cycles.last().and_then(|c| c.outcome),
        Some(CycleOutcome::FullCloseExchange)
    );
    // The pending buy-back was resolved, not left dangling
    assert_eq!(pos.ledger.cycles[0].reentry_state, ReentryState::Skipped);
}

#[tokio::test]
async fn test_reentry_retries_then_fails() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(100));
    h.tick(dec!(100.4), 0).await.unwrap();
    h.paper.reject_next(SYMBOL, 3);

    for attempt in 1..=2 {
        let err = h.tick(dec!(100), attempt).await.unwrap_err();
        assert!(matches!(err, EngineError::Execution(_)));
        let pos = h.position().await;
        let cycle = pos.ledger.current_cycle().unwrap();
        assert_eq!(cycle.reentry_attempts, attempt as u32);
        assert_eq!(cycle.reentry_state, ReentryState::Waiting);
    }

    assert!(h.tick(dec!(100), 3).await.is_err());
    let pos = h.position().await;
    let cycle = pos.ledger.current_cycle().unwrap();
    assert_eq!(cycle.reentry_state, ReentryState::Failed);
    assert_eq!(cycle.outcome, Some(CycleOutcome::Failed));
    assert!(!pos.ledger.next_tier_blocked);
    assert_eq!(pos.remaining_quantity(), dec!(70));
}

#[tokio::test]
async fn test_daily_budget_skips_instead_of_blocking() {
    let config = PositionOptimizationConfig {
        max_daily_reentries: 0,
        ..no_ai()
    };
    let h = Harness::new(config, SYMBOL, dec!(100));
    let events = h.tick(dec!(100.4), 0).await.unwrap();
    assert!(events.contains(&TickEvent::ReentrySkipped {
        cycle: 1,
        reason: "daily_limit".to_string()
    }));
    let pos = h.position().await;
    assert!(!pos.ledger.next_tier_blocked);
    assert!(pos.ledger.can_proceed_to_next_tier());
}

#[tokio::test]
async fn test_short_ladder_mirrors_long() {
    let h = Harness::build(no_ai(), SYMBOL, Side::Short, dec!(100), None);
    let events = h.tick(dec!(99.6), 0).await.unwrap();
    assert!(events.contains(&TickEvent::TierAdvanced {
        tier: 1,
        quantity: dec!(30),
        price: dec!(99.6)
    }));
    let pos = h.position().await;
    assert_eq!(pos.ledger.accumulated_profit, dec!(12));
    assert_eq!(h.paper.net_position(SYMBOL), dec!(-70));
}

struct DecliningAnalyzer;

#[async_trait]
impl AiAnalyzer for DecliningAnalyzer {
    fn name(&self) -> &str {
        "declining"
    }

    async fn analyze_reentry(&self, _request: &ReentryAnalysisRequest) -> anyhow::Result<ReentryDecision> {
        Ok(ReentryDecision {
            should_reenter: false,
            confidence: 0.9,
            recommended_qty_pct: 0.0,
            reasoning: "momentum exhausted".to_string(),
            market_condition: "ranging".to_string(),
            trend_aligned: false,
            risk_level: RiskLevel::High,
            timestamp: Utc::now(),
        })
    }
}

#[tokio::test]
async fn test_agents_can_decline_reentry() {
    let orchestrator = Arc::new(Orchestrator::new(
        &OrchestratorConfig::default(),
        Some(Arc::new(DecliningAnalyzer)),
    ));
    let h = Harness::build(
        PositionOptimizationConfig::default(),
        SYMBOL,
        Side::Long,
        dec!(100),
        Some(orchestrator),
    );
    h.tick(dec!(100.4), 0).await.unwrap();

    let events = h.tick(dec!(100), 5).await.unwrap();
    assert!(events.contains(&TickEvent::ReentrySkipped {
        cycle: 1,
        reason: "ai_decision".to_string()
    }));
    let pos = h.position().await;
    let cycle = pos.ledger.current_cycle().unwrap();
    assert_eq!(cycle.ai_decision.as_ref().map(|d| d.should_reenter), Some(false));
    assert_eq!(pos.remaining_quantity(), dec!(70));
}

#[tokio::test]
async fn test_resume_mid_cycle_from_store() {
    let h = Harness::new(no_ai(), SYMBOL, dec!(100));
    h.tick(dec!(100.4), 0).await.unwrap();
    h.engine.flush().await.unwrap();

    let resumed = PositionEngine::new(
        Arc::new(SharedSettings::new(no_ai())),
        h.paper.clone(),
        h.paper.clone(),
        h.store.clone(),
    );
    assert_eq!(resumed.resume_from_store().await.unwrap(), 1);
    let pos = resumed.positions().await.remove(0);
    assert_eq!(pos.id, h.id);
    assert!(pos.ledger.is_waiting_for_reentry());

    // The restored engine picks the pending buy-back up where it was left
    h.paper.set_price(SYMBOL, dec!(100));
    let report = resumed
        .monitor_at(&h.id, h.start + Duration::seconds(30))
        .await
        .unwrap();
    assert!(matches!(report.events[0], TickEvent::ReentryCompleted { cycle: 1, .. }));
    assert_eq!(resumed.status(&h.id).await.unwrap().remaining_quantity, dec!(94));
}

#[tokio::test]
async fn test_final_tranche_venue_fill_is_recorded_as_cycle() {
    let h = Harness::new(no_reentries(), SYMBOL, dec!(100));
    climb_to_final_tranche(&h).await;
    // 30 + 35 + 28 sold
    assert_eq!(h.position().await.remaining_quantity(), dec!(7));

    h.paper.force_position(SYMBOL, dec!(3.5));
    let events = h.tick(dec!(101), 30).await.unwrap();
    assert!(events.contains(&TickEvent::ExchangeFill {
        tier: 3,
        quantity: dec!(3.5)
    }));

    let pos = h.position().await;
    let ledger = &pos.ledger;
    assert_eq!(pos.remaining_quantity(), dec!(3.5));
    assert_eq!(ledger.final_tranche_quantity, dec!(3.5));
    assert_eq!(
        ledger.original_quantity - ledger.total_sold_quantity() + ledger.total_reentered_quantity(),
        pos.remaining_quantity()
    );
    let last = ledger.cycles.last().unwrap();
    assert_eq!(last.tp_level, 3);
    assert_eq!(last.sell_quantity, dec!(3.5));
    assert_eq!(last.outcome, Some(CycleOutcome::Profit));
    assert_eq!(last.outcome_reason, "exchange_fill");
    // 12 + 24.5 + 28 + 3.5
    assert_eq!(ledger.accumulated_profit, dec!(68));
}

#[tokio::test]
async fn test_untradeable_remainder_gets_no_stop_order() {
    // 0.0045 sells 0.001, 0.001 and 0.002, leaving 0.0005 under the 0.001 minimum
    let h = Harness::new(no_reentries(), SYMBOL, dec!(0.0045));
    climb_to_final_tranche(&h).await;
    let pos = h.position().await;
    assert_eq!(pos.remaining_quantity(), dec!(0.0005));
    assert!(pos.ledger.stop_order_id.is_none());
    assert!(stop_orders(&h.paper).is_empty());

    // Trailing breach with nothing tradeable: alert only
    let events = h.tick(dec!(95), 30).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], TickEvent::ManualIntervention { .. }));
    let pos = h.position().await;
    assert!(pos.ledger.needs_manual_intervention);
    assert!(pos
        .ledger
        .manual_intervention_reason
        .contains("Final tranche quantity"));
    assert_eq!(pos.remaining_quantity(), dec!(0.0005));
    assert!(stop_orders(&h.paper).is_empty());
    assert_eq!(h.paper.orders().len(), 3);
}

#[tokio::test]
async fn test_final_tranche_escalates_to_whole_remainder() {
    let mut position = Position::open(
        SYMBOL,
        Side::Long,
        dec!(100),
        dec!(0.005),
        InstrumentRules::for_symbol(SYMBOL),
        Utc::now(),
    );
    let ledger = &mut position.ledger;
    ledger.tp_level_unlocked = 3;
    ledger.final_tranche_active = true;
    ledger.final_tranche_quantity = dec!(0.0005);
    ledger.trailing_peak = dec!(101);
    ledger.trailing_percent = dec!(5);
    let h = Harness::with_position(no_ai(), position, None);

    // 5% off 101 is 95.95
    let events = h.tick(dec!(95), 10).await.unwrap();
    assert!(events.contains(&TickEvent::FinalExit {
        reason: "trailing_stop".to_string(),
        quantity: dec!(0.005),
        price: dec!(95)
    }));
    let pos = h.position().await;
    assert!(!pos.ledger.enabled);
    assert!(!pos.ledger.needs_manual_intervention);
    assert_eq!(h.paper.net_position(SYMBOL), dec!(0));
}

#[tokio::test]
async fn test_rejected_stop_keeps_previous_stop() {
    let h = Harness::new(no_reentries(), SYMBOL, dec!(100));
    climb_to_final_tranche(&h).await;
    let pos = h.position().await;
    assert_eq!(pos.ledger.dynamic_stop_price, dec!(100));
    let first = pos.ledger.stop_order_id.clone().unwrap();

    h.paper.reject_next(SYMBOL, 1);
    let err = h.tick(dec!(108), 30).await.unwrap_err();
    assert!(matches!(err, EngineError::Execution(_)));

    let pos = h.position().await;
    assert_eq!(pos.ledger.stop_order_id.as_deref(), Some(first.as_str()));
    assert_eq!(pos.ledger.dynamic_stop_price, dec!(100));
    let live: Vec<_> = stop_orders(&h.paper)
        .into_iter()
        .filter(|o| o.status == PaperOrderStatus::Resting)
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, first);

    // Next tick replaces it
    h.tick(dec!(108), 40).await.unwrap();
    let pos = h.position().await;
    assert!(pos.ledger.dynamic_stop_price > dec!(100));
    let replacement = pos.ledger.stop_order_id.clone().unwrap();
    assert_ne!(replacement, first);
    let stops = stop_orders(&h.paper);
    assert!(stops
        .iter()
        .all(|o| (o.id == replacement) == (o.status == PaperOrderStatus::Resting)));
}

#[tokio::test]
async fn test_reentry_below_minimum_size_is_skipped() {
    // TP1 sells 0.015; the 0.012 buy-back is worth 1.2 USDT
    let h = Harness::new(no_ai(), SYMBOL, dec!(0.05));
    h.tick(dec!(100.4), 0).await.unwrap();
    assert!(h.position().await.ledger.is_waiting_for_reentry());

    let events = h.tick(dec!(100), 10).await.unwrap();
    assert_eq!(
        events,
        vec![TickEvent::ReentrySkipped {
            cycle: 1,
            reason: "below_minimum_qty".to_string()
        }]
    );
    let pos = h.position().await;
    assert_eq!(pos.remaining_quantity(), dec!(0.035));
    assert!(!pos.ledger.next_tier_blocked);
    assert_eq!(h.paper.orders().len(), 1);
}

/// Approves every re-entry at a fixed size fraction
struct SizingAnalyzer {
    fraction: f64,
}

#[async_trait]
impl AiAnalyzer for SizingAnalyzer {
    fn name(&self) -> &str {
        "sizing"
    }

    async fn analyze_reentry(&self, _request: &ReentryAnalysisRequest) -> anyhow::Result<ReentryDecision> {
        Ok(ReentryDecision {
            should_reenter: true,
            confidence: 0.9,
            recommended_qty_pct: self.fraction,
            reasoning: "pullback held".to_string(),
            market_condition: "trending".to_string(),
            trend_aligned: true,
            risk_level: RiskLevel::Low,
            timestamp: Utc::now(),
        })
    }
}

#[tokio::test]
async fn test_agent_fraction_scales_reentry() {
    // Half of the 24 scheduled; fractions above 1 leave the size alone
    for (fraction, expected) in [(0.5, dec!(82)), (1.5, dec!(94))] {
        let orchestrator = Arc::new(Orchestrator::new(
            &OrchestratorConfig::default(),
            Some(Arc::new(SizingAnalyzer { fraction })),
        ));
        let h = Harness::build(
            PositionOptimizationConfig::default(),
            SYMBOL,
            Side::Long,
            dec!(100),
            Some(orchestrator),
        );
        h.tick(dec!(100.4), 0).await.unwrap();

        let events = h.tick(dec!(100), 5).await.unwrap();
        assert!(matches!(events[0], TickEvent::ReentryCompleted { cycle: 1, .. }));
        let pos = h.position().await;
        assert_eq!(pos.remaining_quantity(), expected, "fraction {}", fraction);
        assert_eq!(
            pos.ledger.cycles[0].ai_decision.as_ref().map(|d| d.recommended_qty_pct),
            Some(fraction)
        );
    }
}
