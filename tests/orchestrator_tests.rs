//! Multi-agent orchestration: deadlines, failures and caching

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tranchebot::ai::{ReentryDecision, RiskLevel};
use tranchebot::config::{OrchestratorConfig, PositionOptimizationConfig};
use tranchebot::error::AgentError;
use tranchebot::ledger::{Position, ReentryCycle, ReentryState};
use tranchebot::market::MarketSnapshot;
use tranchebot::orchestrator::{
    AgentContext, AgentKind, AgentReport, DecisionAgent, Orchestrator, RiskReport, SentimentAgent,
    TpTimingAgent,
};
use tranchebot::precision::InstrumentRules;
use tranchebot::types::Side;

fn position() -> Position {
    Position::open(
        "BTCUSDT",
        Side::Long,
        dec!(100),
        dec!(1),
        InstrumentRules::for_symbol("BTCUSDT"),
        Utc::now(),
    )
}

fn snapshot(position: &Position) -> MarketSnapshot {
    MarketSnapshot::from_candles(position, 100.0, &[], &[], &[], &[])
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        timeout_ms: 100,
        cache_ttl_secs: 30,
    }
}

/// Always-on re-entry voter that counts its calls
#[derive(Default)]
struct CountingReentry {
    calls: AtomicUsize,
}

#[async_trait]
impl DecisionAgent for CountingReentry {
    fn kind(&self) -> AgentKind {
        AgentKind::Reentry
    }

    fn enabled(&self, _ctx: &AgentContext) -> bool {
        true
    }

    async fn analyze(&self, _ctx: &AgentContext) -> Result<AgentReport, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AgentReport::Reentry(ReentryDecision {
            should_reenter: true,
            confidence: 0.8,
            recommended_qty_pct: 1.0,
            reasoning: "test".to_string(),
            market_condition: "trending".to_string(),
            trend_aligned: true,
            risk_level: RiskLevel::Low,
            timestamp: Utc::now(),
        }))
    }
}

/// Risk agent that never answers within the deadline
struct SlowRisk;

#[async_trait]
impl DecisionAgent for SlowRisk {
    fn kind(&self) -> AgentKind {
        AgentKind::Risk
    }

    fn enabled(&self, _ctx: &AgentContext) -> bool {
        true
    }

    async fn analyze(&self, _ctx: &AgentContext) -> Result<AgentReport, AgentError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(AgentReport::Risk(RiskReport {
            recommended_stop: dec!(99),
            max_loss: dec!(1),
            confidence: 0.9,
            reasoning: "late".to_string(),
        }))
    }
}

struct OfflineRisk;

#[async_trait]
impl DecisionAgent for OfflineRisk {
    fn kind(&self) -> AgentKind {
        AgentKind::Risk
    }

    fn enabled(&self, _ctx: &AgentContext) -> bool {
        true
    }

    async fn analyze(&self, _ctx: &AgentContext) -> Result<AgentReport, AgentError> {
        Err(AgentError::Analyzer("offline".to_string()))
    }
}

#[tokio::test]
async fn test_slow_agent_is_dropped_at_deadline() {
    let agents: Vec<Arc<dyn DecisionAgent>> = vec![
        Arc::new(CountingReentry::default()),
        Arc::new(SentimentAgent),
        Arc::new(SlowRisk),
        Arc::new(TpTimingAgent),
    ];
    let orchestrator = Orchestrator::with_agents(&config(), agents);
    let pos = position();

    let started = Instant::now();
    let decision = orchestrator
        .process(&pos, &snapshot(&pos), Arc::new(PositionOptimizationConfig::default()))
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(decision.agents_reported, 3);
    assert!(decision.risk.is_none());
    assert!(decision.reentry.is_some());
    assert_eq!(decision.failures.len(), 1);
    assert_eq!(decision.failures[0].agent, AgentKind::Risk);
    assert!(decision.failures[0].error.contains("timed out"));
}

#[tokio::test]
async fn test_failed_agent_is_excluded_from_agreement() {
    let agents: Vec<Arc<dyn DecisionAgent>> =
        vec![Arc::new(CountingReentry::default()), Arc::new(OfflineRisk)];
    let orchestrator = Orchestrator::with_agents(&config(), agents);
    let pos = position();
    let decision = orchestrator
        .process(&pos, &snapshot(&pos), Arc::new(PositionOptimizationConfig::default()))
        .await;

    assert_eq!(decision.agents_reported, 1);
    assert_eq!(decision.agreement, 1);
    assert_eq!(decision.risk_level, RiskLevel::High);
    assert_eq!(decision.failures[0].agent, AgentKind::Risk);
    assert!(decision.failures[0].error.contains("offline"));
    assert!(decision.reasoning.contains("1 failed"));
}

#[tokio::test]
async fn test_decision_is_cached_per_cycle() {
    let counter = Arc::new(CountingReentry::default());
    let agents: Vec<Arc<dyn DecisionAgent>> = vec![counter.clone() as Arc<dyn DecisionAgent>];
    let orchestrator = Orchestrator::with_agents(&config(), agents);
    let pos = position();
    let cfg = Arc::new(PositionOptimizationConfig::default());

    let first = orchestrator.process(&pos, &snapshot(&pos), Arc::clone(&cfg)).await;
    let second = orchestrator.process(&pos, &snapshot(&pos), Arc::clone(&cfg)).await;
    assert_eq!(first, second);
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.cached_decisions(), 1);

    // A new cycle is a new key
    let mut next = pos.clone();
    next.ledger.current_cycle = 1;
    orchestrator.process(&next, &snapshot(&next), cfg).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.cached_decisions(), 2);
}

#[test]
fn test_single_agent_mode_uses_heuristic_only() {
    let orchestrator = Orchestrator::new(&config(), None);
    let mut pos = position();
    let mut cycle = ReentryCycle::from_sell(1, 1, Side::Long, dec!(100.4), dec!(0.3), dec!(0.12), Utc::now());
    cycle.reentry_state = ReentryState::Waiting;
    cycle.reentry_target_price = dec!(100);
    pos.ledger.push_cycle(cycle);
    pos.ledger.next_tier_blocked = true;

    let cfg = Arc::new(PositionOptimizationConfig {
        use_multi_agent: false,
        ..Default::default()
    });
    let decision = tokio_test::block_on(orchestrator.process(&pos, &snapshot(&pos), cfg));

    assert_eq!(decision.agents_reported, 1);
    assert!(decision.reentry.is_some());
    assert!(decision.sentiment.is_none());
    assert!(decision.failures.is_empty());
    // Single-agent decisions bypass the cache
    assert_eq!(orchestrator.cached_decisions(), 0);
}
