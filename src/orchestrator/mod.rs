//! Multi-agent decision orchestrator
//!
//! Gated agents run concurrently on spawned tasks under one overall deadline. Agents that
//! fail or miss the deadline are excluded and the decision is synthesized from what came
//! back.

pub mod agents;
mod cache;

pub use agents::{
    AgentContext, AgentKind, AgentReport, DecisionAgent, ReentryAgent, RiskAgent, RiskReport,
    SentimentAgent, SentimentLabel, SentimentReport, TpTimingAgent, TpTimingReport,
};
pub use cache::DecisionCache;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ai::{AiAnalyzer, ReentryDecision, RiskLevel};
use crate::config::{OrchestratorConfig, PositionOptimizationConfig};
use crate::ledger::Position;
use crate::market::MarketSnapshot;
use crate::types::Side;

/// Agents that could contribute an agreement
const AGENT_COUNT: u8 = 4;

/// Advisory summary for status and logs; the engine acts on the agent reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Hold,
    ExecuteReentry,
    TakeProfit,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionAction::Hold => write!(f, "hold"),
            DecisionAction::ExecuteReentry => write!(f, "execute_reentry"),
            DecisionAction::TakeProfit => write!(f, "take_profit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent: AgentKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorDecision {
    pub action: DecisionAction,
    pub reentry: Option<ReentryDecision>,
    pub sentiment: Option<SentimentReport>,
    pub risk: Option<RiskReport>,
    pub tp_timing: Option<TpTimingReport>,
    /// 0..=4
    pub agreement: u8,
    pub agents_reported: usize,
    pub failures: Vec<AgentFailure>,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub reasoning: String,
    pub next_check_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl OrchestratorDecision {
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Hold,
            reentry: None,
            sentiment: None,
            risk: None,
            tp_timing: None,
            agreement: 0,
            agents_reported: 0,
            failures: Vec::new(),
            risk_level: RiskLevel::High,
            confidence: 0.5,
            reasoning: reasoning.into(),
            next_check_secs: 30,
            timestamp: Utc::now(),
        }
    }

    /// Merge agent reports into one action
    pub fn synthesize(
        side: Side,
        reports: Vec<AgentReport>,
        failures: Vec<AgentFailure>,
    ) -> Self {
        let mut decision = Self::hold(String::new());
        decision.agents_reported = reports.len();
        decision.failures = failures;

        let confidence_sum: f64 = reports.iter().map(|r| r.confidence()).sum();
        if !reports.is_empty() {
            decision.confidence = confidence_sum / reports.len() as f64;
        }

        let mut agreement = 0u8;
        for report in reports {
            match report {
                AgentReport::Reentry(d) => {
                    if d.should_reenter {
                        agreement += 1;
                        if decision.action == DecisionAction::Hold {
                            decision.action = DecisionAction::ExecuteReentry;
                        }
                    }
                    decision.reentry = Some(d);
                }
                AgentReport::Sentiment(s) => {
                    if s.aligned_with(side) {
                        agreement += 1;
                    }
                    decision.sentiment = Some(s);
                }
                AgentReport::Risk(r) => {
                    if r.confidence > 0.7 {
                        agreement += 1;
                    }
                    decision.risk = Some(r);
                }
                AgentReport::TpTiming(t) => {
                    if t.should_take {
                        agreement += 1;
                        decision.action = DecisionAction::TakeProfit;
                    }
                    decision.tp_timing = Some(t);
                }
            }
        }

        decision.agreement = agreement;
        decision.risk_level = RiskLevel::from_agreement(agreement);
        decision.next_check_secs = match decision.action {
            DecisionAction::Hold => 30,
            _ => 5,
        };
        decision.reasoning = format!(
            "{}/{} agents agree on {} ({} reported, {} failed)",
            agreement,
            AGENT_COUNT,
            decision.action,
            decision.agents_reported,
            decision.failures.len()
        );
        decision
    }
}

pub struct Orchestrator {
    agents: Vec<Arc<dyn DecisionAgent>>,
    cache: DecisionCache,
    timeout: Duration,
}

impl Orchestrator {
    /// The four built-in agents
    pub fn new(config: &OrchestratorConfig, analyzer: Option<Arc<dyn AiAnalyzer>>) -> Self {
        let agents: Vec<Arc<dyn DecisionAgent>> = vec![
            Arc::new(ReentryAgent::new(analyzer)),
            Arc::new(SentimentAgent),
            Arc::new(RiskAgent),
            Arc::new(TpTimingAgent),
        ];
        Self::with_agents(config, agents)
    }

    pub fn with_agents(config: &OrchestratorConfig, agents: Vec<Arc<dyn DecisionAgent>>) -> Self {
        Self {
            agents,
            cache: DecisionCache::new(config.cache_ttl()),
            timeout: config.timeout(),
        }
    }

    pub async fn process(
        &self,
        position: &Position,
        snapshot: &MarketSnapshot,
        config: Arc<PositionOptimizationConfig>,
    ) -> OrchestratorDecision {
        let multi_agent = config.use_multi_agent;
        let ctx = Arc::new(AgentContext {
            position: position.clone(),
            snapshot: snapshot.clone(),
            config,
        });

        if !multi_agent {
            let reports = self
                .agents
                .iter()
                .filter(|a| a.kind() == AgentKind::Reentry && a.enabled(&ctx))
                .map(|_| AgentReport::Reentry(ReentryAgent::heuristic(&ctx)))
                .collect();
            return OrchestratorDecision::synthesize(position.side, reports, Vec::new());
        }

        let key = DecisionCache::key(&position.symbol, position.side, position.ledger.current_cycle);
        if let Some(cached) = self.cache.get(&key) {
            debug!(key = %key, action = %cached.action, "Orchestrator cache hit");
            return cached;
        }

        let active: Vec<Arc<dyn DecisionAgent>> = self
            .agents
            .iter()
            .filter(|a| a.enabled(&ctx))
            .cloned()
            .collect();

        let results: Arc<Mutex<Vec<(AgentKind, Result<AgentReport, String>)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(active.len())));

        let mut handles: Vec<_> = active
            .iter()
            .map(|agent| {
                let agent = Arc::clone(agent);
                let ctx = Arc::clone(&ctx);
                let results = Arc::clone(&results);
                tokio::spawn(async move {
                    let outcome = agent.analyze(&ctx).await.map_err(|e| e.to_string());
                    results.lock().await.push((agent.kind(), outcome));
                })
            })
            .collect();

        let timed_out = match tokio::time::timeout(self.timeout, join_all(handles.iter_mut())).await {
            Ok(joined) => {
                for res in joined {
                    if let Err(e) = res {
                        warn!(error = %e, "Agent task ended abnormally");
                    }
                }
                false
            }
            Err(_) => {
                for handle in &handles {
                    handle.abort();
                }
                true
            }
        };

        let collected = std::mem::take(&mut *results.lock().await);
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for (kind, outcome) in collected {
            match outcome {
                Ok(report) => reports.push(report),
                Err(error) => {
                    warn!(agent = %kind, symbol = %position.symbol, error = %error, "Agent failed");
                    failures.push(AgentFailure { agent: kind, error });
                }
            }
        }

        // Launched agents that never reported
        for agent in &active {
            let kind = agent.kind();
            let reported = reports.iter().any(|r| r.kind() == kind)
                || failures.iter().any(|f| f.agent == kind);
            if !reported {
                failures.push(AgentFailure {
                    agent: kind,
                    error: if timed_out {
                        format!("timed out after {}ms", self.timeout.as_millis())
                    } else {
                        "task aborted".to_string()
                    },
                });
            }
        }

        let decision = OrchestratorDecision::synthesize(position.side, reports, failures);
        info!(
            symbol = %position.symbol,
            side = %position.side,
            action = %decision.action,
            agreement = decision.agreement,
            reported = decision.agents_reported,
            confidence = format!("{:.2}", decision.confidence),
            risk = %decision.risk_level,
            "🤖 Orchestrator decision"
        );

        self.cache.insert(key, decision.clone());
        decision
    }

    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }
}
