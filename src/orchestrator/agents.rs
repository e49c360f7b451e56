//! Built-in decision agents

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ai::{AiAnalyzer, ReentryAnalysisRequest, ReentryDecision, RiskLevel};
use crate::config::{PositionOptimizationConfig, TierLadder};
use crate::error::AgentError;
use crate::ledger::Position;
use crate::market::MarketSnapshot;
use crate::precision::{percent_of, to_decimal, to_f64};
use crate::types::{Side, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Reentry,
    Sentiment,
    Risk,
    TpTiming,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Reentry => write!(f, "reentry"),
            AgentKind::Sentiment => write!(f, "sentiment"),
            AgentKind::Risk => write!(f, "risk"),
            AgentKind::TpTiming => write!(f, "tp_timing"),
        }
    }
}

/// Everything an agent may look at; owned so agents can run on spawned tasks
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub position: Position,
    pub snapshot: MarketSnapshot,
    pub config: Arc<PositionOptimizationConfig>,
}

impl AgentContext {
    fn price(&self) -> Decimal {
        to_decimal(self.snapshot.current_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Mixed,
    Neutral,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score > 25.0 {
            SentimentLabel::Bullish
        } else if score < -25.0 {
            SentimentLabel::Bearish
        } else if score.abs() > 10.0 {
            SentimentLabel::Mixed
        } else {
            SentimentLabel::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReport {
    /// -100..=100
    pub score: f64,
    pub label: SentimentLabel,
    pub momentum: f64,
    pub volume: f64,
    pub confidence: f64,
}

impl SentimentReport {
    /// Any score leaning the position's way counts, whatever its label
    pub fn aligned_with(&self, side: Side) -> bool {
        match side {
            Side::Long => self.score > 0.0,
            Side::Short => self.score < 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub recommended_stop: Decimal,
    pub max_loss: Decimal,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpTimingReport {
    pub tier: u8,
    pub should_take: bool,
    /// Percent of the tier quantity to take now
    pub take_percent: f64,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentReport {
    Reentry(ReentryDecision),
    Sentiment(SentimentReport),
    Risk(RiskReport),
    TpTiming(TpTimingReport),
}

impl AgentReport {
    pub fn kind(&self) -> AgentKind {
        match self {
            AgentReport::Reentry(_) => AgentKind::Reentry,
            AgentReport::Sentiment(_) => AgentKind::Sentiment,
            AgentReport::Risk(_) => AgentKind::Risk,
            AgentReport::TpTiming(_) => AgentKind::TpTiming,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            AgentReport::Reentry(d) => d.confidence,
            AgentReport::Sentiment(s) => s.confidence,
            AgentReport::Risk(r) => r.confidence,
            AgentReport::TpTiming(t) => t.confidence,
        }
    }
}

#[async_trait]
pub trait DecisionAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Gate evaluated before the agent is launched
    fn enabled(&self, ctx: &AgentContext) -> bool;

    async fn analyze(&self, ctx: &AgentContext) -> Result<AgentReport, AgentError>;
}

/// Re-entry go/no-go. Asks the analyzer first when one is configured.
pub struct ReentryAgent {
    analyzer: Option<Arc<dyn AiAnalyzer>>,
}

impl ReentryAgent {
    pub fn new(analyzer: Option<Arc<dyn AiAnalyzer>>) -> Self {
        Self { analyzer }
    }

    /// Trend alignment plus RSI proximity
    pub fn heuristic(ctx: &AgentContext) -> ReentryDecision {
        let snap = &ctx.snapshot;
        let side = ctx.position.side;
        let aligned = snap.trend_5m.favors(side) || snap.trend_15m.favors(side);

        let mut confidence = 0.6;
        let mut qty_pct = 1.0;
        let mut risk_level = RiskLevel::Medium;
        let mut reasons = Vec::new();

        if aligned {
            reasons.push("trend aligned".to_string());
        } else {
            confidence = 0.4;
            risk_level = RiskLevel::High;
            reasons.push(format!(
                "trend not aligned (5m {}, 15m {})",
                snap.trend_5m, snap.trend_15m
            ));
        }

        let rsi_extreme = match side {
            Side::Long => snap.rsi14 > 75.0,
            Side::Short => snap.rsi14 < 25.0,
        };
        if rsi_extreme {
            qty_pct *= 0.5;
            reasons.push(format!("RSI {:.1} stretched against side, half size", snap.rsi14));
        }

        let should_reenter = aligned || confidence >= ctx.config.ai_min_confidence;

        ReentryDecision {
            should_reenter,
            confidence,
            recommended_qty_pct: qty_pct,
            reasoning: reasons.join("; "),
            market_condition: market_condition(snap).to_string(),
            trend_aligned: aligned,
            risk_level,
            timestamp: Utc::now(),
        }
    }

    fn request(ctx: &AgentContext) -> ReentryAnalysisRequest {
        let snap = &ctx.snapshot;
        let ledger = &ctx.position.ledger;
        let (sold_qty, reentry_qty, tp_level) = ledger
            .current_cycle()
            .map(|c| (to_f64(c.sell_quantity), to_f64(c.reentry_quantity), c.tp_level))
            .unwrap_or((0.0, 0.0, ledger.tp_level_unlocked));
        let pct_to = |level: f64| {
            if snap.current_price > 0.0 {
                (level - snap.current_price).abs() / snap.current_price * 100.0
            } else {
                0.0
            }
        };

        ReentryAnalysisRequest {
            symbol: ctx.position.symbol.clone(),
            side: ctx.position.side,
            entry_price: snap.entry_price,
            current_price: snap.current_price,
            breakeven: snap.breakeven,
            distance_from_be: snap.distance_from_be,
            tp_level,
            sold_qty,
            reentry_qty,
            reentry_percent: ctx.config.reentry_percent,
            trend_5m: snap.trend_5m,
            trend_15m: snap.trend_15m,
            trend_strength: snap.trend_strength,
            rsi: snap.rsi14,
            volume_ratio: snap.volume_ratio,
            adx: snap.adx,
            atr: snap.atr14,
            price_change_1m: snap.price_change_1m,
            price_change_5m: snap.price_change_5m,
            price_change_15m: snap.price_change_15m,
            distance_to_support: pct_to(snap.nearest_support),
            distance_to_resistance: pct_to(snap.nearest_resistance),
        }
    }
}

fn market_condition(snap: &MarketSnapshot) -> &'static str {
    if snap.adx >= 25.0 {
        "trending"
    } else if snap.trend_5m == Trend::Neutral && snap.trend_15m == Trend::Neutral {
        "ranging"
    } else {
        "choppy"
    }
}

#[async_trait]
impl DecisionAgent for ReentryAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Reentry
    }

    fn enabled(&self, ctx: &AgentContext) -> bool {
        ctx.config.use_ai_decisions && ctx.position.ledger.is_waiting_for_reentry()
    }

    async fn analyze(&self, ctx: &AgentContext) -> Result<AgentReport, AgentError> {
        if !ctx.position.ledger.is_waiting_for_reentry() {
            return Err(AgentError::Precondition("no re-entry pending".to_string()));
        }

        if let Some(analyzer) = &self.analyzer {
            match analyzer.analyze_reentry(&Self::request(ctx)).await {
                Ok(decision) => {
                    debug!(
                        analyzer = analyzer.name(),
                        should_reenter = decision.should_reenter,
                        confidence = decision.confidence,
                        "Analyzer re-entry decision"
                    );
                    return Ok(AgentReport::Reentry(decision));
                }
                Err(e) => {
                    warn!(analyzer = analyzer.name(), error = %e, "Analyzer failed, using heuristic");
                }
            }
        }

        Ok(AgentReport::Reentry(Self::heuristic(ctx)))
    }
}

pub struct SentimentAgent;

impl SentimentAgent {
    pub fn score(snap: &MarketSnapshot) -> SentimentReport {
        let trend_component = |t: Trend| match t {
            Trend::Bullish => 25.0,
            Trend::Bearish => -25.0,
            Trend::Neutral => 0.0,
        };
        let rsi_component = if snap.rsi14 > 70.0 {
            -25.0
        } else if snap.rsi14 < 30.0 {
            25.0
        } else {
            (snap.rsi14 - 50.0) / 20.0 * 25.0
        };

        let score = (trend_component(snap.trend_5m) + trend_component(snap.trend_15m) + rsi_component)
            .clamp(-100.0, 100.0);

        SentimentReport {
            score,
            label: SentimentLabel::from_score(score),
            momentum: snap.trend_strength - 50.0,
            volume: (snap.volume_ratio - 1.0) * 50.0,
            confidence: 0.6,
        }
    }
}

#[async_trait]
impl DecisionAgent for SentimentAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Sentiment
    }

    fn enabled(&self, ctx: &AgentContext) -> bool {
        ctx.config.enable_sentiment_agent
    }

    async fn analyze(&self, ctx: &AgentContext) -> Result<AgentReport, AgentError> {
        Ok(AgentReport::Sentiment(Self::score(&ctx.snapshot)))
    }
}

/// Stop recommendation for the final tranche
pub struct RiskAgent;

#[async_trait]
impl DecisionAgent for RiskAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Risk
    }

    fn enabled(&self, ctx: &AgentContext) -> bool {
        ctx.config.enable_risk_agent && ctx.position.ledger.dynamic_stop_active
    }

    async fn analyze(&self, ctx: &AgentContext) -> Result<AgentReport, AgentError> {
        let position = &ctx.position;
        let remaining = position.remaining_quantity();
        if remaining <= Decimal::ZERO {
            return Err(AgentError::Precondition("no remaining quantity".to_string()));
        }

        let price = ctx.price();
        let unrealized = position.side.pnl(position.entry_price, price, remaining);
        let total = position.ledger.accumulated_profit + unrealized;
        let max_loss = percent_of(total, ctx.config.dynamic_sl_max_loss_pct).max(Decimal::ZERO);
        let offset = max_loss / remaining;

        let snap = &ctx.snapshot;
        let (stop, reasoning) = match position.side {
            Side::Long => {
                let raw = price - offset;
                let support = to_decimal(snap.nearest_support);
                if support > Decimal::ZERO && support < price && raw < support {
                    (support, format!("stop raised to support {}", support))
                } else {
                    (raw, format!("stop risks {} of {}", max_loss, total))
                }
            }
            Side::Short => {
                let raw = price + offset;
                let resistance = to_decimal(snap.nearest_resistance);
                if resistance > price && raw > resistance {
                    (resistance, format!("stop lowered to resistance {}", resistance))
                } else {
                    (raw, format!("stop risks {} of {}", max_loss, total))
                }
            }
        };

        Ok(AgentReport::Risk(RiskReport {
            recommended_stop: position.rules.round_price_for_sl(stop, position.side),
            max_loss,
            confidence: 0.7,
            reasoning,
        }))
    }
}

/// Whether to take the next tier early
pub struct TpTimingAgent;

#[async_trait]
impl DecisionAgent for TpTimingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::TpTiming
    }

    fn enabled(&self, ctx: &AgentContext) -> bool {
        ctx.config.enable_tp_agent
            && ctx.config.ai_tp_optimization
            && ctx.position.ledger.next_tier() <= TierLadder::FINAL_TIER
    }

    async fn analyze(&self, ctx: &AgentContext) -> Result<AgentReport, AgentError> {
        let tier = ctx.position.ledger.next_tier();
        let spec = ctx
            .config
            .ladder
            .tier(tier)
            .ok_or_else(|| AgentError::Precondition(format!("no tier {} after the final tier", tier)))?;

        let snap = &ctx.snapshot;
        let side = ctx.position.side;
        let entry = snap.entry_price;
        let price = snap.current_price;
        if entry <= 0.0 || price <= 0.0 {
            return Err(AgentError::Precondition("missing prices".to_string()));
        }

        let profit_pct = match side {
            Side::Long => (price - entry) / entry * 100.0,
            Side::Short => (entry - price) / entry * 100.0,
        };
        let tp_price = match side {
            Side::Long => entry * (1.0 + spec.profit_percent / 100.0),
            Side::Short => entry * (1.0 - spec.profit_percent / 100.0),
        };
        let distance_pct = (tp_price - price).abs() / price * 100.0;
        let barrier_before_target = match side {
            Side::Long => snap.nearest_resistance > price && snap.nearest_resistance < tp_price,
            Side::Short => snap.nearest_support < price && snap.nearest_support > tp_price,
        };

        let report = if snap.volume_ratio < 0.7 && profit_pct >= spec.profit_percent * 0.7 {
            TpTimingReport {
                tier,
                should_take: true,
                take_percent: 50.0,
                confidence: 0.65,
                reasoning: format!(
                    "volume fading ({:.2}x) with {:.2}% of {:.2}% target reached",
                    snap.volume_ratio, profit_pct, spec.profit_percent
                ),
            }
        } else if distance_pct < 0.1 && barrier_before_target {
            TpTimingReport {
                tier,
                should_take: true,
                take_percent: 100.0,
                confidence: 0.75,
                reasoning: format!("{:.3}% from target with a barrier in front", distance_pct),
            }
        } else {
            TpTimingReport {
                tier,
                should_take: false,
                take_percent: 0.0,
                confidence: 0.5,
                reasoning: "hold for target".to_string(),
            }
        };

        Ok(AgentReport::TpTiming(report))
    }
}
