//! Optional AI market-analysis provider
//!
//! The re-entry agent asks an `AiAnalyzer` first when one is configured and falls back to
//! its own heuristic on absence or error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Side, Trend};

/// Qualitative risk label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Medium
    }
}

impl RiskLevel {
    /// Label derived from how many agents agreed
    pub fn from_agreement(agreeing: u8) -> Self {
        match agreeing {
            n if n >= 3 => RiskLevel::Low,
            2 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Whether (and how much) to buy back a sold tranche
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReentryDecision {
    pub should_reenter: bool,
    pub confidence: f64,
    /// Fraction of the planned re-entry quantity, (0, 1]
    pub recommended_qty_pct: f64,
    pub reasoning: String,
    pub market_condition: String,
    pub trend_aligned: bool,
    pub risk_level: RiskLevel,
    pub timestamp: DateTime<Utc>,
}

/// Inputs handed to the analyzer
#[derive(Debug, Clone, Serialize)]
pub struct ReentryAnalysisRequest {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub current_price: f64,
    pub breakeven: f64,
    /// Percent distance from breakeven
    pub distance_from_be: f64,
    pub tp_level: u8,
    pub sold_qty: f64,
    pub reentry_qty: f64,
    pub reentry_percent: u32,
    pub trend_5m: Trend,
    pub trend_15m: Trend,
    pub trend_strength: f64,
    pub rsi: f64,
    pub volume_ratio: f64,
    pub adx: f64,
    pub atr: f64,
    pub price_change_1m: f64,
    pub price_change_5m: f64,
    pub price_change_15m: f64,
    pub distance_to_support: f64,
    pub distance_to_resistance: f64,
}

#[async_trait]
pub trait AiAnalyzer: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    async fn analyze_reentry(&self, request: &ReentryAnalysisRequest) -> anyhow::Result<ReentryDecision>;
}
