//! Resolved engine configuration
//!
//! `AppConfig` carries raw settings as loaded; everything here is the typed snapshot the
//! engine evaluates against, resolved once at load time.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// One take-profit tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Favorable move from entry that triggers the tier, in percent (0.4 = 0.4%)
    pub profit_percent: f64,
    /// Share of the remaining quantity to sell, integer percent
    pub sell_percent: u32,
}

/// The three-tier take-profit ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLadder {
    pub tiers: [TierSpec; 3],
}

impl TierLadder {
    pub const FINAL_TIER: u8 = 3;

    pub fn new(t1: (f64, u32), t2: (f64, u32), t3: (f64, u32)) -> Self {
        let spec = |(profit_percent, sell_percent)| TierSpec {
            profit_percent,
            sell_percent,
        };
        Self {
            tiers: [spec(t1), spec(t2), spec(t3)],
        }
    }

    /// Tier by 1-based level
    pub fn tier(&self, level: u8) -> Option<&TierSpec> {
        if level == 0 {
            return None;
        }
        self.tiers.get(level as usize - 1)
    }
}

impl Default for TierLadder {
    fn default() -> Self {
        OptimizationProfile::Balanced.ladder()
    }
}

/// Take-profit style; each variant owns a fixed ladder except `Custom`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationProfile {
    /// Earlier, larger first tranche
    Conservative,
    Balanced,
    /// Wider targets, smaller early tranches
    Aggressive,
    /// Ladder taken from the `tpN_*` settings
    Custom,
}

impl Default for OptimizationProfile {
    fn default() -> Self {
        OptimizationProfile::Balanced
    }
}

impl OptimizationProfile {
    /// Preset ladder for the variant. `Custom` returns the balanced ladder;
    /// callers resolve it from settings instead.
    pub fn ladder(&self) -> TierLadder {
        match self {
            OptimizationProfile::Conservative => {
                TierLadder::new((0.3, 40), (0.6, 50), (0.9, 80))
            }
            OptimizationProfile::Balanced | OptimizationProfile::Custom => {
                TierLadder::new((0.4, 30), (0.7, 50), (1.0, 80))
            }
            OptimizationProfile::Aggressive => {
                TierLadder::new((0.6, 25), (1.0, 40), (1.5, 80))
            }
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "conservative" => Some(OptimizationProfile::Conservative),
            "balanced" => Some(OptimizationProfile::Balanced),
            "aggressive" => Some(OptimizationProfile::Aggressive),
            "custom" => Some(OptimizationProfile::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for OptimizationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationProfile::Conservative => write!(f, "conservative"),
            OptimizationProfile::Balanced => write!(f, "balanced"),
            OptimizationProfile::Aggressive => write!(f, "aggressive"),
            OptimizationProfile::Custom => write!(f, "custom"),
        }
    }
}

/// Immutable per-evaluation configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionOptimizationConfig {
    pub profile: OptimizationProfile,
    pub ladder: TierLadder,

    /// Share of each sold tranche to buy back, integer percent
    pub reentry_percent: u32,
    /// Half-width of the breakeven band, percent (0.05 = 0.05%)
    pub reentry_price_buffer: f64,
    pub max_reentry_attempts: u32,
    pub reentry_timeout_secs: u64,

    /// Trailing distance from the peak for the final tranche, percent
    pub final_trailing_percent: f64,
    /// Share of total profit the dynamic stop may give back, integer percent
    pub dynamic_sl_max_loss_pct: u32,
    /// Share of total profit the dynamic stop protects, integer percent
    pub dynamic_sl_protect_pct: u32,

    pub use_ai_decisions: bool,
    pub ai_min_confidence: f64,
    pub ai_tp_optimization: bool,
    pub ai_dynamic_sl: bool,

    pub use_multi_agent: bool,
    pub enable_sentiment_agent: bool,
    pub enable_risk_agent: bool,
    pub enable_tp_agent: bool,

    pub max_cycles_per_position: u32,
    pub max_daily_reentries: u32,
    /// Minimum re-entry notional in quote currency
    pub min_position_size_usd: f64,
    /// Protective stop distance from breakeven after a re-entry, percent
    pub stop_loss_percent: f64,
}

impl Default for PositionOptimizationConfig {
    fn default() -> Self {
        Self {
            profile: OptimizationProfile::Balanced,
            ladder: OptimizationProfile::Balanced.ladder(),
            reentry_percent: 80,         // buy back 80% of each tranche
            reentry_price_buffer: 0.05,  // ±0.05% around breakeven
            max_reentry_attempts: 3,
            reentry_timeout_secs: 300,   // 5 min
            final_trailing_percent: 5.0, // 5% from peak
            dynamic_sl_max_loss_pct: 40,
            dynamic_sl_protect_pct: 60,
            use_ai_decisions: true,
            ai_min_confidence: 0.65,
            ai_tp_optimization: true,
            ai_dynamic_sl: true,
            use_multi_agent: true,
            enable_sentiment_agent: true,
            enable_risk_agent: true,
            enable_tp_agent: true,
            max_cycles_per_position: 10,
            max_daily_reentries: 50,
            min_position_size_usd: 10.0,
            stop_loss_percent: 2.0,
        }
    }
}

/// Upper bound for `reentry_timeout_secs` (one week)
pub const MAX_REENTRY_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

impl PositionOptimizationConfig {
    /// Reject values the engine cannot act on
    pub fn validate(&self) -> Result<()> {
        for (i, tier) in self.ladder.tiers.iter().enumerate() {
            if tier.profit_percent <= 0.0 {
                bail!("tp{} profit percent must be positive", i + 1);
            }
            if tier.sell_percent == 0 || tier.sell_percent > 100 {
                bail!("tp{} sell percent must be in 1..=100", i + 1);
            }
        }
        let [t1, t2, t3] = self.ladder.tiers;
        if !(t1.profit_percent < t2.profit_percent && t2.profit_percent < t3.profit_percent) {
            bail!("tier profit percents must be strictly increasing");
        }
        if self.reentry_percent == 0 || self.reentry_percent > 100 {
            bail!("reentry_percent must be in 1..=100");
        }
        if self.dynamic_sl_max_loss_pct > 100 || self.dynamic_sl_protect_pct > 100 {
            bail!("dynamic stop percents must be <= 100");
        }
        if !(0.0..=1.0).contains(&self.ai_min_confidence) {
            bail!("ai_min_confidence must be within 0..=1");
        }
        if self.final_trailing_percent <= 0.0 {
            bail!("final_trailing_percent must be positive");
        }
        if self.reentry_timeout_secs == 0 || self.reentry_timeout_secs > MAX_REENTRY_TIMEOUT_SECS {
            bail!("reentry_timeout_secs must be in 1..={}", MAX_REENTRY_TIMEOUT_SECS);
        }
        Ok(())
    }
}

/// Supplies the configuration snapshot for each evaluation
pub trait SettingsProvider: Send + Sync {
    fn snapshot(&self) -> Arc<PositionOptimizationConfig>;
}

/// Settings held in memory; `replace` swaps the snapshot for subsequent ticks
pub struct SharedSettings {
    current: RwLock<Arc<PositionOptimizationConfig>>,
}

impl SharedSettings {
    pub fn new(config: PositionOptimizationConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn replace(&self, config: PositionOptimizationConfig) {
        if let Ok(mut current) = self.current.write() {
            *current = Arc::new(config);
        }
    }
}

impl SettingsProvider for SharedSettings {
    fn snapshot(&self) -> Arc<PositionOptimizationConfig> {
        self.current
            .read()
            .map(|c| Arc::clone(&c))
            .unwrap_or_else(|_| Arc::new(PositionOptimizationConfig::default()))
    }
}
