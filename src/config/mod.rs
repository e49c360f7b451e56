//! Configuration management for TrancheBot
//!
//! Loads from optional config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub optimization: OptimizationSettings,
    pub orchestrator: OrchestratorConfig,
    pub learning: LearningConfig,
    pub persistence: PersistenceConfig,
    pub paper: PaperConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Bot version tag for logging
    pub tag: String,
    /// Interval between monitor passes in milliseconds
    pub tick_interval_ms: u64,
    /// Stop after this many ticks (0 = run until ctrl-c)
    pub max_ticks: u64,
}

/// Raw tranche/re-entry settings; resolved into `PositionOptimizationConfig`
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationSettings {
    /// conservative | balanced | aggressive | custom
    pub profile: String,
    /// Custom ladder (used only when profile = custom)
    pub tp1_percent: f64,
    pub tp1_sell_percent: u32,
    pub tp2_percent: f64,
    pub tp2_sell_percent: u32,
    pub tp3_percent: f64,
    pub tp3_sell_percent: u32,
    /// Re-entry
    pub reentry_percent: u32,
    pub reentry_price_buffer: f64,
    pub max_reentry_attempts: u32,
    pub reentry_timeout_secs: u64,
    /// Final tranche
    pub final_trailing_percent: f64,
    /// Dynamic stop
    pub dynamic_sl_max_loss_pct: u32,
    pub dynamic_sl_protect_pct: u32,
    /// AI
    pub use_ai_decisions: bool,
    pub ai_min_confidence: f64,
    pub ai_tp_optimization: bool,
    pub ai_dynamic_sl: bool,
    /// Multi-agent
    pub use_multi_agent: bool,
    pub enable_sentiment_agent: bool,
    pub enable_risk_agent: bool,
    pub enable_tp_agent: bool,
    /// Risk limits
    pub max_cycles_per_position: u32,
    pub max_daily_reentries: u32,
    pub min_position_size_usd: f64,
    pub stop_loss_percent: f64,
}

impl OptimizationSettings {
    /// Resolve the profile and validate into an engine snapshot
    pub fn resolve(&self) -> Result<PositionOptimizationConfig> {
        let profile = match OptimizationProfile::from_str(&self.profile) {
            Some(p) => p,
            None => bail!("Unknown optimization profile '{}'", self.profile),
        };
        let ladder = match profile {
            OptimizationProfile::Custom => TierLadder::new(
                (self.tp1_percent, self.tp1_sell_percent),
                (self.tp2_percent, self.tp2_sell_percent),
                (self.tp3_percent, self.tp3_sell_percent),
            ),
            preset => preset.ladder(),
        };

        let resolved = PositionOptimizationConfig {
            profile,
            ladder,
            reentry_percent: self.reentry_percent,
            reentry_price_buffer: self.reentry_price_buffer,
            max_reentry_attempts: self.max_reentry_attempts,
            reentry_timeout_secs: self.reentry_timeout_secs,
            final_trailing_percent: self.final_trailing_percent,
            dynamic_sl_max_loss_pct: self.dynamic_sl_max_loss_pct,
            dynamic_sl_protect_pct: self.dynamic_sl_protect_pct,
            use_ai_decisions: self.use_ai_decisions,
            ai_min_confidence: self.ai_min_confidence,
            ai_tp_optimization: self.ai_tp_optimization,
            ai_dynamic_sl: self.ai_dynamic_sl,
            use_multi_agent: self.use_multi_agent,
            enable_sentiment_agent: self.enable_sentiment_agent,
            enable_risk_agent: self.enable_risk_agent,
            enable_tp_agent: self.enable_tp_agent,
            max_cycles_per_position: self.max_cycles_per_position,
            max_daily_reentries: self.max_daily_reentries,
            min_position_size_usd: self.min_position_size_usd,
            stop_loss_percent: self.stop_loss_percent,
        };
        resolved
            .validate()
            .with_context(|| format!("Invalid optimization settings (profile={})", profile))?;
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Overall bound on one multi-agent evaluation in milliseconds
    pub timeout_ms: u64,
    /// How long a synthesized decision stays cached in seconds
    pub cache_ttl_secs: u64,
}

impl OrchestratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            cache_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    /// Enable adaptive re-entry tuning
    pub enabled: bool,
    /// Trades considered per adjustment
    pub window_trades: usize,
    /// Trades required before adjusting anything
    pub min_trades: usize,
    /// Maximum re-entry percent adjustment per step
    pub max_reentry_adjust: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_trades: 20,
            min_trades: 10,
            max_reentry_adjust: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Export the cycle audit CSV on shutdown
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    /// Symbol traded by the paper session
    pub symbol: String,
    /// LONG or SHORT
    pub side: String,
    /// Entry quantity
    pub quantity: f64,
    /// Entry price (also the random walk origin)
    pub entry_price: f64,
    /// Per-tick random walk volatility in percent
    pub volatility_pct: f64,
    /// RNG seed for reproducible runs
    pub seed: u64,
    /// Optional CSV price path (column `price`) replayed instead of the random walk
    #[serde(default)]
    pub price_path_csv: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable logs
    pub json: bool,
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let defaults = PositionOptimizationConfig::default();
        let [t1, t2, t3] = defaults.ladder.tiers;

        let config = Config::builder()
            // Engine defaults
            .set_default("engine.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("engine.tick_interval_ms", 1000)?
            .set_default("engine.max_ticks", 0)?
            // Optimization defaults
            .set_default("optimization.profile", defaults.profile.to_string())?
            .set_default("optimization.tp1_percent", t1.profit_percent)?
            .set_default("optimization.tp1_sell_percent", t1.sell_percent)?
            .set_default("optimization.tp2_percent", t2.profit_percent)?
            .set_default("optimization.tp2_sell_percent", t2.sell_percent)?
            .set_default("optimization.tp3_percent", t3.profit_percent)?
            .set_default("optimization.tp3_sell_percent", t3.sell_percent)?
            .set_default("optimization.reentry_percent", defaults.reentry_percent)?
            .set_default("optimization.reentry_price_buffer", defaults.reentry_price_buffer)?
            .set_default("optimization.max_reentry_attempts", defaults.max_reentry_attempts)?
            .set_default("optimization.reentry_timeout_secs", defaults.reentry_timeout_secs)?
            .set_default("optimization.final_trailing_percent", defaults.final_trailing_percent)?
            .set_default("optimization.dynamic_sl_max_loss_pct", defaults.dynamic_sl_max_loss_pct)?
            .set_default("optimization.dynamic_sl_protect_pct", defaults.dynamic_sl_protect_pct)?
            .set_default("optimization.use_ai_decisions", defaults.use_ai_decisions)?
            .set_default("optimization.ai_min_confidence", defaults.ai_min_confidence)?
            .set_default("optimization.ai_tp_optimization", defaults.ai_tp_optimization)?
            .set_default("optimization.ai_dynamic_sl", defaults.ai_dynamic_sl)?
            .set_default("optimization.use_multi_agent", defaults.use_multi_agent)?
            .set_default("optimization.enable_sentiment_agent", defaults.enable_sentiment_agent)?
            .set_default("optimization.enable_risk_agent", defaults.enable_risk_agent)?
            .set_default("optimization.enable_tp_agent", defaults.enable_tp_agent)?
            .set_default("optimization.max_cycles_per_position", defaults.max_cycles_per_position)?
            .set_default("optimization.max_daily_reentries", defaults.max_daily_reentries)?
            .set_default("optimization.min_position_size_usd", defaults.min_position_size_usd)?
            .set_default("optimization.stop_loss_percent", defaults.stop_loss_percent)?
            // Orchestrator defaults
            .set_default("orchestrator.timeout_ms", 10_000)?
            .set_default("orchestrator.cache_ttl_secs", 30)?
            // Learning defaults
            .set_default("learning.enabled", true)?
            .set_default("learning.window_trades", 20)?
            .set_default("learning.min_trades", 10)?
            .set_default("learning.max_reentry_adjust", 20.0)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Paper session defaults
            .set_default("paper.symbol", "BTCUSDT")?
            .set_default("paper.side", "LONG")?
            .set_default("paper.quantity", 0.5)?
            .set_default("paper.entry_price", 60_000.0)?
            .set_default("paper.volatility_pct", 0.08)?
            .set_default("paper.seed", 7)?
            // Logging defaults
            .set_default("logging.json", false)?
            .set_default("logging.level", "info")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (TRANCHEBOT_*)
            .add_source(Environment::with_prefix("TRANCHEBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} profile={} reentry={}% buffer={}% timeout={}s multi_agent={} symbol={} side={}",
            self.engine.tag,
            self.optimization.profile,
            self.optimization.reentry_percent,
            self.optimization.reentry_price_buffer,
            self.optimization.reentry_timeout_secs,
            self.optimization.use_multi_agent,
            self.paper.symbol,
            self.paper.side
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
