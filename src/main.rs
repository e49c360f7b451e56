//! TrancheBot paper session
//!
//! Opens one position on the paper venue, drives it tick by tick from a CSV price path or a
//! seeded random walk, and persists ledgers as it goes. Ctrl-C stops cleanly.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tranchebot::config::{AppConfig, LoggingConfig, SharedSettings};
use tranchebot::exchange::paper::{load_price_path, RandomWalk};
use tranchebot::exchange::PaperExchange;
use tranchebot::learning::AdaptiveLearner;
use tranchebot::ledger::Position;
use tranchebot::orchestrator::Orchestrator;
use tranchebot::persistence::{export_cycles, JsonLedgerStore};
use tranchebot::precision::{to_decimal, InstrumentRules};
use tranchebot::types::Side;
use tranchebot::PositionEngine;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn signed(side: Side, quantity: Decimal) -> Decimal {
    match side {
        Side::Long => quantity,
        Side::Short => -quantity,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging);
    info!("🚀 TrancheBot starting: {}", config);

    let optimization = config.optimization.resolve()?;
    optimization.validate()?;
    info!(
        profile = %optimization.profile,
        ladder = ?optimization.ladder.tiers,
        reentry_pct = optimization.reentry_percent,
        "Tranche profile resolved"
    );

    let side = Side::from_str(&config.paper.side)
        .ok_or_else(|| anyhow!("Invalid paper side: {}", config.paper.side))?;
    let symbol = config.paper.symbol.clone();
    let rules = InstrumentRules::for_symbol(&symbol);
    let entry = rules.round_price(to_decimal(config.paper.entry_price));
    let quantity = rules.round_quantity(to_decimal(config.paper.quantity));

    let mut prices: Box<dyn Iterator<Item = Decimal> + Send> = match &config.paper.price_path_csv {
        Some(path) => Box::new(load_price_path(Path::new(path))?.into_iter()),
        None => Box::new(RandomWalk::new(
            config.paper.entry_price,
            config.paper.volatility_pct,
            config.paper.seed,
        )),
    };

    let data_dir = PathBuf::from(&config.persistence.data_dir);
    let store = Arc::new(
        JsonLedgerStore::new(&data_dir)
            .with_context(|| format!("Failed to open ledger store in {}", data_dir.display()))?,
    );

    let learner = Arc::new(
        AdaptiveLearner::new(config.learning.clone(), &optimization)
            .with_state_file(data_dir.join("learning_state.json")),
    );
    if let Err(e) = learner.load_state() {
        warn!(error = %e, "Starting with fresh learning state");
    }

    let paper = Arc::new(PaperExchange::new());
    paper.set_price(&symbol, entry);

    let orchestrator = Arc::new(Orchestrator::new(&config.orchestrator, None));
    let engine = PositionEngine::new(
        Arc::new(SharedSettings::new(optimization)),
        paper.clone(),
        paper.clone(),
        store,
    )
    .with_orchestrator(orchestrator)
    .with_learner(learner.clone());

    let resumed = engine.resume_from_store().await?;
    if resumed > 0 {
        for position in engine.positions().await {
            paper.force_position(&position.symbol, signed(position.side, position.remaining_quantity()));
        }
        info!(resumed, "Resumed stored positions");
    } else {
        let position = Position::open(&symbol, side, entry, quantity, rules, Utc::now());
        paper.force_position(&symbol, signed(side, quantity));
        engine.add_position(position)?;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(config.engine.tick_interval_ms.max(1)));
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(price) = prices.next() else {
                    info!(ticks, "Price path exhausted");
                    break;
                };
                paper.set_price(&symbol, price);
                engine.monitor_all().await;
                ticks += 1;

                let open = engine.statuses().await.iter().filter(|s| s.enabled).count();
                if open == 0 {
                    info!(ticks, "All positions closed");
                    break;
                }
                if config.engine.max_ticks > 0 && ticks >= config.engine.max_ticks {
                    info!(ticks, "Tick limit reached");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
        }
    }

    engine.flush().await?;
    learner.save_state().await?;

    for status in engine.statuses().await {
        info!(
            position_id = %status.position_id,
            symbol = %status.symbol,
            tier = status.tp_level_unlocked,
            remaining = %status.remaining_quantity,
            breakeven = %status.breakeven,
            accumulated = %status.accumulated_profit,
            cycles = status.cycles,
            manual = status.needs_manual_intervention,
            "📊 Final position status"
        );
    }

    if config.persistence.csv_enabled {
        let path = data_dir.join("cycles.csv");
        export_cycles(&path, &engine.positions().await)?;
    }

    info!("👋 TrancheBot stopped");
    Ok(())
}
