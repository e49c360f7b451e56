//! TrancheBot Library
//!
//! Tranche take-profit and re-entry position engine for leveraged futures

pub mod ai;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod learning;
pub mod ledger;
pub mod market;
pub mod orchestrator;
pub mod persistence;
pub mod precision;
pub mod risk;
pub mod types;

pub use engine::{PositionEngine, TickEvent, TickReport};
pub use error::{EngineError, EngineResult};
pub use ledger::{Position, PositionLedger};
