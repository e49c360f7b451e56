//! Error types for the position engine and its collaborators

use thiserror::Error;

/// Errors surfaced by the execution collaborator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unknown order {0}")]
    UnknownOrder(String),

    #[error("No price available for {0}")]
    NoPrice(String),
}

/// Errors surfaced by ledger persistence
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Background save failed: {0}")]
    Join(String),
}

/// Errors reported by a single orchestrator agent
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    #[error("Precondition not met: {0}")]
    Precondition(String),

    #[error("Analyzer unavailable: {0}")]
    Analyzer(String),
}

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExchangeError),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Invalid tier {0}")]
    InvalidTier(u8),
}

pub type EngineResult<T> = Result<T, EngineError>;
