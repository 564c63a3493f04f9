//! Error types for the reconciliation engine

use thiserror::Error;

/// Result type alias using our BotError
pub type Result<T> = std::result::Result<T, BotError>;

/// Main error type for strategy and runner operations
#[derive(Error, Debug)]
pub enum BotError {
    /// Invalid parameter combination, fatal before a strategy is scheduled
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Not enough candle history for an indicator window; the cycle is skipped
    #[error("Insufficient data for {symbol}: needed {needed} candles, got {available}")]
    InsufficientData {
        symbol: String,
        needed: usize,
        available: usize,
    },

    /// Observed position contradicts a direction lock
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A value the strategy requested is absent from the cycle snapshot
    #[error("Missing snapshot data: {0}")]
    MissingData(String),

    /// Failure reported by the execution collaborator
    #[error("Execution error: {0}")]
    Execution(String),

    /// Persisted state belongs to a different strategy kind
    #[error("State mismatch: expected {expected} state, got {found}")]
    StateMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Reading or writing persisted state failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// True for errors that skip the current cycle without touching state
    pub fn is_skippable(&self) -> bool {
        matches!(self, BotError::InsufficientData { .. } | BotError::MissingData(_))
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Configuration(err.to_string())
    }
}
