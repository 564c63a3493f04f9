//! Gridbots Library
//!
//! Per-cycle reconciliation engine for grid, range, breakout martingale,
//! cash-and-carry, TWAP and EMA crossover strategies.

pub mod common;
pub mod config;
pub mod engine;
pub mod strategy;

// Re-export commonly used types
pub use common::errors::{BotError, Result};
pub use common::snapshot::{Snapshot, SnapshotRequest};
pub use common::traits::Exchange;
pub use common::types::{
    BookTop, Candle, Instrument, InstrumentKind, OrderKind, Position, RestingOrder, Side,
};
pub use config::types::{AppConfig, StrategyConfig};
pub use engine::{CycleReport, PaperExchange, StrategyRunner};

// Strategy types
pub use strategy::{
    check_parameters, BotState, BotStrategy, CycleOutcome, OrderAction, OrderSpec,
    ParameterCheck, Reconciler, StopKind, StopReason, Strategy,
};
