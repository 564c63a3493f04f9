//! Cycle driving and the in-memory paper exchange

pub mod paper;
pub mod runner;

pub use paper::PaperExchange;
pub use runner::{load_state, CycleReport, ExecutionFailure, StrategyRunner};
