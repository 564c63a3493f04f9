//! Strategy module: per-cycle reconciliation of target orders
//!
//! Every strategy is a pure function of one snapshot and its own persisted state.
//! It computes the orders it wants resting and lets the [`Reconciler`] diff them
//! against what the exchange already holds.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RUNNER (async)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SnapshotRequest ──► Snapshot::capture(exchange)            │
//! │    - Books, positions, resting orders, candles, funding     │
//! │    - Read once per cycle                                    │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CYCLE (sync, pure)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Strategy.on_cycle(now, snapshot, state)                    │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  Target orders ──► Reconciler ──► cancels, modifies, places │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  CycleOutcome { actions, state, stop }                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Strategy`]: Trait implemented by each strategy variant
//! - [`BotStrategy`]: Closed set of variants selected by the config `kind` tag
//! - [`Reconciler`]: Target-versus-resting diff with per-strategy policies
//! - [`SizeCalculator`]: Notional, unit and neutral-leg sizing
//! - [`CycleOutcome`]: Actions, next state and an optional stop signal

pub mod breakout;
pub mod cash_carry;
pub mod dispatch;
pub mod emac;
pub mod grid;
pub mod indicators;
pub mod range;
pub mod reconciler;
pub mod size_calculator;
pub mod traits;
pub mod twap;
pub mod types;

pub use breakout::{BreakoutState, BreakoutStrategy};
pub use cash_carry::{CashCarryState, CashCarryStrategy};
pub use dispatch::{check_parameters, BotState, BotStrategy};
pub use emac::{EmacState, EmacStrategy};
pub use grid::{GridState, GridStrategy};
pub use range::{RangeState, RangeStrategy};
pub use reconciler::{cancel_all, ReconcilePolicy, Reconciler, Replace, SizeMatch};
pub use size_calculator::{NeutralLegs, SizeCalculator};
pub use traits::Strategy;
pub use twap::{TwapState, TwapStrategy};
pub use types::{
    CycleOutcome, OrderAction, OrderSpec, ParameterCheck, StopKind, StopReason, TargetLevel,
};
