//! Closed set of strategies selected by configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::errors::{BotError, Result};
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::common::types::Instrument;
use crate::config::StrategyConfig;
use crate::strategy::breakout::{BreakoutState, BreakoutStrategy};
use crate::strategy::cash_carry::{CashCarryState, CashCarryStrategy};
use crate::strategy::emac::{EmacState, EmacStrategy};
use crate::strategy::grid::{GridState, GridStrategy};
use crate::strategy::range::{RangeState, RangeStrategy};
use crate::strategy::reconciler::cancel_all;
use crate::strategy::traits::Strategy;
use crate::strategy::twap::{TwapState, TwapStrategy};
use crate::strategy::types::{CycleOutcome, ParameterCheck, StopKind, StopReason};

/// Persisted state of whichever strategy is running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BotState {
    Grid(GridState),
    Range(RangeState),
    Breakout(BreakoutState),
    CashAndCarry(CashCarryState),
    Twap(TwapState),
    Emac(EmacState),
}

impl BotState {
    pub fn kind(&self) -> &'static str {
        match self {
            BotState::Grid(_) => "grid",
            BotState::Range(_) => "range",
            BotState::Breakout(_) => "breakout",
            BotState::CashAndCarry(_) => "cash_and_carry",
            BotState::Twap(_) => "twap",
            BotState::Emac(_) => "emac",
        }
    }
}

/// A configured strategy instance
pub enum BotStrategy {
    Grid(GridStrategy),
    Range(RangeStrategy),
    Breakout(BreakoutStrategy),
    CashAndCarry(CashCarryStrategy),
    Twap(TwapStrategy),
    Emac(EmacStrategy),
}

/// Validate a strategy configuration without touching the exchange
pub fn check_parameters(config: &StrategyConfig) -> ParameterCheck {
    match config {
        StrategyConfig::Grid(c) => GridStrategy::check_parameters(c),
        StrategyConfig::Range(c) => RangeStrategy::check_parameters(c),
        StrategyConfig::Breakout(c) => BreakoutStrategy::check_parameters(c),
        StrategyConfig::CashAndCarry(c) => CashCarryStrategy::check_parameters(c),
        StrategyConfig::Twap(c) => TwapStrategy::check_parameters(c),
        StrategyConfig::Emac(c) => EmacStrategy::check_parameters(c),
    }
}

/// Run one typed strategy against the shared state envelope
fn cycle<S, U, W>(
    strategy: &S,
    now: DateTime<Utc>,
    snapshot: &Snapshot,
    state: Option<&BotState>,
    unwrap: U,
    wrap: W,
) -> Result<CycleOutcome<Option<BotState>>>
where
    S: Strategy,
    U: for<'a> Fn(&'a BotState) -> Option<&'a S::State>,
    W: FnOnce(S::State) -> BotState,
{
    let typed = match state {
        None => None,
        Some(state) => Some(unwrap(state).ok_or_else(|| BotError::StateMismatch {
            expected: strategy.name(),
            found: state.kind(),
        })?),
    };
    let outcome = strategy.on_cycle(now, snapshot, typed)?;
    Ok(outcome.map_state(|state| Some(wrap(state))))
}

impl BotStrategy {
    /// Build the configured strategy, resolving instruments from the exchange catalog
    pub fn from_config(config: &StrategyConfig, catalog: &[Instrument]) -> Result<Self> {
        let instrument = |symbol: &str| {
            catalog
                .iter()
                .find(|i| i.symbol == symbol)
                .cloned()
                .ok_or_else(|| BotError::Configuration(format!("unknown instrument {}", symbol)))
        };

        Ok(match config {
            StrategyConfig::Grid(c) => {
                BotStrategy::Grid(GridStrategy::new(c, instrument(&c.symbol)?)?)
            }
            StrategyConfig::Range(c) => {
                BotStrategy::Range(RangeStrategy::new(c, instrument(&c.symbol)?)?)
            }
            StrategyConfig::Breakout(c) => {
                BotStrategy::Breakout(BreakoutStrategy::new(c, instrument(&c.symbol)?)?)
            }
            StrategyConfig::CashAndCarry(c) => {
                BotStrategy::CashAndCarry(CashCarryStrategy::new(c, catalog)?)
            }
            StrategyConfig::Twap(c) => {
                BotStrategy::Twap(TwapStrategy::new(c, instrument(&c.symbol)?)?)
            }
            StrategyConfig::Emac(c) => {
                BotStrategy::Emac(EmacStrategy::new(c, instrument(&c.symbol)?)?)
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BotStrategy::Grid(s) => s.name(),
            BotStrategy::Range(s) => s.name(),
            BotStrategy::Breakout(s) => s.name(),
            BotStrategy::CashAndCarry(s) => s.name(),
            BotStrategy::Twap(s) => s.name(),
            BotStrategy::Emac(s) => s.name(),
        }
    }

    pub fn snapshot_request(&self) -> SnapshotRequest {
        match self {
            BotStrategy::Grid(s) => s.snapshot_request(),
            BotStrategy::Range(s) => s.snapshot_request(),
            BotStrategy::Breakout(s) => s.snapshot_request(),
            BotStrategy::CashAndCarry(s) => s.snapshot_request(),
            BotStrategy::Twap(s) => s.snapshot_request(),
            BotStrategy::Emac(s) => s.snapshot_request(),
        }
    }

    /// Run one cycle
    ///
    /// A constraint violation is turned into a stop that cancels every resting order
    /// in the snapshot; the returned state is then `None`.
    pub fn on_cycle(
        &self,
        now: DateTime<Utc>,
        snapshot: &Snapshot,
        state: Option<&BotState>,
    ) -> Result<CycleOutcome<Option<BotState>>> {
        let result = match self {
            BotStrategy::Grid(s) => cycle(
                s,
                now,
                snapshot,
                state,
                |st| match st {
                    BotState::Grid(inner) => Some(inner),
                    _ => None,
                },
                BotState::Grid,
            ),
            BotStrategy::Range(s) => cycle(
                s,
                now,
                snapshot,
                state,
                |st| match st {
                    BotState::Range(inner) => Some(inner),
                    _ => None,
                },
                BotState::Range,
            ),
            BotStrategy::Breakout(s) => cycle(
                s,
                now,
                snapshot,
                state,
                |st| match st {
                    BotState::Breakout(inner) => Some(inner),
                    _ => None,
                },
                BotState::Breakout,
            ),
            BotStrategy::CashAndCarry(s) => cycle(
                s,
                now,
                snapshot,
                state,
                |st| match st {
                    BotState::CashAndCarry(inner) => Some(inner),
                    _ => None,
                },
                BotState::CashAndCarry,
            ),
            BotStrategy::Twap(s) => cycle(
                s,
                now,
                snapshot,
                state,
                |st| match st {
                    BotState::Twap(inner) => Some(inner),
                    _ => None,
                },
                BotState::Twap,
            ),
            BotStrategy::Emac(s) => cycle(
                s,
                now,
                snapshot,
                state,
                |st| match st {
                    BotState::Emac(inner) => Some(inner),
                    _ => None,
                },
                BotState::Emac,
            ),
        };

        match result {
            Err(BotError::ConstraintViolation(message)) => {
                warn!(
                    strategy = self.name(),
                    reason = %message,
                    "constraint violated, cancelling all orders"
                );
                Ok(CycleOutcome::stopping(
                    cancel_all(snapshot.account.orders.values()),
                    None,
                    StopReason::new(StopKind::ConstraintViolation, message),
                ))
            }
            other => other,
        }
    }
}
