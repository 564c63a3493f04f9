//! Linear time-weighted execution toward a target position

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::errors::{BotError, Result};
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::common::types::{Instrument, Side};
use crate::config::TwapConfig;
use crate::strategy::size_calculator::SizeCalculator;
use crate::strategy::traits::Strategy;
use crate::strategy::types::{CycleOutcome, OrderAction, OrderSpec, ParameterCheck, StopReason};

/// TWAP state carried between cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwapState {
    /// Position when execution started
    pub initial_position: Decimal,
    /// Slice size, fixed on the first cycle
    pub unit_size: Decimal,
    pub started_at: DateTime<Utc>,
}

pub struct TwapStrategy {
    instrument: Instrument,
    target: Decimal,
    intervals: u64,
}

impl TwapStrategy {
    pub fn new(config: &TwapConfig, instrument: Instrument) -> Result<Self> {
        let check = Self::check_parameters(config);
        if !check.valid {
            return Err(BotError::Configuration(check.reason.unwrap_or_default()));
        }
        Ok(Self {
            instrument,
            target: config.target,
            intervals: config.duration_secs / config.interval_secs,
        })
    }

    pub fn intervals(&self) -> u64 {
        self.intervals
    }
}

impl Strategy for TwapStrategy {
    type Config = TwapConfig;
    type State = TwapState;

    fn name(&self) -> &'static str {
        "twap"
    }

    fn check_parameters(config: &TwapConfig) -> ParameterCheck {
        ParameterCheck::require(config.interval_secs > 0, "interval must be positive.").and_then(
            || {
                ParameterCheck::require(
                    config.duration_secs >= config.interval_secs,
                    "duration must be at least one interval.",
                )
            },
        )
    }

    fn snapshot_request(&self) -> SnapshotRequest {
        SnapshotRequest::new().with_instrument(&self.instrument)
    }

    fn on_cycle(
        &self,
        now: DateTime<Utc>,
        snapshot: &Snapshot,
        state: Option<&TwapState>,
    ) -> Result<CycleOutcome<TwapState>> {
        let position = snapshot.net_position(&self.instrument);
        let state = match state {
            Some(state) => state.clone(),
            None => {
                let unit_size = SizeCalculator::twap_unit(
                    self.target,
                    position,
                    self.intervals,
                    &self.instrument,
                );
                info!(
                    symbol = %self.instrument.symbol,
                    target = %self.target,
                    initial = %position,
                    unit = %unit_size,
                    intervals = self.intervals,
                    "twap execution started"
                );
                TwapState {
                    initial_position: position,
                    unit_size,
                    started_at: now,
                }
            }
        };

        let delta = self.target - position;
        if delta.abs() < self.instrument.min_size {
            let elapsed = (now - state.started_at).num_seconds();
            let traded = position - state.initial_position;
            info!(
                symbol = %self.instrument.symbol,
                position = %position,
                traded = %traded,
                elapsed_secs = elapsed,
                "twap target reached"
            );
            let message = format!(
                "reached target position {} from {} in {}s",
                self.target, state.initial_position, elapsed
            );
            return Ok(CycleOutcome::stopping(
                Vec::new(),
                state,
                StopReason::completed(message),
            ));
        }

        let Some(side) = Side::from_sign(delta) else {
            return Ok(CycleOutcome::idle(state));
        };
        let remaining = self.instrument.quantize_size(delta.abs());
        let size = state.unit_size.min(remaining);
        debug!(symbol = %self.instrument.symbol, side = %side, size = %size, "twap slice");

        let order = OrderSpec::market(&self.instrument.symbol, side, size);
        Ok(CycleOutcome::new(vec![OrderAction::Place(order)], state))
    }
}
