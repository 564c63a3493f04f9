//! Martingale breakout reversal ladder
//!
//! Opens at market in the trend direction, then keeps a flipping stop and an optional
//! take-profit on the book. Each stop-out reverses the position at `size_multiplier`
//! times its size; each take-profit shrinks it back toward the base size.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::errors::{BotError, Result};
use crate::common::quantity::percent;
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::common::types::{Instrument, InstrumentKind, Position, RestingOrder, Side};
use crate::config::BreakoutConfig;
use crate::strategy::indicators;
use crate::strategy::reconciler::{cancel_all, Reconciler};
use crate::strategy::traits::Strategy;
use crate::strategy::types::{CycleOutcome, OrderAction, OrderSpec, ParameterCheck, StopReason};

/// Candles read to detect take-profit crosses
const RATCHET_CANDLES: usize = 10;

/// Upper bound on the loss search; no real position is `m^64` times its base
const MAX_LOSSES: u32 = 64;

/// Breakout state carried between cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakoutState {
    /// Anchor for stop and take-profit; `None` until a position is seen
    pub reference_price: Option<Decimal>,
    /// Side of the position on the last cycle, 0 when unknown
    pub last_direction: i8,
    /// Absolute position size on the last cycle
    pub last_size: Decimal,
    /// Entry size of the current loop
    pub base_size: Option<Decimal>,
    pub completed_loops: u32,
    /// Losses required before a take-profit rests; forced to 0 on the final loop
    pub tp_after_loss: u32,
}

/// Protective orders for a held position
#[derive(Debug, Clone, PartialEq)]
pub struct Protection {
    pub stop_price: Decimal,
    pub stop_size: Decimal,
    pub take_profit_price: Decimal,
    /// Zero when no take-profit should rest
    pub take_profit_size: Decimal,
}

/// Consecutive losses implied by a position of `size` built from `base`
///
/// Smallest `k >= 0` with `base * multiplier^k >= size - size_step / 2`. The half
/// step absorbs partial fills; a multiplier of 1 never counts losses.
pub fn loss_count(size: Decimal, base: Decimal, multiplier: Decimal, size_step: Decimal) -> u32 {
    if multiplier <= Decimal::ONE || base <= Decimal::ZERO {
        return 0;
    }
    let threshold = size - size_step / Decimal::TWO;
    let mut level = base;
    for k in 0..MAX_LOSSES {
        if level >= threshold {
            return k;
        }
        level *= multiplier;
    }
    MAX_LOSSES
}

pub struct BreakoutStrategy {
    instrument: Instrument,
    sl_distance: Decimal,
    tp_distance: Decimal,
    size_multiplier: Decimal,
    trend_interval: String,
    trend_ema_period: usize,
    ratchet_interval: String,
    tp_after_loss: u32,
    entry_value: Decimal,
    loops: u32,
    direction: i8,
}

impl BreakoutStrategy {
    pub fn new(config: &BreakoutConfig, instrument: Instrument) -> Result<Self> {
        let check = Self::check_parameters(config);
        if !check.valid {
            return Err(BotError::Configuration(check.reason.unwrap_or_default()));
        }
        Ok(Self {
            instrument,
            sl_distance: percent(config.sl_distance_pc),
            tp_distance: percent(config.tp_distance_pc),
            size_multiplier: config.size_multiplier,
            trend_interval: config.trend_interval.clone(),
            trend_ema_period: config.trend_ema_period,
            ratchet_interval: config.ratchet_interval.clone(),
            tp_after_loss: config.tp_after_loss,
            entry_value: config.entry_value,
            loops: config.loops,
            direction: config.direction,
        })
    }

    fn fresh_state(&self) -> BreakoutState {
        BreakoutState {
            tp_after_loss: self.tp_after_loss,
            ..BreakoutState::default()
        }
    }

    fn loops_exhausted(&self, state: &BreakoutState) -> bool {
        self.loops > 0 && state.completed_loops >= self.loops
    }

    fn trend(&self, snapshot: &Snapshot) -> Result<Side> {
        let candles = snapshot.candles(&self.instrument.symbol, &self.trend_interval);
        if candles.len() < self.trend_ema_period {
            return Err(BotError::InsufficientData {
                symbol: self.instrument.symbol.clone(),
                needed: self.trend_ema_period,
                available: candles.len(),
            });
        }
        match indicators::trend(candles, self.trend_ema_period) {
            Some(1) => Ok(Side::Buy),
            _ => Ok(Side::Sell),
        }
    }

    /// Flat: stop when the loop budget is spent, otherwise enter with the trend
    fn open(
        &self,
        snapshot: &Snapshot,
        state: BreakoutState,
    ) -> Result<CycleOutcome<BreakoutState>> {
        let symbol = &self.instrument.symbol;
        let stale = cancel_all(snapshot.orders_for(symbol));

        if self.loops_exhausted(&state) {
            info!(symbol = %symbol, loops = state.completed_loops, "loop limit reached");
            return Ok(CycleOutcome::stopping(
                stale,
                state,
                StopReason::completed(format!("completed {} loops", self.loops)),
            ));
        }

        let side = self.trend(snapshot)?;
        if self.direction != 0 && side.sign() != Decimal::from(self.direction) {
            debug!(symbol = %symbol, trend = %side, "trend against direction lock, waiting");
            return Ok(CycleOutcome::idle(state));
        }

        let base = if self.entry_value.is_zero() {
            self.instrument.min_size
        } else {
            let mid = snapshot.mid(symbol)?;
            self.instrument.quantize_size(self.entry_value / mid)
        };

        let mut actions = stale;
        actions.push(OrderAction::Place(OrderSpec::market(symbol, side, base)));

        let completed_loops = state.completed_loops + 1;
        let tp_after_loss = if completed_loops == self.loops {
            0
        } else {
            state.tp_after_loss
        };
        info!(
            symbol = %symbol,
            side = %side,
            size = %base,
            loop_number = completed_loops,
            "opening breakout position"
        );

        Ok(CycleOutcome::new(
            actions,
            BreakoutState {
                reference_price: None,
                last_direction: 0,
                last_size: base,
                base_size: Some(base),
                completed_loops,
                tp_after_loss,
            },
        ))
    }

    /// Stop and take-profit for `position`, updating reference and loop count
    pub fn protection(
        &self,
        position: &Position,
        last_candle: Option<Decimal>,
        state: &mut BreakoutState,
    ) -> Protection {
        let direction = position.size.signum();
        let side_sign: i8 = if direction > Decimal::ZERO { 1 } else { -1 };
        let size = position.size.abs();

        if state.reference_price.is_none() || state.last_direction != side_sign {
            state.reference_price = Some(position.entry_price);
            state.last_direction = side_sign;
            state.last_size = size;
            info!(reference = %position.entry_price, "reference price reset on position change");
        }
        if size < state.last_size {
            state.last_size = size;
            state.completed_loops += 1;
            info!(completed = state.completed_loops, "position reduced, loop completed");
        }

        let base = *state.base_size.get_or_insert_with(|| {
            if self.entry_value.is_zero() || position.notional.is_zero() {
                self.instrument.min_size
            } else {
                self.instrument
                    .quantize_size(size / (position.notional / self.entry_value))
            }
        });

        let mut reference = state.reference_price.unwrap_or(position.entry_price);
        let mut tp_price = self
            .instrument
            .quantize_price(reference * (Decimal::ONE + direction * self.tp_distance));
        if let Some(extreme) = last_candle {
            if direction * (extreme - tp_price) > Decimal::ZERO {
                reference = tp_price;
                tp_price = self
                    .instrument
                    .quantize_price(reference * (Decimal::ONE + direction * self.tp_distance));
                info!(reference = %reference, "reference ratcheted on take-profit cross");
            }
        }
        state.reference_price = Some(reference);

        let stop_price = self
            .instrument
            .quantize_price(reference * (Decimal::ONE - direction * self.sl_distance));
        let mut stop_size = self
            .instrument
            .quantize_size((Decimal::ONE + self.size_multiplier) * size);

        let take_profit_size = if self.loops_exhausted(state) {
            let locked_in = direction * (stop_price - position.entry_price)
                > position.entry_price * self.tp_distance;
            if locked_in {
                stop_size = size;
            }
            size
        } else {
            let losses = loss_count(size, base, self.size_multiplier, self.instrument.size_step);
            if losses >= state.tp_after_loss {
                (size - base).max(Decimal::ZERO)
            } else {
                Decimal::ZERO
            }
        };

        if self.direction != 0 {
            stop_size = stop_size.min(size);
        }

        Protection {
            stop_price,
            stop_size,
            take_profit_price: tp_price,
            take_profit_size: self.instrument.quantize_size(take_profit_size),
        }
    }

    fn manage(
        &self,
        snapshot: &Snapshot,
        position: &Position,
        mut state: BreakoutState,
    ) -> Result<CycleOutcome<BreakoutState>> {
        let symbol = &self.instrument.symbol;
        if self.direction != 0 && position.size.signum() != Decimal::from(self.direction) {
            return Err(BotError::ConstraintViolation(format!(
                "position {} contradicts breakout direction {}",
                position.size, self.direction
            )));
        }

        let candles = snapshot.candles(symbol, &self.ratchet_interval);
        let last_candle = candles.last().map(|candle| {
            if position.size > Decimal::ZERO {
                candle.high
            } else {
                candle.low
            }
        });

        let protection = self.protection(position, last_candle, &mut state);
        let exit = match position.side() {
            Some(side) => side.opposite(),
            None => return Ok(CycleOutcome::idle(state)),
        };

        let mut targets = vec![OrderSpec::stop(
            symbol,
            exit,
            protection.stop_price,
            protection.stop_size,
        )];
        if protection.take_profit_size > Decimal::ZERO {
            targets.push(OrderSpec::take_profit(
                symbol,
                exit,
                protection.take_profit_price,
                protection.take_profit_size,
            ));
        }

        debug!(
            symbol = %symbol,
            stop = %protection.stop_price,
            stop_size = %protection.stop_size,
            take_profit = %protection.take_profit_price,
            take_profit_size = %protection.take_profit_size,
            "breakout protection computed"
        );

        let resting: Vec<&RestingOrder> = snapshot.orders_for(symbol).collect();
        let actions = Reconciler::protective()
            .for_instrument(&self.instrument)
            .reconcile(&targets, resting);
        Ok(CycleOutcome::new(actions, state))
    }
}

impl Strategy for BreakoutStrategy {
    type Config = BreakoutConfig;
    type State = BreakoutState;

    fn name(&self) -> &'static str {
        "breakout"
    }

    fn check_parameters(config: &BreakoutConfig) -> ParameterCheck {
        ParameterCheck::require(
            InstrumentKind::from_symbol(&config.symbol) == InstrumentKind::Perpetual,
            "this strategy is for perpetual markets only.",
        )
        .and_then(|| {
            ParameterCheck::require(
                config.sl_distance_pc > Decimal::ZERO && config.tp_distance_pc > Decimal::ZERO,
                "stop and take-profit distances must be positive.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                config.size_multiplier >= Decimal::ONE,
                "size multiplier must be at least 1.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                config.trend_ema_period > 0,
                "trend EMA period must be positive.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                config.entry_value >= Decimal::ZERO,
                "entry value cannot be negative.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                (-1..=1).contains(&config.direction),
                "direction must be -1, 0 or 1.",
            )
        })
    }

    fn snapshot_request(&self) -> SnapshotRequest {
        SnapshotRequest::new()
            .with_instrument(&self.instrument)
            .with_candles(
                self.instrument.symbol.clone(),
                self.trend_interval.clone(),
                self.trend_ema_period * 3,
            )
            .with_candles(
                self.instrument.symbol.clone(),
                self.ratchet_interval.clone(),
                RATCHET_CANDLES,
            )
    }

    fn on_cycle(
        &self,
        _now: DateTime<Utc>,
        snapshot: &Snapshot,
        state: Option<&BreakoutState>,
    ) -> Result<CycleOutcome<BreakoutState>> {
        let state = state.cloned().unwrap_or_else(|| self.fresh_state());
        match snapshot.position(&self.instrument.symbol) {
            Some(position) => self.manage(snapshot, position, state),
            None => self.open(snapshot, state),
        }
    }
}
