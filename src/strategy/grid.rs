//! Direction-filtered infinite grid
//!
//! One limit order rests per open side. Levels filled are inferred from the net
//! position every cycle, so the grid recovers its ladder after a restart without
//! remembering fills.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::errors::{BotError, Result};
use crate::common::quantity::{ceil_div, floor_div, percent, pow_int};
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::common::types::{Instrument, InstrumentKind, RestingOrder, Side};
use crate::config::GridConfig;
use crate::strategy::reconciler::{cancel_all, Reconciler};
use crate::strategy::size_calculator::SizeCalculator;
use crate::strategy::traits::Strategy;
use crate::strategy::types::{
    CycleOutcome, OrderAction, OrderSpec, ParameterCheck, StopKind, StopReason, TargetLevel,
};

/// Grid state carried between cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridState {
    /// Anchor for every level offset
    pub reference_price: Decimal,
    /// Size of one rung, fixed on the first cycle
    pub unit_size: Decimal,
    pub buy_levels_filled: u32,
    pub sell_levels_filled: u32,
}

pub struct GridStrategy {
    instrument: Instrument,
    /// Level spacing as a fraction
    spacing: Decimal,
    direction: i8,
    max_investment: Decimal,
    tp_multiplier: Decimal,
    /// Rung count between the two stop-losses
    rungs: Decimal,
    /// Most filled levels a take-profit grows over
    max_levels: u32,
}

impl GridStrategy {
    pub fn new(config: &GridConfig, instrument: Instrument) -> Result<Self> {
        let check = Self::check_parameters(config);
        if !check.valid {
            return Err(BotError::Configuration(check.reason.unwrap_or_default()));
        }
        if instrument.symbol != config.symbol {
            return Err(BotError::Configuration(format!(
                "instrument {} does not match grid symbol {}",
                instrument.symbol, config.symbol
            )));
        }

        let spacing = percent(config.grid_spacing);
        let stop_loss = percent(config.stop_loss);
        let tp_multiplier = if config.direction == 0 {
            Decimal::ONE
        } else {
            config.tp_multiplier
        };

        let rungs = Decimal::TWO * stop_loss / spacing - Decimal::ONE;
        Ok(Self {
            instrument,
            spacing,
            direction: config.direction,
            max_investment: config.max_investment,
            tp_multiplier,
            rungs,
            max_levels: rungs.floor().to_u32().unwrap_or(u32::MAX),
        })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    fn direction_sign(&self) -> Decimal {
        Decimal::from(self.direction)
    }

    /// Next unfilled level on each side
    pub fn next_levels(&self, state: &GridState) -> (TargetLevel, TargetLevel) {
        let reference = state.reference_price;
        let s = self.spacing;

        let buy_index = state.buy_levels_filled + 1;
        let buy = (reference * (Decimal::ONE - s))
            .min(reference * (Decimal::ONE - Decimal::from(buy_index) * s));

        let sell_index = state.sell_levels_filled + 1;
        let sell = (reference * (Decimal::ONE + s))
            .max(reference * (Decimal::ONE + Decimal::from(sell_index) * s));

        (
            TargetLevel::new(Side::Buy, buy_index, self.instrument.quantize_price(buy)),
            TargetLevel::new(Side::Sell, sell_index, self.instrument.quantize_price(sell)),
        )
    }

    /// Stop-loss for entries on `side`, `rungs` spacings past the reference
    pub fn stop_loss(&self, side: Side, reference: Decimal) -> Decimal {
        let distance = self.rungs * self.spacing;
        let price = reference * (Decimal::ONE - side.sign() * distance);
        self.instrument.quantize_price(price)
    }

    /// Take-profit for an entry at `price`, growing with filled levels in trend mode
    ///
    /// Growth stops at the stop-loss rung. A short's take-profit stays at least one
    /// spacing above zero.
    pub fn take_profit(&self, side: Side, price: Decimal, state: &GridState) -> Result<Decimal> {
        let filled = match side {
            Side::Buy => state.buy_levels_filled,
            Side::Sell => state.sell_levels_filled,
        }
        .min(self.max_levels);
        let overflow = || {
            BotError::ConstraintViolation(format!(
                "take-profit for {} after {} filled levels is out of range",
                side, filled
            ))
        };

        let distance = pow_int(self.tp_multiplier, filled)
            .and_then(|growth| growth.checked_mul(self.spacing))
            .ok_or_else(overflow)?;
        let distance = match side {
            Side::Buy => distance,
            Side::Sell => distance.min(Decimal::ONE - self.spacing),
        };
        let target = Decimal::ONE
            .checked_add(side.sign() * distance)
            .and_then(|factor| factor.checked_mul(price))
            .filter(|target| {
                let step = self.instrument.price_step;
                step <= Decimal::ZERO || target.checked_div(step).is_some()
            })
            .ok_or_else(overflow)?;
        Ok(self
            .instrument
            .quantize_price(target)
            .max(self.instrument.price_step))
    }

    fn initial_state(&self, mid: Decimal) -> GridState {
        GridState {
            reference_price: mid,
            unit_size: SizeCalculator::grid_unit(
                self.max_investment,
                self.rungs,
                mid,
                &self.instrument,
            ),
            buy_levels_filled: 0,
            sell_levels_filled: 0,
        }
    }

    fn ladder_orders<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> impl Iterator<Item = &'a RestingOrder> + 'a {
        snapshot
            .orders_for(&self.instrument.symbol)
            .filter(|order| order.is_entry_limit())
    }

    /// Flat in trend mode: join the trend at market from a fresh reference
    fn enter_trend(
        &self,
        mid: Decimal,
        state: GridState,
        snapshot: &Snapshot,
    ) -> Result<CycleOutcome<GridState>> {
        let side = if self.direction > 0 { Side::Buy } else { Side::Sell };
        let state = GridState {
            reference_price: mid,
            buy_levels_filled: 0,
            sell_levels_filled: 0,
            ..state
        };

        let entry = OrderSpec::market(&self.instrument.symbol, side, state.unit_size)
            .with_take_profit(self.take_profit(side, mid, &state)?)
            .with_stop_loss(self.stop_loss(side, mid));

        let mut actions = cancel_all(self.ladder_orders(snapshot));
        actions.push(OrderAction::Place(entry));

        info!(
            symbol = %self.instrument.symbol,
            side = %side,
            reference = %mid,
            size = %state.unit_size,
            "grid entering trend at market"
        );
        Ok(CycleOutcome::new(actions, state))
    }

    /// Target ladder orders for the current position
    pub fn targets(&self, position: Decimal, state: &GridState) -> Result<Vec<OrderSpec>> {
        let unit = state.unit_size;
        let long = position.max(Decimal::ZERO);
        let short = position.min(Decimal::ZERO).abs();

        let mut buy_size = unit - long % unit;
        let mut sell_size = unit - short % unit;
        match self.direction {
            d if d > 0 => sell_size = Decimal::ZERO,
            d if d < 0 => buy_size = Decimal::ZERO,
            _ => {}
        }

        let (buy, sell) = self.next_levels(state);
        let mut targets = Vec::with_capacity(2);
        for (level, size) in [(sell, sell_size), (buy, buy_size)] {
            let size = self.instrument.quantize_size(size);
            if size <= Decimal::ZERO {
                continue;
            }
            targets.push(
                OrderSpec::limit(&self.instrument.symbol, level.side, level.price, size)
                    .with_take_profit(self.take_profit(level.side, level.price, state)?)
                    .with_stop_loss(self.stop_loss(level.side, state.reference_price)),
            );
        }
        Ok(targets)
    }
}

impl Strategy for GridStrategy {
    type Config = GridConfig;
    type State = GridState;

    fn name(&self) -> &'static str {
        "grid"
    }

    fn check_parameters(config: &GridConfig) -> ParameterCheck {
        ParameterCheck::require(
            config.grid_spacing > Decimal::ZERO && config.grid_spacing < Decimal::ONE_HUNDRED,
            "grid spacing must be between 0 and 100 percent.",
        )
        .and_then(|| {
            ParameterCheck::require(
                config.max_investment > Decimal::ZERO,
                "maximum investment must be positive.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                (-1..=1).contains(&config.direction),
                "direction must be -1, 0 or 1.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                config.direction > 0
                    || InstrumentKind::from_symbol(&config.symbol) == InstrumentKind::Perpetual,
                "short or bi-directional grids can only be traded on perpetual markets.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                config.stop_loss > Decimal::from(3) * config.grid_spacing,
                "stop loss is too tight for the specified grid spacing.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                config.tp_multiplier > Decimal::ZERO,
                "take-profit multiplier must be positive.",
            )
        })
    }

    fn snapshot_request(&self) -> SnapshotRequest {
        SnapshotRequest::new().with_instrument(&self.instrument)
    }

    fn on_cycle(
        &self,
        _now: DateTime<Utc>,
        snapshot: &Snapshot,
        state: Option<&GridState>,
    ) -> Result<CycleOutcome<GridState>> {
        let mid = snapshot.mid(&self.instrument.symbol)?;
        let position = snapshot.net_position(&self.instrument);

        let state = match state {
            Some(state) => state.clone(),
            None => {
                let state = self.initial_state(mid);
                if position != Decimal::ZERO {
                    return Ok(CycleOutcome::stopping(
                        Vec::new(),
                        state,
                        StopReason::bad_start(format!(
                            "a position for {} already exists",
                            self.instrument.symbol
                        )),
                    ));
                }
                if state.unit_size < self.instrument.min_size || state.unit_size <= Decimal::ZERO {
                    return Ok(CycleOutcome::stopping(
                        Vec::new(),
                        state.clone(),
                        StopReason::new(
                            StopKind::Configuration,
                            format!(
                                "grid unit {} is below the minimum order size {}",
                                state.unit_size, self.instrument.min_size
                            ),
                        ),
                    ));
                }
                info!(
                    symbol = %self.instrument.symbol,
                    reference = %state.reference_price,
                    unit = %state.unit_size,
                    rungs = %self.rungs,
                    "grid initialised"
                );
                state
            }
        };

        if self.direction != 0 {
            let sign = position.signum();
            if !sign.is_zero() && sign != self.direction_sign() {
                return Err(BotError::ConstraintViolation(format!(
                    "position {} contradicts grid direction {}",
                    position, self.direction
                )));
            }
            if position.is_zero() {
                return self.enter_trend(mid, state, snapshot);
            }
        }

        let unit = state.unit_size;
        let state = GridState {
            buy_levels_filled: floor_div(position, unit)
                .max(Decimal::ZERO)
                .to_u32()
                .unwrap_or_default(),
            sell_levels_filled: (-ceil_div(position, unit).min(Decimal::ZERO))
                .to_u32()
                .unwrap_or_default(),
            ..state
        };

        let targets = self.targets(position, &state)?;
        debug!(
            symbol = %self.instrument.symbol,
            position = %position,
            buy_filled = state.buy_levels_filled,
            sell_filled = state.sell_levels_filled,
            targets = targets.len(),
            "grid targets computed"
        );

        let actions = Reconciler::ladder()
            .for_instrument(&self.instrument)
            .reconcile(&targets, self.ladder_orders(snapshot));
        Ok(CycleOutcome::new(actions, state))
    }
}
