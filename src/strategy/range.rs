//! Bounded, windowed neutral grid
//!
//! The full ladder is fixed at construction. Each cycle only a window of at most
//! `max_orders` rungs around the mid price is kept on the book.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::errors::{BotError, Result};
use crate::common::quantity::{ceil_div, floor_div};
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::common::types::{Instrument, InstrumentKind, RestingOrder, Side};
use crate::config::RangeConfig;
use crate::strategy::reconciler::Reconciler;
use crate::strategy::traits::Strategy;
use crate::strategy::types::{CycleOutcome, OrderSpec, ParameterCheck, TargetLevel};

/// Range state carried between cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeState {
    /// Ladder level closest to mid on the last cycle
    pub nearest: Option<TargetLevel>,
    pub buy_levels_filled: u32,
    pub sell_levels_filled: u32,
}

pub struct RangeStrategy {
    instrument: Instrument,
    reference: Decimal,
    grid_space: Decimal,
    order_size: Decimal,
    /// Buy rungs, index 1 first
    buys: Vec<TargetLevel>,
    /// Sell rungs, index 1 first
    sells: Vec<TargetLevel>,
    max_orders: usize,
}

impl RangeStrategy {
    pub fn new(config: &RangeConfig, instrument: Instrument) -> Result<Self> {
        let check = Self::check_parameters(config);
        if !check.valid {
            return Err(BotError::Configuration(check.reason.unwrap_or_default()));
        }

        let levels = 2 * config.no_levels.div_ceil(2);
        let reference = (config.lower_price + config.upper_price) / Decimal::TWO;
        let grid_space = instrument
            .quantize_price((config.upper_price - config.lower_price) / Decimal::from(levels));
        let order_size =
            instrument.quantize_size(Decimal::TWO * config.max_position / Decimal::from(levels));
        if grid_space <= Decimal::ZERO || order_size < instrument.min_size {
            return Err(BotError::Configuration(format!(
                "range grid of {} levels is too fine for {} (space {}, size {})",
                levels, instrument.symbol, grid_space, order_size
            )));
        }

        let rung = |side: Side, index: u32| {
            let offset = Decimal::from(index) * grid_space;
            let price = match side {
                Side::Buy => reference - offset,
                Side::Sell => reference + offset,
            };
            TargetLevel::new(side, index, instrument.quantize_price(price))
        };
        let per_side = levels / 2;
        let buys = (1..=per_side).map(|i| rung(Side::Buy, i)).collect();
        let sells = (1..=per_side).map(|i| rung(Side::Sell, i)).collect();

        Ok(Self {
            instrument,
            reference,
            grid_space,
            order_size,
            buys,
            sells,
            max_orders: config.max_orders,
        })
    }

    pub fn reference_price(&self) -> Decimal {
        self.reference
    }

    pub fn grid_space(&self) -> Decimal {
        self.grid_space
    }

    pub fn order_size(&self) -> Decimal {
        self.order_size
    }

    fn rungs(&self, side: Side) -> &[TargetLevel] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }

    /// Ladder level closest to `mid`; ties go to the buy side, lowest index
    pub fn nearest_level(&self, mid: Decimal) -> Option<TargetLevel> {
        let mut best: Option<(Decimal, TargetLevel)> = None;
        for level in self.buys.iter().chain(&self.sells) {
            let distance = (mid - level.price).abs();
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, *level));
            }
        }
        best.map(|(_, level)| level)
    }

    /// Rungs allowed on the book this cycle
    pub fn window(&self, mid: Decimal) -> Vec<TargetLevel> {
        let Some(nearest) = self.nearest_level(mid) else {
            return Vec::new();
        };
        let per_side = self.max_orders.div_ceil(2) as i64;
        let centre = i64::from(nearest.index);

        let near: Vec<TargetLevel> = self
            .rungs(nearest.side)
            .iter()
            .filter(|level| {
                let i = i64::from(level.index);
                i > centre - per_side - 1 && i < centre + per_side
            })
            .copied()
            .collect();

        let budget = self.max_orders.saturating_sub(near.len());
        let far = self
            .rungs(nearest.side.opposite())
            .iter()
            .filter(|level| (level.index as usize) <= budget)
            .copied();

        let mut window: Vec<TargetLevel> = near.into_iter().chain(far).collect();
        window.sort_by_key(|level| (level.side, level.index));
        window
    }

    fn entry_orders<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> impl Iterator<Item = &'a RestingOrder> + 'a {
        snapshot
            .orders_for(&self.instrument.symbol)
            .filter(|order| order.is_entry_limit())
    }

    fn target(&self, level: &TargetLevel) -> OrderSpec {
        let take_profit = level.price + level.side.sign() * self.grid_space;
        OrderSpec::limit(&self.instrument.symbol, level.side, level.price, self.order_size)
            .with_take_profit(self.instrument.quantize_price(take_profit))
    }
}

impl Strategy for RangeStrategy {
    type Config = RangeConfig;
    type State = RangeState;

    fn name(&self) -> &'static str {
        "range"
    }

    fn check_parameters(config: &RangeConfig) -> ParameterCheck {
        ParameterCheck::require(
            InstrumentKind::from_symbol(&config.symbol) == InstrumentKind::Perpetual,
            "this bot can only be traded on perpetual markets.",
        )
        .and_then(|| {
            ParameterCheck::require(
                config.lower_price > Decimal::ZERO && config.lower_price < config.upper_price,
                "lower price must be positive and below the upper price.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(config.no_levels >= 2, "at least 2 levels are required.")
        })
        .and_then(|| {
            ParameterCheck::require(
                config.max_position > Decimal::ZERO,
                "maximum position must be positive.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(config.max_orders >= 2, "at least 2 orders must be allowed.")
        })
    }

    fn snapshot_request(&self) -> SnapshotRequest {
        SnapshotRequest::new().with_instrument(&self.instrument)
    }

    fn on_cycle(
        &self,
        _now: DateTime<Utc>,
        snapshot: &Snapshot,
        _state: Option<&RangeState>,
    ) -> Result<CycleOutcome<RangeState>> {
        let mid = snapshot.mid(&self.instrument.symbol)?;
        let position = snapshot.net_position(&self.instrument);

        let buy_filled = floor_div(position, self.order_size)
            .max(Decimal::ZERO)
            .to_u32()
            .unwrap_or_default();
        let sell_filled = (-ceil_div(position, self.order_size).min(Decimal::ZERO))
            .to_u32()
            .unwrap_or_default();

        let resting: Vec<&RestingOrder> = self.entry_orders(snapshot).collect();
        let window = self.window(mid);

        let targets: Vec<OrderSpec> = window
            .iter()
            .filter(|level| {
                let present = resting
                    .iter()
                    .any(|order| order.side == level.side && order.price == level.price);
                let price_valid = match level.side {
                    Side::Buy => level.price <= mid,
                    Side::Sell => level.price >= mid,
                };
                let filled = match level.side {
                    Side::Buy => buy_filled,
                    Side::Sell => sell_filled,
                };
                present || (price_valid && level.index > filled)
            })
            .map(|level| self.target(level))
            .collect();

        let state = RangeState {
            nearest: self.nearest_level(mid),
            buy_levels_filled: buy_filled,
            sell_levels_filled: sell_filled,
        };
        debug!(
            symbol = %self.instrument.symbol,
            mid = %mid,
            window = window.len(),
            targets = targets.len(),
            "range targets computed"
        );

        let actions = Reconciler::rungs()
            .for_instrument(&self.instrument)
            .reconcile(&targets, resting);
        Ok(CycleOutcome::new(actions, state))
    }
}
