//! EMA crossover with a trend filter and ATR stops

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::errors::{BotError, Result};
use crate::common::quantity::percent;
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::common::types::{Instrument, InstrumentKind, Side};
use crate::config::EmacConfig;
use crate::strategy::indicators::{atr, closes, crossover, ema};
use crate::strategy::size_calculator::SizeCalculator;
use crate::strategy::traits::Strategy;
use crate::strategy::types::{CycleOutcome, OrderAction, OrderSpec, ParameterCheck};

/// Crossover state carried between cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmacState {
    /// Open time of the bar last acted on
    pub last_signal: Option<DateTime<Utc>>,
}

pub struct EmacStrategy {
    instrument: Instrument,
    fast: usize,
    slow: usize,
    trend: usize,
    trade_fraction: Decimal,
    atr_stop_multiplier: Decimal,
    atr_period: usize,
    granularity: String,
    direction: i8,
}

impl EmacStrategy {
    pub fn new(config: &EmacConfig, instrument: Instrument) -> Result<Self> {
        let check = Self::check_parameters(config);
        if !check.valid {
            return Err(BotError::Configuration(check.reason.unwrap_or_default()));
        }
        Ok(Self {
            instrument,
            fast: config.fast_ema,
            slow: config.slow_ema,
            trend: config.trend_ema,
            trade_fraction: percent(config.trade_pc),
            atr_stop_multiplier: config.atr_stop_multiplier,
            atr_period: config.atr_period,
            granularity: config.granularity.clone(),
            direction: config.direction,
        })
    }

    fn history_needed(&self) -> usize {
        (2 * self.trend).max(self.slow + 1).max(self.atr_period + 1)
    }

    fn entry(
        &self,
        side: Side,
        close: Decimal,
        range: Decimal,
        snapshot: &Snapshot,
    ) -> Option<OrderSpec> {
        let budget = self.trade_fraction * snapshot.balance(&self.instrument.quote);
        let size = SizeCalculator::notional_to_size(budget, close, &self.instrument);
        if size < self.instrument.min_size {
            debug!(symbol = %self.instrument.symbol, size = %size, "entry below minimum size");
            return None;
        }
        let stop = close - side.sign() * self.atr_stop_multiplier * range;
        Some(
            OrderSpec::market(&self.instrument.symbol, side, size)
                .with_stop_loss(self.instrument.quantize_price(stop)),
        )
    }
}

impl Strategy for EmacStrategy {
    type Config = EmacConfig;
    type State = EmacState;

    fn name(&self) -> &'static str {
        "emac"
    }

    fn check_parameters(config: &EmacConfig) -> ParameterCheck {
        ParameterCheck::require(
            config.direction > 0
                || InstrumentKind::from_symbol(&config.symbol) == InstrumentKind::Perpetual,
            "short trades can only be made on perpetual markets.",
        )
        .and_then(|| {
            ParameterCheck::require(
                config.fast_ema > 0 && config.fast_ema < config.slow_ema,
                "fast EMA period must be positive and shorter than the slow period.",
            )
        })
        .and_then(|| {
            ParameterCheck::require(config.trend_ema > 0, "trend EMA period must be positive.")
        })
        .and_then(|| {
            ParameterCheck::require(
                config.trade_pc > Decimal::ZERO && config.trade_pc <= Decimal::ONE_HUNDRED,
                "trade percentage must be within (0, 100].",
            )
        })
        .and_then(|| {
            ParameterCheck::require(
                config.atr_stop_multiplier > Decimal::ZERO && config.atr_period > 0,
                "ATR stop settings must be positive.",
            )
        })
    }

    fn snapshot_request(&self) -> SnapshotRequest {
        SnapshotRequest::new()
            .with_instrument(&self.instrument)
            .with_candles(
                self.instrument.symbol.clone(),
                self.granularity.clone(),
                self.history_needed(),
            )
            .with_balance(self.instrument.quote.clone())
    }

    fn on_cycle(
        &self,
        _now: DateTime<Utc>,
        snapshot: &Snapshot,
        state: Option<&EmacState>,
    ) -> Result<CycleOutcome<EmacState>> {
        let state = state.cloned().unwrap_or_default();
        let candles = snapshot.candles(&self.instrument.symbol, &self.granularity);
        let needed = self.history_needed();
        let (Some(last), true) = (candles.last(), candles.len() >= needed) else {
            return Err(BotError::InsufficientData {
                symbol: self.instrument.symbol.clone(),
                needed,
                available: candles.len(),
            });
        };

        if state.last_signal == Some(last.time) {
            return Ok(CycleOutcome::idle(state));
        }

        let prices = closes(candles);
        let signal = crossover(&ema(&prices, self.fast), &ema(&prices, self.slow));
        let trend_ema = ema(&prices, self.trend).last().copied().unwrap_or(last.close);
        let range = atr(candles, self.atr_period).ok_or_else(|| BotError::InsufficientData {
            symbol: self.instrument.symbol.clone(),
            needed: self.atr_period + 1,
            available: candles.len(),
        })?;
        let position = snapshot.net_position(&self.instrument);
        let close = last.close;

        let order = if close > trend_ema {
            if signal > 0 && self.direction >= 0 {
                self.entry(Side::Buy, close, range, snapshot)
            } else if signal < 0 && position > Decimal::ZERO {
                Some(OrderSpec::market(&self.instrument.symbol, Side::Sell, position))
            } else {
                None
            }
        } else if signal < 0 && self.direction <= 0 {
            self.entry(Side::Sell, close, range, snapshot)
        } else if signal > 0 && position < Decimal::ZERO {
            Some(OrderSpec::market(&self.instrument.symbol, Side::Buy, position.abs()))
        } else {
            None
        };

        let Some(order) = order else {
            return Ok(CycleOutcome::idle(state));
        };
        info!(
            symbol = %self.instrument.symbol,
            side = %order.side,
            size = %order.size,
            close = %close,
            "crossover signal"
        );
        Ok(CycleOutcome::new(
            vec![OrderAction::Place(order)],
            EmacState {
                last_signal: Some(last.time),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Candle, Position};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "ETH/USDT:USDT";

    fn config(direction: i8) -> EmacConfig {
        EmacConfig {
            symbol: SYMBOL.to_string(),
            fast_ema: 2,
            slow_ema: 4,
            trend_ema: 5,
            trade_pc: dec!(10),
            atr_stop_multiplier: dec!(2),
            granularity: "1h".to_string(),
            direction,
            atr_period: 3,
        }
    }

    fn emac(direction: i8) -> EmacStrategy {
        let instrument = Instrument::new(SYMBOL, dec!(0.01), dec!(0.01), dec!(0.01));
        EmacStrategy::new(&config(direction), instrument).unwrap()
    }

    fn bars(closes: &[i64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let close = Decimal::from(*close);
                Candle {
                    time: start + Duration::hours(i as i64),
                    open: close,
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: Decimal::ZERO,
                }
            })
            .collect()
    }

    fn snapshot(closes: &[i64]) -> Snapshot {
        Snapshot::new(Utc::now())
            .with_candles(SYMBOL, "1h", bars(closes))
            .with_balance("USDT", dec!(10000))
    }

    /// Long slide then a sharp rally: fast crosses above slow on the last bar
    fn bullish_cross() -> Vec<i64> {
        vec![100, 100, 100, 100, 100, 100, 100, 99, 98, 120]
    }

    /// Long rally then a sharp drop: fast crosses below slow on the last bar
    fn bearish_cross() -> Vec<i64> {
        vec![100, 100, 100, 100, 100, 100, 100, 101, 102, 80]
    }

    #[test]
    fn test_long_entry_on_bullish_cross() {
        let emac = emac(0);
        let outcome = emac.on_cycle(Utc::now(), &snapshot(&bullish_cross()), None).unwrap();
        let spec = outcome.actions[0].spec().unwrap();
        assert_eq!(spec.side, Side::Buy);
        // 10% of 10000 at 120
        assert_eq!(spec.size, dec!(8.33));
        assert!(spec.stop_loss.unwrap() < dec!(120));
        assert!(outcome.state.last_signal.is_some());
    }

    #[test]
    fn test_same_bar_acted_on_once() {
        let emac = emac(0);
        let snap = snapshot(&bullish_cross());
        let first = emac.on_cycle(Utc::now(), &snap, None).unwrap();
        let second = emac.on_cycle(Utc::now(), &snap, Some(&first.state)).unwrap();
        assert!(second.actions.is_empty());
    }

    #[test]
    fn test_short_entry_on_bearish_cross() {
        let emac = emac(0);
        let outcome = emac.on_cycle(Utc::now(), &snapshot(&bearish_cross()), None).unwrap();
        let spec = outcome.actions[0].spec().unwrap();
        assert_eq!(spec.side, Side::Sell);
        assert!(spec.stop_loss.unwrap() > dec!(80));
    }

    #[test]
    fn test_long_only_never_opens_short() {
        let emac = emac(1);
        let snap =
            snapshot(&bearish_cross()).with_position(Position::new(SYMBOL, dec!(2), dec!(100)));
        let outcome = emac.on_cycle(Utc::now(), &snap, None).unwrap();
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn test_bearish_cross_in_up_trend_closes_long() {
        let instrument = Instrument::new(SYMBOL, dec!(0.01), dec!(0.01), dec!(0.01));
        let long_trend = EmacConfig {
            trend_ema: 20,
            ..config(1)
        };
        let emac = EmacStrategy::new(&long_trend, instrument).unwrap();
        // Steady rally, then a dip deep enough to cross fast under slow but not under trend
        let closes: Vec<i64> = (0..39).map(|i| 100 + i).chain([133]).collect();
        let snap = snapshot(&closes).with_position(Position::new(SYMBOL, dec!(2), dec!(100)));
        let outcome = emac.on_cycle(Utc::now(), &snap, None).unwrap();
        assert_eq!(
            outcome.actions,
            vec![OrderAction::Place(OrderSpec::market(SYMBOL, Side::Sell, dec!(2)))]
        );
    }

    #[test]
    fn test_insufficient_history() {
        let emac = emac(0);
        let err = emac.on_cycle(Utc::now(), &snapshot(&[100, 101, 102]), None).unwrap_err();
        assert!(matches!(err, BotError::InsufficientData { needed: 10, .. }));
    }

    #[test]
    fn test_check_parameters() {
        let spot_short = EmacConfig {
            symbol: "ETH/USDT".to_string(),
            ..config(0)
        };
        assert!(!EmacStrategy::check_parameters(&spot_short).valid);
        let inverted = EmacConfig {
            fast_ema: 5,
            slow_ema: 2,
            ..config(0)
        };
        assert!(!EmacStrategy::check_parameters(&inverted).valid);
    }
}
