use rust_decimal::Decimal;

use crate::common::errors::{BotError, Result};
use crate::common::quantity::quantize_down;
use crate::common::types::Instrument;

/// Target sizes of a delta-neutral spot/perpetual pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeutralLegs {
    /// Spot target, in tokens (long)
    pub spot: Decimal,
    /// Perpetual target, in contracts (short, negative)
    pub perp: Decimal,
    /// Tokens per perpetual contract
    pub multiplier: Decimal,
}

impl NeutralLegs {
    /// Net token exposure; zero by construction
    pub fn net_delta(&self) -> Decimal {
        self.spot + self.perp * self.multiplier
    }

    /// Wound-down targets
    pub fn flat(multiplier: Decimal) -> Self {
        Self {
            spot: Decimal::ZERO,
            perp: Decimal::ZERO,
            multiplier,
        }
    }
}

/// Order sizing utilities
///
/// Converts budgets and targets into instrument size units. Every result is
/// quantized to the instrument's size step.
pub struct SizeCalculator;

impl SizeCalculator {
    /// Size worth `value` in quote currency at `price`
    pub fn notional_to_size(value: Decimal, price: Decimal, instrument: &Instrument) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        instrument.quantize_size(value / price)
    }

    /// Grid unit size: the budget split evenly over `rungs`, priced at `reference`
    pub fn grid_unit(
        max_investment: Decimal,
        rungs: Decimal,
        reference: Decimal,
        instrument: &Instrument,
    ) -> Decimal {
        if rungs <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        Self::notional_to_size(max_investment / rungs, reference, instrument)
    }

    /// TWAP slice size, never below the instrument minimum
    ///
    /// # Arguments
    /// * `target` - Signed target position
    /// * `initial` - Signed position when execution started
    /// * `intervals` - Number of slices in the execution window
    pub fn twap_unit(
        target: Decimal,
        initial: Decimal,
        intervals: u64,
        instrument: &Instrument,
    ) -> Decimal {
        let intervals = Decimal::from(intervals.max(1));
        let slice = instrument.quantize_size((target - initial).abs() / intervals);
        slice.max(instrument.min_size)
    }

    /// Equal-and-opposite leg sizes for a cash-and-carry pair
    ///
    /// Each leg is first sized at `value` quote; the smaller token amount wins and is
    /// then trimmed until it is representable on both legs' size steps, so
    /// `spot == -perp * multiplier` holds exactly.
    pub fn neutral_legs(
        value: Decimal,
        spot_mid: Decimal,
        perp_mid: Decimal,
        spot: &Instrument,
        perp: &Instrument,
        multiplier: Decimal,
    ) -> Result<NeutralLegs> {
        if multiplier <= Decimal::ZERO {
            return Err(BotError::Configuration(format!(
                "invalid contract multiplier {} for {}",
                multiplier, perp.symbol
            )));
        }

        let spot_size = Self::notional_to_size(value, spot_mid, spot);
        let perp_size = Self::notional_to_size(value, perp_mid, perp);
        let mut tokens = spot_size.min(perp_size * multiplier);

        for _ in 0..8 {
            let contracts = quantize_down(tokens / multiplier, perp.size_step);
            if contracts <= Decimal::ZERO {
                break;
            }
            let leg_tokens = contracts * multiplier;
            if quantize_down(leg_tokens, spot.size_step) == leg_tokens {
                return Ok(NeutralLegs {
                    spot: leg_tokens,
                    perp: -contracts,
                    multiplier,
                });
            }
            tokens = quantize_down(leg_tokens, spot.size_step);
        }

        Err(BotError::Configuration(format!(
            "value {} is too small to size both {} and {}",
            value, spot.symbol, perp.symbol
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn perp() -> Instrument {
        Instrument::new("ETH/USDT:USDT", dec!(0.01), dec!(0.01), dec!(0.01))
    }

    fn spot() -> Instrument {
        Instrument::new("ETH/USDT", dec!(0.01), dec!(0.0001), dec!(0.0001))
    }

    #[test]
    fn test_grid_unit() {
        // $1000 over 19 rungs at $100 -> 0.526... units
        let unit = SizeCalculator::grid_unit(dec!(1000), dec!(19), dec!(100), &perp());
        assert_eq!(unit, dec!(0.53));
    }

    #[test]
    fn test_twap_unit() {
        let instrument = Instrument::new("BTC/USDT", dec!(0.1), dec!(1), dec!(1));
        assert_eq!(SizeCalculator::twap_unit(dec!(100), dec!(0), 10, &instrument), dec!(10));
        assert_eq!(SizeCalculator::twap_unit(dec!(-100), dec!(0), 10, &instrument), dec!(10));
        // Slice below the minimum is lifted to the minimum
        assert_eq!(SizeCalculator::twap_unit(dec!(3), dec!(0), 10, &instrument), dec!(1));
    }

    #[test]
    fn test_neutral_legs_are_equal_and_opposite() {
        let legs = SizeCalculator::neutral_legs(
            dec!(1000),
            dec!(2000),
            dec!(2001),
            &spot(),
            &perp(),
            Decimal::ONE,
        )
        .unwrap();
        assert_eq!(legs.spot, dec!(0.5));
        assert_eq!(legs.perp, dec!(-0.5));
        assert_eq!(legs.net_delta(), Decimal::ZERO);
    }

    #[test]
    fn test_neutral_legs_with_contract_multiplier() {
        let spot = Instrument::new("PEPE/USDT", dec!(0.0000001), dec!(1), dec!(1));
        let perp = Instrument::new("1000PEPE/USDT:USDT", dec!(0.0001), dec!(1), dec!(1));
        let legs = SizeCalculator::neutral_legs(
            dec!(500),
            dec!(0.00001),
            dec!(0.01),
            &spot,
            &perp,
            dec!(1000),
        )
        .unwrap();
        assert_eq!(legs.perp, dec!(-50000));
        assert_eq!(legs.spot, dec!(50000000));
        assert_eq!(legs.net_delta(), Decimal::ZERO);
    }

    #[test]
    fn test_neutral_legs_too_small() {
        let err = SizeCalculator::neutral_legs(
            dec!(1),
            dec!(2000),
            dec!(2000),
            &spot(),
            &perp(),
            Decimal::ONE,
        )
        .unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }
}
