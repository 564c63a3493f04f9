//! Exact step quantization for prices and sizes
//!
//! Every price and size the engine compares or emits passes through these helpers.
//! Values are snapped to integer multiples of an instrument step, so two quantities that
//! are equal after quantization compare equal with `==`.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round `value` to the nearest multiple of `step` (ties to even)
///
/// A non-positive step leaves the value untouched.
pub fn quantize(value: Decimal, step: Decimal) -> Decimal {
    snap(value, step, RoundingStrategy::MidpointNearestEven)
}

/// Truncate `value` toward zero onto a multiple of `step`
pub fn quantize_down(value: Decimal, step: Decimal) -> Decimal {
    snap(value, step, RoundingStrategy::ToZero)
}

fn snap(value: Decimal, step: Decimal, strategy: RoundingStrategy) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let steps = (value / step).round_dp_with_strategy(0, strategy);
    steps * step
}

/// `floor(numerator / denominator)`
pub fn floor_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    (numerator / denominator).floor()
}

/// `ceil(numerator / denominator)`
pub fn ceil_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    (numerator / denominator).ceil()
}

/// `base^exponent` by repeated multiplication, `None` on overflow
pub fn pow_int(base: Decimal, exponent: u32) -> Option<Decimal> {
    (0..exponent).try_fold(Decimal::ONE, |acc, _| acc.checked_mul(base))
}

/// Convert a percentage number (`1` meaning 1%) into a fraction
pub fn percent(value: Decimal) -> Decimal {
    value / Decimal::ONE_HUNDRED
}
