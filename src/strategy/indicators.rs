//! Candle indicators used by the trend filters

use rust_decimal::Decimal;

use crate::common::types::Candle;

/// Exponential moving average over `values`, same length as the input
///
/// Recursive form with `alpha = 2 / (period + 1)`, seeded with the first value.
pub fn ema(values: &[Decimal], period: usize) -> Vec<Decimal> {
    let Some(first) = values.first() else {
        return Vec::new();
    };
    let alpha = Decimal::TWO / Decimal::from(period.max(1) + 1);
    let mut out = Vec::with_capacity(values.len());
    let mut current = *first;
    out.push(current);
    for value in &values[1..] {
        current = alpha * *value + (Decimal::ONE - alpha) * current;
        out.push(current);
    }
    out
}

/// Closing prices of a candle series
pub fn closes(candles: &[Candle]) -> Vec<Decimal> {
    candles.iter().map(|c| c.close).collect()
}

/// Average true range over the last `period` bars (simple mean)
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let bar = &pair[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect();
    let recent = &ranges[ranges.len() - period..];
    Some(recent.iter().copied().sum::<Decimal>() / Decimal::from(period))
}

/// Crossover of `fast` over `slow` on the last bar
///
/// Returns 1 when fast crossed above slow, -1 when it crossed below, 0 otherwise.
pub fn crossover(fast: &[Decimal], slow: &[Decimal]) -> i8 {
    if fast.len() < 2 || slow.len() < 2 {
        return 0;
    }
    let prev = fast[fast.len() - 2] - slow[slow.len() - 2];
    let last = fast[fast.len() - 1] - slow[slow.len() - 1];
    if prev <= Decimal::ZERO && last > Decimal::ZERO {
        1
    } else if prev >= Decimal::ZERO && last < Decimal::ZERO {
        -1
    } else {
        0
    }
}

/// Sign of the last close relative to its EMA: 1 above, -1 at or below
pub fn trend(candles: &[Candle], period: usize) -> Option<i8> {
    let closes = closes(candles);
    let last_close = *closes.last()?;
    let last_ema = *ema(&closes, period).last()?;
    Some(if last_close > last_ema { 1 } else { -1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candles(closes: &[Decimal]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                time: start + Duration::minutes(i as i64),
                open: *close,
                high: *close + dec!(1),
                low: *close - dec!(1),
                close: *close,
                volume: Decimal::ZERO,
            })
            .collect()
    }

    #[test]
    fn test_ema_constant_series() {
        let values = vec![dec!(10); 5];
        assert!(ema(&values, 3).iter().all(|v| *v == dec!(10)));
    }

    #[test]
    fn test_ema_recursion() {
        // alpha = 0.5 for period 3
        let out = ema(&[dec!(10), dec!(20), dec!(20)], 3);
        assert_eq!(out, vec![dec!(10), dec!(15), dec!(17.5)]);
    }

    #[test]
    fn test_atr_simple_mean() {
        let bars = candles(&[dec!(100), dec!(100), dec!(100)]);
        assert_eq!(atr(&bars, 2), Some(dec!(2)));
        assert_eq!(atr(&bars, 3), None);
    }

    #[test]
    fn test_crossover() {
        assert_eq!(crossover(&[dec!(1), dec!(3)], &[dec!(2), dec!(2)]), 1);
        assert_eq!(crossover(&[dec!(3), dec!(1)], &[dec!(2), dec!(2)]), -1);
        assert_eq!(crossover(&[dec!(3), dec!(4)], &[dec!(2), dec!(2)]), 0);
    }

    #[test]
    fn test_trend_direction() {
        let rising = candles(&[dec!(100), dec!(101), dec!(102), dec!(103)]);
        assert_eq!(trend(&rising, 3), Some(1));
        let falling = candles(&[dec!(103), dec!(102), dec!(101), dec!(100)]);
        assert_eq!(trend(&falling, 3), Some(-1));
        assert_eq!(trend(&[], 3), None);
    }
}
