//! Common test utilities and fixtures

use chrono::{Duration, TimeZone, Utc};
use gridbots::common::types::{BookTop, Candle, Instrument};
use gridbots::engine::PaperExchange;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const ETH_PERP: &str = "ETH/USDT:USDT";
pub const ETH_SPOT: &str = "ETH/USDT";

/// ETH perpetual with cent steps
pub fn eth_perp() -> Instrument {
    Instrument::new(ETH_PERP, dec!(0.01), dec!(0.01), dec!(0.01))
}

/// ETH spot with a finer size step than the perpetual
pub fn eth_spot() -> Instrument {
    Instrument::new(ETH_SPOT, dec!(0.01), dec!(0.0001), dec!(0.001))
}

/// Book one tick either side of `mid`
pub fn book_around(mid: Decimal, half_spread: Decimal) -> BookTop {
    BookTop::new(mid - half_spread, mid + half_spread)
}

/// Hourly flat bars closing at each value
pub fn hourly_bars(closes: &[Decimal]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| Candle {
            time: start + Duration::hours(i as i64),
            open: *close,
            high: *close,
            low: *close,
            close: *close,
            volume: Decimal::ZERO,
        })
        .collect()
}

/// Paper exchange listing the ETH pair, perpetual mid at `mid`
pub fn paper_exchange(mid: Decimal) -> PaperExchange {
    PaperExchange::new()
        .with_instrument(eth_perp())
        .with_instrument(eth_spot())
        .with_book(ETH_PERP, book_around(mid, dec!(0.05)))
        .with_balance("USDT", dec!(10000))
}

/// Sample strategy configurations in the file format the binary reads
pub mod config_files {
    /// Neutral grid
    pub const GRID: &str = r#"
        [strategy]
        kind = "grid"
        symbol = "ETH/USDT:USDT"
        grid_spacing = "1"
        stop_loss = "10"
        max_investment = "1900"

        [settings]
        interval_secs = 30
    "#;

    /// Funding capture on ETH
    pub const CASH_AND_CARRY: &str = r#"
        [strategy]
        kind = "cash_and_carry"
        token = "ETH"
        value = "1000"
        slippage_pc = "0.05"
        funding_pc_threshold = "0.001"
    "#;

    /// Grid whose stop is too close to the first rung
    pub const INVALID_GRID: &str = r#"
        [strategy]
        kind = "grid"
        symbol = "ETH/USDT:USDT"
        grid_spacing = "5"
        stop_loss = "10"
        max_investment = "1000"
    "#;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_around() {
        let book = book_around(dec!(100), dec!(0.05));
        assert_eq!(book.mid(), dec!(100));
        assert_eq!(book.spread(), dec!(0.1));
    }

    #[test]
    fn test_hourly_bars() {
        let bars = hourly_bars(&[dec!(1), dec!(2)]);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].time - bars[0].time, Duration::hours(1));
    }
}
