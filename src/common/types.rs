//! Exchange-facing types shared by every strategy

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::quantity::{quantize, quantize_down};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Signed direction: +1 for buys, -1 for sells
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Side that increases a position of the given sign, `None` when flat
    pub fn from_sign(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Side::Buy)
        } else if value < Decimal::ZERO {
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Instrument kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Spot,
    Perpetual,
}

impl InstrumentKind {
    /// Infer the kind from a unified symbol (`BTC/USDT` spot, `BTC/USDT:USDT` perpetual)
    pub fn from_symbol(symbol: &str) -> Self {
        if symbol.contains(':') {
            InstrumentKind::Perpetual
        } else {
            InstrumentKind::Spot
        }
    }
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentKind::Spot => write!(f, "spot"),
            InstrumentKind::Perpetual => write!(f, "perpetual"),
        }
    }
}

/// Static per-instrument facts supplied by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Unified symbol, e.g. `ETH/USDT:USDT`
    pub symbol: String,
    /// Base asset (the token)
    pub base: String,
    /// Quote asset
    pub quote: String,
    pub kind: InstrumentKind,
    /// Price quantization step
    pub price_step: Decimal,
    /// Size quantization step
    pub size_step: Decimal,
    /// Minimum order size
    pub min_size: Decimal,
    /// Tokens per contract (perpetuals quoted in multiples, e.g. `1000PEPE`)
    #[serde(default = "default_multiplier")]
    pub contract_multiplier: Decimal,
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

impl Instrument {
    /// Build an instrument, deriving base/quote/kind from the unified symbol
    pub fn new(
        symbol: impl Into<String>,
        price_step: Decimal,
        size_step: Decimal,
        min_size: Decimal,
    ) -> Self {
        let symbol = symbol.into();
        let kind = InstrumentKind::from_symbol(&symbol);
        let pair = symbol.split(':').next().unwrap_or_default();
        let mut assets = pair.split('/');
        let base = assets.next().unwrap_or_default().to_string();
        let quote = assets.next().unwrap_or_default().to_string();
        Self {
            symbol,
            base,
            quote,
            kind,
            price_step,
            size_step,
            min_size,
            contract_multiplier: Decimal::ONE,
        }
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.contract_multiplier = multiplier;
        self
    }

    pub fn is_perpetual(&self) -> bool {
        self.kind == InstrumentKind::Perpetual
    }

    /// Round a price to the nearest price step
    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        quantize(price, self.price_step)
    }

    /// Round a size to the nearest size step
    pub fn quantize_size(&self, size: Decimal) -> Decimal {
        quantize(size, self.size_step)
    }

    /// Truncate a size toward zero onto the size step
    pub fn floor_size(&self, size: Decimal) -> Decimal {
        quantize_down(size, self.size_step)
    }
}

/// Current net position in an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Positive = long, negative = short
    pub size: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Position value in quote currency
    pub notional: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>, size: Decimal, entry_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            size,
            entry_price,
            notional: (size * entry_price).abs(),
        }
    }

    pub fn side(&self) -> Option<Side> {
        Side::from_sign(self.size)
    }
}

/// Kind of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    /// Stop order triggered at its price
    Stop,
    /// Take-profit order triggered at its price
    TakeProfit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "market"),
            OrderKind::Limit => write!(f, "limit"),
            OrderKind::Stop => write!(f, "stop"),
            OrderKind::TakeProfit => write!(f, "take_profit"),
        }
    }
}

/// An order currently resting on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    /// Exchange-assigned identifier
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price or trigger price
    pub price: Decimal,
    /// Remaining size
    pub size: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
}

impl RestingOrder {
    /// Plain limit order, the shape grid ladders rest as
    pub fn limit(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            price,
            size,
            reduce_only: false,
        }
    }

    /// True for non-reduce-only limit orders (grid ladder rungs)
    pub fn is_entry_limit(&self) -> bool {
        self.kind == OrderKind::Limit && !self.reduce_only
    }
}

/// Top of the order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookTop {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

impl BookTop {
    pub fn new(best_bid: Decimal, best_ask: Decimal) -> Self {
        Self { best_bid, best_ask }
    }

    /// Calculate the midpoint price
    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }

    /// Calculate the spread
    pub fn spread(&self) -> Decimal {
        self.best_ask - self.best_bid
    }

    /// Price a taker would cross at: the ask for buys, the bid for sells
    pub fn touch(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.best_ask,
            Side::Sell => self.best_bid,
        }
    }
}

/// One OHLC bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_book_mid_and_spread() {
        let book = BookTop::new(dec!(99.5), dec!(100.5));
        assert_eq!(book.mid(), dec!(100));
        assert_eq!(book.spread(), dec!(1.0));
        assert_eq!(book.touch(Side::Buy), dec!(100.5));
        assert_eq!(book.touch(Side::Sell), dec!(99.5));
    }

    #[test]
    fn test_instrument_from_symbol() {
        let perp = Instrument::new("ETH/USDT:USDT", dec!(0.01), dec!(0.001), dec!(0.001));
        assert_eq!(perp.base, "ETH");
        assert_eq!(perp.quote, "USDT");
        assert!(perp.is_perpetual());

        let spot = Instrument::new("ETH/USDT", dec!(0.01), dec!(0.001), dec!(0.001));
        assert_eq!(spot.kind, InstrumentKind::Spot);
        assert_eq!(spot.contract_multiplier, Decimal::ONE);
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Buy.sign(), dec!(1));
        assert_eq!(Side::Sell.sign(), dec!(-1));
        assert_eq!(Side::from_sign(dec!(-0.5)), Some(Side::Sell));
        assert_eq!(Side::from_sign(Decimal::ZERO), None);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn test_position_notional() {
        let position = Position::new("ETH/USDT:USDT", dec!(-2), dec!(1500));
        assert_eq!(position.notional, dec!(3000));
        assert_eq!(position.side(), Some(Side::Sell));
    }
}
