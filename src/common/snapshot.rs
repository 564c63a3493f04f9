//! Point-in-time market and account views handed to every cycle

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::{BotError, Result};
use super::traits::Exchange;
use super::types::{BookTop, Candle, Instrument, InstrumentKind, Position, RestingOrder};

/// Candle series a strategy needs for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandleRequest {
    pub symbol: String,
    pub granularity: String,
    pub count: usize,
}

/// Everything a strategy reads in one cycle
///
/// Strategies declare this up front so the runner can capture a single consistent
/// snapshot instead of letting strategies query the exchange mid-cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotRequest {
    /// Symbols whose book, positions and resting orders are read
    pub symbols: Vec<String>,
    pub candles: Vec<CandleRequest>,
    /// Perpetual symbols whose funding rate is read
    pub funding: Vec<String>,
    /// Assets whose balance is read
    pub balances: Vec<String>,
}

impl SnapshotRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbols.push(symbol.into());
        self
    }

    pub fn with_candles(
        mut self,
        symbol: impl Into<String>,
        granularity: impl Into<String>,
        count: usize,
    ) -> Self {
        self.candles.push(CandleRequest {
            symbol: symbol.into(),
            granularity: granularity.into(),
            count,
        });
        self
    }

    pub fn with_funding(mut self, symbol: impl Into<String>) -> Self {
        self.funding.push(symbol.into());
        self
    }

    pub fn with_balance(mut self, asset: impl Into<String>) -> Self {
        self.balances.push(asset.into());
        self
    }

    /// Read the instrument's book, orders and position (balance of the base asset on spot)
    pub fn with_instrument(self, instrument: &Instrument) -> Self {
        let request = self.with_symbol(instrument.symbol.clone());
        match instrument.kind {
            InstrumentKind::Spot => request.with_balance(instrument.base.clone()),
            InstrumentKind::Perpetual => request,
        }
    }
}

/// Read-only market view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub books: HashMap<String, BookTop>,
    /// Keyed by `symbol|granularity`
    pub candles: HashMap<String, Vec<Candle>>,
    pub funding_rates: HashMap<String, Decimal>,
}

/// Read-only account view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub positions: HashMap<String, Position>,
    pub balances: HashMap<String, Decimal>,
    /// Resting orders keyed by exchange id
    pub orders: BTreeMap<String, RestingOrder>,
}

/// Immutable input to one strategy cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub market: MarketSnapshot,
    pub account: AccountSnapshot,
}

fn candle_key(symbol: &str, granularity: &str) -> String {
    format!("{}|{}", symbol, granularity)
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            market: MarketSnapshot::default(),
            account: AccountSnapshot::default(),
        }
    }

    /// Read everything in `request` from the exchange, once
    pub async fn capture<E: Exchange + ?Sized>(
        exchange: &E,
        request: &SnapshotRequest,
    ) -> Result<Self> {
        let mut snapshot = Snapshot::new(Utc::now());

        for symbol in &request.symbols {
            let book = exchange.orderbook(symbol).await?;
            snapshot.market.books.insert(symbol.clone(), book);

            for (key, position) in exchange.positions(symbol).await? {
                snapshot.account.positions.insert(key, position);
            }

            snapshot
                .account
                .orders
                .extend(exchange.resting_orders(symbol).await?);
        }

        for candles in &request.candles {
            let bars = exchange
                .candles(&candles.symbol, &candles.granularity, candles.count)
                .await?;
            snapshot
                .market
                .candles
                .insert(candle_key(&candles.symbol, &candles.granularity), bars);
        }

        for symbol in &request.funding {
            let rate = exchange.funding_rate(symbol).await?;
            snapshot.market.funding_rates.insert(symbol.clone(), rate);
        }

        for asset in &request.balances {
            let balance = exchange.balance(asset).await?;
            snapshot.account.balances.insert(asset.clone(), balance);
        }

        debug!(
            venue = exchange.venue(),
            books = snapshot.market.books.len(),
            orders = snapshot.account.orders.len(),
            "captured snapshot"
        );

        Ok(snapshot)
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn with_book(mut self, symbol: impl Into<String>, book: BookTop) -> Self {
        self.market.books.insert(symbol.into(), book);
        self
    }

    pub fn with_candles(
        mut self,
        symbol: &str,
        granularity: &str,
        candles: Vec<Candle>,
    ) -> Self {
        self.market
            .candles
            .insert(candle_key(symbol, granularity), candles);
        self
    }

    pub fn with_funding_rate(mut self, symbol: impl Into<String>, rate: Decimal) -> Self {
        self.market.funding_rates.insert(symbol.into(), rate);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.account
            .positions
            .insert(position.symbol.clone(), position);
        self
    }

    pub fn with_balance(mut self, asset: impl Into<String>, balance: Decimal) -> Self {
        self.account.balances.insert(asset.into(), balance);
        self
    }

    pub fn with_order(mut self, order: RestingOrder) -> Self {
        self.account.orders.insert(order.id.clone(), order);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Top of book for a symbol
    pub fn book(&self, symbol: &str) -> Result<&BookTop> {
        self.market
            .books
            .get(symbol)
            .ok_or_else(|| BotError::MissingData(format!("order book for {}", symbol)))
    }

    /// Mid price for a symbol
    pub fn mid(&self, symbol: &str) -> Result<Decimal> {
        self.book(symbol).map(BookTop::mid)
    }

    /// Candles for a symbol/granularity, empty when not captured
    pub fn candles(&self, symbol: &str, granularity: &str) -> &[Candle] {
        self.market
            .candles
            .get(&candle_key(symbol, granularity))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn funding_rate(&self, symbol: &str) -> Result<Decimal> {
        self.market
            .funding_rates
            .get(symbol)
            .copied()
            .ok_or_else(|| BotError::MissingData(format!("funding rate for {}", symbol)))
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.account
            .positions
            .get(symbol)
            .filter(|p| p.size != Decimal::ZERO)
    }

    /// Balance of an asset, zero when unknown
    pub fn balance(&self, asset: &str) -> Decimal {
        self.account.balances.get(asset).copied().unwrap_or_default()
    }

    /// Resting orders on one symbol, in id order
    pub fn orders_for<'a>(
        &'a self,
        symbol: &'a str,
    ) -> impl Iterator<Item = &'a RestingOrder> + 'a {
        self.account
            .orders
            .values()
            .filter(move |order| order.symbol == symbol)
    }

    /// Signed net position: position size on perpetuals, base-asset balance on spot
    pub fn net_position(&self, instrument: &Instrument) -> Decimal {
        match instrument.kind {
            InstrumentKind::Perpetual => self
                .position(&instrument.symbol)
                .map(|p| p.size)
                .unwrap_or_default(),
            InstrumentKind::Spot => self.balance(&instrument.base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Side;
    use rust_decimal_macros::dec;

    fn perp() -> Instrument {
        Instrument::new("ETH/USDT:USDT", dec!(0.01), dec!(0.01), dec!(0.01))
    }

    #[test]
    fn test_net_position_perpetual() {
        let snapshot = Snapshot::new(Utc::now())
            .with_position(Position::new("ETH/USDT:USDT", dec!(-1.5), dec!(2000)));
        assert_eq!(snapshot.net_position(&perp()), dec!(-1.5));

        let flat = Snapshot::new(Utc::now());
        assert_eq!(flat.net_position(&perp()), Decimal::ZERO);
    }

    #[test]
    fn test_net_position_spot_uses_base_balance() {
        let spot = Instrument::new("ETH/USDT", dec!(0.01), dec!(0.01), dec!(0.01));
        let snapshot = Snapshot::new(Utc::now()).with_balance("ETH", dec!(3.2));
        assert_eq!(snapshot.net_position(&spot), dec!(3.2));
    }

    #[test]
    fn test_missing_book_is_reported() {
        let snapshot = Snapshot::new(Utc::now());
        let err = snapshot.mid("ETH/USDT:USDT").unwrap_err();
        assert!(matches!(err, BotError::MissingData(_)));
        assert!(err.is_skippable());
    }

    #[test]
    fn test_orders_filtered_by_symbol() {
        let snapshot = Snapshot::new(Utc::now())
            .with_order(RestingOrder::limit("1", "ETH/USDT:USDT", Side::Buy, dec!(99), dec!(1)))
            .with_order(RestingOrder::limit("2", "BTC/USDT:USDT", Side::Buy, dec!(99), dec!(1)));
        let ids: Vec<_> = snapshot.orders_for("ETH/USDT:USDT").map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn test_instrument_request_adds_base_balance_for_spot() {
        let spot = Instrument::new("ETH/USDT", dec!(0.01), dec!(0.01), dec!(0.01));
        let request = SnapshotRequest::new().with_instrument(&spot);
        assert_eq!(request.symbols, vec!["ETH/USDT".to_string()]);
        assert_eq!(request.balances, vec!["ETH".to_string()]);

        let request = SnapshotRequest::new().with_instrument(&perp());
        assert!(request.balances.is_empty());
    }
}
