//! In-memory exchange for dry runs and tests

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::common::errors::{BotError, Result};
use crate::common::traits::Exchange;
use crate::common::types::{
    BookTop, Candle, Instrument, InstrumentKind, OrderKind, Position, RestingOrder, Side,
};
use crate::strategy::types::{OrderAction, OrderSpec};

/// Bracket prices waiting for their entry order to fill
#[derive(Debug, Clone, Copy, Default)]
struct Brackets {
    take_profit: Option<Decimal>,
    stop_loss: Option<Decimal>,
}

#[derive(Debug, Default)]
struct PaperBook {
    instruments: BTreeMap<String, Instrument>,
    books: HashMap<String, BookTop>,
    candles: HashMap<(String, String), Vec<Candle>>,
    funding_rates: HashMap<String, Decimal>,
    positions: HashMap<String, Position>,
    balances: HashMap<String, Decimal>,
    orders: BTreeMap<String, RestingOrder>,
    brackets: HashMap<String, Brackets>,
    next_id: u64,
    rejecting: Option<String>,
}

impl PaperBook {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{:06}", self.next_id)
    }

    fn instrument(&self, symbol: &str) -> Result<&Instrument> {
        self.instruments
            .get(symbol)
            .ok_or_else(|| BotError::Execution(format!("unknown instrument {}", symbol)))
    }

    /// Book a fill against the account
    fn apply_fill(
        &mut self,
        symbol: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> Result<()> {
        let instrument = self.instrument(symbol)?.clone();
        let signed = side.sign() * size;

        match instrument.kind {
            InstrumentKind::Spot => {
                *self.balances.entry(instrument.base.clone()).or_default() += signed;
                *self.balances.entry(instrument.quote.clone()).or_default() -= signed * price;
            }
            InstrumentKind::Perpetual => {
                let current = self
                    .positions
                    .get(symbol)
                    .map(|p| (p.size, p.entry_price))
                    .unwrap_or_default();
                let size = current.0 + signed;
                let entry = if current.0 == Decimal::ZERO || size.signum() != current.0.signum() {
                    price
                } else if size.abs() > current.0.abs() {
                    (current.0 * current.1 + signed * price) / size
                } else {
                    current.1
                };
                if size == Decimal::ZERO {
                    self.positions.remove(symbol);
                } else {
                    self.positions
                        .insert(symbol.to_string(), Position::new(symbol, size, entry));
                }
            }
        }
        debug!(symbol, side = %side, size = %size, price = %price, "paper fill");
        Ok(())
    }

    /// Rest the brackets of a filled entry as reduce-only orders
    fn attach_brackets(&mut self, symbol: &str, side: Side, size: Decimal, brackets: Brackets) {
        let exit = side.opposite();
        if let Some(price) = brackets.take_profit {
            let id = self.next_id();
            self.orders.insert(
                id.clone(),
                RestingOrder {
                    id,
                    symbol: symbol.to_string(),
                    side: exit,
                    kind: OrderKind::TakeProfit,
                    price,
                    size,
                    reduce_only: true,
                },
            );
        }
        if let Some(price) = brackets.stop_loss {
            let id = self.next_id();
            self.orders.insert(
                id.clone(),
                RestingOrder {
                    id,
                    symbol: symbol.to_string(),
                    side: exit,
                    kind: OrderKind::Stop,
                    price,
                    size,
                    reduce_only: true,
                },
            );
        }
    }

    fn place(&mut self, spec: &OrderSpec) -> Result<String> {
        let brackets = Brackets {
            take_profit: spec.take_profit,
            stop_loss: spec.stop_loss,
        };
        let id = self.next_id();

        if spec.kind == OrderKind::Market {
            let mid = self
                .books
                .get(&spec.symbol)
                .map(BookTop::mid)
                .ok_or_else(|| BotError::Execution(format!("no book to fill {}", spec.symbol)))?;
            self.apply_fill(&spec.symbol, spec.side, spec.size, mid)?;
            self.attach_brackets(&spec.symbol, spec.side, spec.size, brackets);
            return Ok(id);
        }

        let price = spec.price.ok_or_else(|| {
            BotError::Execution(format!("{} order on {} without a price", spec.kind, spec.symbol))
        })?;
        self.instrument(&spec.symbol)?;
        self.orders.insert(
            id.clone(),
            RestingOrder {
                id: id.clone(),
                symbol: spec.symbol.clone(),
                side: spec.side,
                kind: spec.kind,
                price,
                size: spec.size,
                reduce_only: spec.reduce_only,
            },
        );
        if brackets.take_profit.is_some() || brackets.stop_loss.is_some() {
            self.brackets.insert(id.clone(), brackets);
        }
        Ok(id)
    }

    fn modify(&mut self, id: &str, spec: &OrderSpec) -> Result<String> {
        let order = self
            .orders
            .get_mut(id)
            .ok_or_else(|| BotError::Execution(format!("cannot modify unknown order {}", id)))?;
        order.side = spec.side;
        order.kind = spec.kind;
        order.price = spec.price.unwrap_or(order.price);
        order.size = spec.size;
        order.reduce_only = spec.reduce_only;
        Ok(id.to_string())
    }

    fn cancel(&mut self, id: &str) -> Result<String> {
        self.brackets.remove(id);
        self.orders
            .remove(id)
            .map(|order| order.id)
            .ok_or_else(|| BotError::Execution(format!("cannot cancel unknown order {}", id)))
    }
}

/// Exchange simulated in memory
///
/// Market orders fill immediately at mid. Resting orders stay on the book until a test
/// (or a dry-run driver) calls [`PaperExchange::fill_order`].
#[derive(Debug, Default)]
pub struct PaperExchange {
    book: RwLock<PaperBook>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Builders
    // ========================================================================

    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.book
            .get_mut()
            .instruments
            .insert(instrument.symbol.clone(), instrument);
        self
    }

    pub fn with_book(mut self, symbol: impl Into<String>, book: BookTop) -> Self {
        self.book.get_mut().books.insert(symbol.into(), book);
        self
    }

    pub fn with_balance(mut self, asset: impl Into<String>, balance: Decimal) -> Self {
        self.book.get_mut().balances.insert(asset.into(), balance);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.book
            .get_mut()
            .positions
            .insert(position.symbol.clone(), position);
        self
    }

    pub fn with_funding_rate(mut self, symbol: impl Into<String>, rate: Decimal) -> Self {
        self.book.get_mut().funding_rates.insert(symbol.into(), rate);
        self
    }

    pub fn with_candles(mut self, symbol: &str, granularity: &str, candles: Vec<Candle>) -> Self {
        self.book
            .get_mut()
            .candles
            .insert((symbol.to_string(), granularity.to_string()), candles);
        self
    }

    // ========================================================================
    // Market simulation
    // ========================================================================

    pub async fn set_book(&self, symbol: &str, book: BookTop) {
        self.book.write().await.books.insert(symbol.to_string(), book);
    }

    pub async fn set_funding_rate(&self, symbol: &str, rate: Decimal) {
        self.book
            .write()
            .await
            .funding_rates
            .insert(symbol.to_string(), rate);
    }

    pub async fn set_candles(&self, symbol: &str, granularity: &str, candles: Vec<Candle>) {
        self.book
            .write()
            .await
            .candles
            .insert((symbol.to_string(), granularity.to_string()), candles);
    }

    /// Make every following submission fail with `reason`; `None` accepts again
    pub async fn set_rejecting(&self, reason: Option<String>) {
        self.book.write().await.rejecting = reason;
    }

    /// Fill a resting order completely at its own price
    #[instrument(skip(self))]
    pub async fn fill_order(&self, id: &str) -> Result<()> {
        let mut book = self.book.write().await;
        let order = book
            .orders
            .remove(id)
            .ok_or_else(|| BotError::Execution(format!("cannot fill unknown order {}", id)))?;
        let brackets = book.brackets.remove(id).unwrap_or_default();
        book.apply_fill(&order.symbol, order.side, order.size, order.price)?;
        book.attach_brackets(&order.symbol, order.side, order.size, brackets);
        Ok(())
    }

    /// Every resting order, in id order
    pub async fn resting(&self) -> Vec<RestingOrder> {
        self.book.read().await.orders.values().cloned().collect()
    }

    /// Signed position size on a perpetual, zero when flat
    pub async fn position_size(&self, symbol: &str) -> Decimal {
        self.book
            .read()
            .await
            .positions
            .get(symbol)
            .map(|p| p.size)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn instrument(&self, symbol: &str) -> Result<Instrument> {
        self.book.read().await.instrument(symbol).cloned()
    }

    async fn instruments(&self) -> Result<Vec<Instrument>> {
        Ok(self.book.read().await.instruments.values().cloned().collect())
    }

    async fn orderbook(&self, symbol: &str) -> Result<BookTop> {
        self.book
            .read()
            .await
            .books
            .get(symbol)
            .copied()
            .ok_or_else(|| BotError::MissingData(format!("order book for {}", symbol)))
    }

    async fn candles(&self, symbol: &str, granularity: &str, count: usize) -> Result<Vec<Candle>> {
        let book = self.book.read().await;
        let bars = book
            .candles
            .get(&(symbol.to_string(), granularity.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = bars.len().saturating_sub(count);
        Ok(bars[start..].to_vec())
    }

    async fn positions(&self, symbol: &str) -> Result<HashMap<String, Position>> {
        Ok(self
            .book
            .read()
            .await
            .positions
            .get(symbol)
            .filter(|p| p.size != Decimal::ZERO)
            .map(|p| HashMap::from([(symbol.to_string(), p.clone())]))
            .unwrap_or_default())
    }

    async fn balance(&self, asset: &str) -> Result<Decimal> {
        Ok(self
            .book
            .read()
            .await
            .balances
            .get(asset)
            .copied()
            .unwrap_or_default())
    }

    async fn resting_orders(&self, symbol: &str) -> Result<BTreeMap<String, RestingOrder>> {
        Ok(self
            .book
            .read()
            .await
            .orders
            .iter()
            .filter(|(_, order)| order.symbol == symbol)
            .map(|(id, order)| (id.clone(), order.clone()))
            .collect())
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Decimal> {
        self.book
            .read()
            .await
            .funding_rates
            .get(symbol)
            .copied()
            .ok_or_else(|| BotError::MissingData(format!("funding rate for {}", symbol)))
    }

    #[instrument(skip(self, action), fields(action = %action))]
    async fn submit(&self, action: &OrderAction) -> Result<String> {
        let mut book = self.book.write().await;
        if let Some(reason) = &book.rejecting {
            return Err(BotError::Execution(reason.clone()));
        }
        match action {
            OrderAction::Place(spec) => book.place(spec),
            OrderAction::Modify { id, spec } => book.modify(id, spec),
            OrderAction::Cancel { id, .. } => book.cancel(id),
        }
    }

    fn venue(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const PERP: &str = "ETH/USDT:USDT";
    const SPOT: &str = "ETH/USDT";

    fn exchange() -> PaperExchange {
        PaperExchange::new()
            .with_instrument(Instrument::new(PERP, dec!(0.01), dec!(0.01), dec!(0.01)))
            .with_instrument(Instrument::new(SPOT, dec!(0.01), dec!(0.01), dec!(0.01)))
            .with_book(PERP, BookTop::new(dec!(99), dec!(101)))
            .with_book(SPOT, BookTop::new(dec!(99), dec!(101)))
            .with_balance("USDT", dec!(1000))
    }

    #[tokio::test]
    async fn test_market_order_fills_at_mid() {
        let exchange = exchange();
        let spec = OrderSpec::market(PERP, Side::Buy, dec!(2)).with_stop_loss(dec!(90));
        exchange.submit(&OrderAction::Place(spec)).await.unwrap();

        let positions = exchange.positions(PERP).await.unwrap();
        assert_eq!(positions[PERP].size, dec!(2));
        assert_eq!(positions[PERP].entry_price, dec!(100));

        let resting = exchange.resting().await;
        assert_eq!(resting.len(), 1);
        assert_eq!(resting[0].kind, OrderKind::Stop);
        assert_eq!(resting[0].side, Side::Sell);
        assert!(resting[0].reduce_only);
    }

    #[tokio::test]
    async fn test_spot_fill_moves_balances() {
        let exchange = exchange();
        let spec = OrderSpec::market(SPOT, Side::Buy, dec!(3));
        exchange.submit(&OrderAction::Place(spec)).await.unwrap();

        assert_eq!(exchange.balance("ETH").await.unwrap(), dec!(3));
        assert_eq!(exchange.balance("USDT").await.unwrap(), dec!(700));
    }

    #[tokio::test]
    async fn test_limit_rests_until_filled() {
        let exchange = exchange();
        let spec =
            OrderSpec::limit(PERP, Side::Sell, dec!(105), dec!(1)).with_take_profit(dec!(100));
        let id = exchange.submit(&OrderAction::Place(spec)).await.unwrap();
        assert_eq!(exchange.resting_orders(PERP).await.unwrap().len(), 1);
        assert_eq!(exchange.position_size(PERP).await, Decimal::ZERO);

        exchange.fill_order(&id).await.unwrap();
        assert_eq!(exchange.position_size(PERP).await, dec!(-1));
        let resting = exchange.resting().await;
        assert_eq!(resting.len(), 1);
        assert_eq!((resting[0].kind, resting[0].side), (OrderKind::TakeProfit, Side::Buy));
    }

    #[tokio::test]
    async fn test_modify_and_cancel() {
        let exchange = exchange();
        let id = exchange
            .submit(&OrderAction::Place(OrderSpec::stop(PERP, Side::Sell, dec!(90), dec!(1))))
            .await
            .unwrap();

        let moved = OrderSpec::stop(PERP, Side::Buy, dec!(110), dec!(3));
        exchange.submit(&OrderAction::modify(id.clone(), moved)).await.unwrap();
        let orders = exchange.resting_orders(PERP).await.unwrap();
        let order = &orders[&id];
        assert_eq!((order.side, order.price, order.size), (Side::Buy, dec!(110), dec!(3)));

        exchange.submit(&OrderAction::cancel(id.clone(), PERP)).await.unwrap();
        assert!(exchange.resting().await.is_empty());
        let err = exchange.submit(&OrderAction::cancel(id, PERP)).await.unwrap_err();
        assert!(matches!(err, BotError::Execution(_)));
    }

    #[tokio::test]
    async fn test_position_flip_resets_entry() {
        let exchange = exchange().with_position(Position::new(PERP, dec!(1), dec!(80)));
        exchange
            .submit(&OrderAction::Place(OrderSpec::market(PERP, Side::Sell, dec!(3))))
            .await
            .unwrap();
        let positions = exchange.positions(PERP).await.unwrap();
        let position = &positions[PERP];
        assert_eq!((position.size, position.entry_price), (dec!(-2), dec!(100)));
    }

    #[tokio::test]
    async fn test_rejecting_submissions() {
        let exchange = exchange();
        exchange.set_rejecting(Some("rate limited".to_string())).await;
        let err = exchange
            .submit(&OrderAction::Place(OrderSpec::market(PERP, Side::Buy, dec!(1))))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Execution(reason) if reason == "rate limited"));
    }

    #[tokio::test]
    async fn test_candles_returns_most_recent() {
        let bars: Vec<Candle> = (0..5)
            .map(|i| Candle {
                time: chrono::Utc::now(),
                open: Decimal::from(i),
                high: Decimal::from(i),
                low: Decimal::from(i),
                close: Decimal::from(i),
                volume: Decimal::ZERO,
            })
            .collect();
        let exchange = exchange().with_candles(PERP, "1m", bars);
        let recent = exchange.candles(PERP, "1m", 2).await.unwrap();
        assert_eq!(recent.iter().map(|c| c.close).collect::<Vec<_>>(), vec![dec!(3), dec!(4)]);
        assert!(exchange.candles(PERP, "1h", 2).await.unwrap().is_empty());
    }
}
