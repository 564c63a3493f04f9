//! Trait definitions for the exchange collaborator

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::errors::Result;
use super::types::{BookTop, Candle, Instrument, Position, RestingOrder};
use crate::strategy::OrderAction;

/// Capability set consumed from the exchange/execution layer
///
/// Connectivity, authentication and retry policy live behind this trait. The engine
/// reads through it once per cycle (see [`crate::common::snapshot::Snapshot::capture`])
/// and hands every emitted action to [`Exchange::submit`].
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Static metadata for one instrument
    async fn instrument(&self, symbol: &str) -> Result<Instrument>;

    /// Every instrument the exchange lists
    async fn instruments(&self) -> Result<Vec<Instrument>>;

    /// Best bid/ask for a symbol
    async fn orderbook(&self, symbol: &str) -> Result<BookTop>;

    /// Recent candles, most recent last
    ///
    /// # Arguments
    /// * `granularity` - Bar width, e.g. `1m`, `15m`, `1h`
    /// * `count` - Number of bars requested
    async fn candles(&self, symbol: &str, granularity: &str, count: usize) -> Result<Vec<Candle>>;

    /// Open positions keyed by symbol; absent when flat
    async fn positions(&self, symbol: &str) -> Result<HashMap<String, Position>>;

    /// Free balance of an asset
    async fn balance(&self, asset: &str) -> Result<Decimal>;

    /// Resting (non-terminal) orders keyed by exchange id
    async fn resting_orders(&self, symbol: &str) -> Result<BTreeMap<String, RestingOrder>>;

    /// Current funding rate of a perpetual, as a fraction
    async fn funding_rate(&self, symbol: &str) -> Result<Decimal>;

    /// Hand one action to the exchange, returning the affected order id
    ///
    /// Failures surface as [`crate::common::errors::BotError::Execution`].
    async fn submit(&self, action: &OrderAction) -> Result<String>;

    /// Name of the venue, used in logs
    fn venue(&self) -> &str;
}
