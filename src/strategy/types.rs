use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{OrderKind, Side};

/// Specification of an order the strategy wants on the exchange
///
/// Prices and sizes are already quantized to the instrument's steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit or trigger price; `None` for market orders
    pub price: Option<Decimal>,
    pub size: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
    /// Take-profit bracket attached to an entry
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Stop-loss bracket attached to an entry
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
}

impl OrderSpec {
    fn base(symbol: impl Into<String>, side: Side, kind: OrderKind, size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind,
            price: None,
            size,
            reduce_only: false,
            take_profit: None,
            stop_loss: None,
        }
    }

    pub fn market(symbol: impl Into<String>, side: Side, size: Decimal) -> Self {
        Self::base(symbol, side, OrderKind::Market, size)
    }

    pub fn limit(symbol: impl Into<String>, side: Side, price: Decimal, size: Decimal) -> Self {
        Self {
            price: Some(price),
            ..Self::base(symbol, side, OrderKind::Limit, size)
        }
    }

    /// Stop order triggered at `trigger`
    pub fn stop(symbol: impl Into<String>, side: Side, trigger: Decimal, size: Decimal) -> Self {
        Self {
            price: Some(trigger),
            ..Self::base(symbol, side, OrderKind::Stop, size)
        }
    }

    /// Reduce-only take-profit triggered at `trigger`
    pub fn take_profit(
        symbol: impl Into<String>,
        side: Side,
        trigger: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            price: Some(trigger),
            reduce_only: true,
            ..Self::base(symbol, side, OrderKind::TakeProfit, size)
        }
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    /// Signed size: positive for buys, negative for sells
    pub fn signed_size(&self) -> Decimal {
        self.side.sign() * self.size
    }
}

/// One corrective action emitted by a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrderAction {
    Place(OrderSpec),
    Modify { id: String, spec: OrderSpec },
    Cancel { id: String, symbol: String },
}

impl OrderAction {
    pub fn cancel(id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::Cancel {
            id: id.into(),
            symbol: symbol.into(),
        }
    }

    pub fn modify(id: impl Into<String>, spec: OrderSpec) -> Self {
        Self::Modify {
            id: id.into(),
            spec,
        }
    }

    pub fn is_place(&self) -> bool {
        matches!(self, Self::Place(_))
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel { .. })
    }

    /// The order spec this action places or modifies toward
    pub fn spec(&self) -> Option<&OrderSpec> {
        match self {
            Self::Place(spec) | Self::Modify { spec, .. } => Some(spec),
            Self::Cancel { .. } => None,
        }
    }
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Place(spec) => write!(
                f,
                "place {} {} {} {}@{}",
                spec.symbol,
                spec.kind,
                spec.side,
                spec.size,
                spec.price.map(|p| p.to_string()).unwrap_or_else(|| "mkt".to_string())
            ),
            Self::Modify { id, spec } => write!(
                f,
                "modify {} -> {} {}@{}",
                id,
                spec.side,
                spec.size,
                spec.price.map(|p| p.to_string()).unwrap_or_else(|| "mkt".to_string())
            ),
            Self::Cancel { id, symbol } => write!(f, "cancel {} on {}", id, symbol),
        }
    }
}

/// One desired grid rung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLevel {
    pub side: Side,
    /// 1-based distance from the reference price
    pub index: u32,
    pub price: Decimal,
}

impl TargetLevel {
    pub fn new(side: Side, index: u32, price: Decimal) -> Self {
        Self { side, index, price }
    }
}

/// Why a strategy stopped trading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    /// The strategy reached its goal (target hit, loops done, wound down)
    Completed,
    /// Start conditions were unsafe (existing position, insufficient balance)
    BadStart,
    /// Observed position contradicts the configured direction
    ConstraintViolation,
    /// Parameters cannot produce a tradable order
    Configuration,
}

impl std::fmt::Display for StopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopKind::Completed => write!(f, "completed"),
            StopKind::BadStart => write!(f, "bad_start"),
            StopKind::ConstraintViolation => write!(f, "constraint_violation"),
            StopKind::Configuration => write!(f, "configuration"),
        }
    }
}

/// Structured "stop trading" signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReason {
    pub kind: StopKind,
    pub message: String,
}

impl StopReason {
    pub fn new(kind: StopKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self::new(StopKind::Completed, message)
    }

    pub fn bad_start(message: impl Into<String>) -> Self {
        Self::new(StopKind::BadStart, message)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one strategy cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome<S> {
    /// Actions to hand to the execution collaborator, in order
    pub actions: Vec<OrderAction>,
    /// State to pass into the next cycle
    pub state: S,
    /// Set when the strategy must not be invoked again
    pub stop: Option<StopReason>,
}

impl<S> CycleOutcome<S> {
    pub fn new(actions: Vec<OrderAction>, state: S) -> Self {
        Self {
            actions,
            state,
            stop: None,
        }
    }

    /// No actions this cycle
    pub fn idle(state: S) -> Self {
        Self::new(Vec::new(), state)
    }

    pub fn stopping(actions: Vec<OrderAction>, state: S, reason: StopReason) -> Self {
        Self {
            actions,
            state,
            stop: Some(reason),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_some()
    }

    /// Convert the state, keeping actions and stop signal
    pub fn map_state<T>(self, f: impl FnOnce(S) -> T) -> CycleOutcome<T> {
        CycleOutcome {
            actions: self.actions,
            state: f(self.state),
            stop: self.stop,
        }
    }
}

/// Verdict of a pure parameter check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterCheck {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ParameterCheck {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    /// First failing check wins
    pub fn and_then(self, next: impl FnOnce() -> ParameterCheck) -> Self {
        if self.valid {
            next()
        } else {
            self
        }
    }

    pub fn require(condition: bool, reason: &str) -> Self {
        if condition {
            Self::ok()
        } else {
            Self::invalid(reason)
        }
    }
}
