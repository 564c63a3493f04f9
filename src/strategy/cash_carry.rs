//! Spot-long / perpetual-short funding capture
//!
//! Holds equal and opposite token exposure on a spot and a perpetual market while the
//! funding rate pays shorts. When funding drops below the threshold the targets go to
//! zero and the strategy stops once both legs are flat.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::errors::{BotError, Result};
use crate::common::quantity::percent;
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::common::types::{Instrument, InstrumentKind, Side};
use crate::config::CashCarryConfig;
use crate::strategy::reconciler::Reconciler;
use crate::strategy::size_calculator::{NeutralLegs, SizeCalculator};
use crate::strategy::traits::Strategy;
use crate::strategy::types::{
    CycleOutcome, OrderAction, OrderSpec, ParameterCheck, StopKind, StopReason,
};

/// Cash-and-carry state carried between cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashCarryState {
    /// Spot target in tokens
    pub spot_target: Decimal,
    /// Perpetual target in contracts, negative
    pub perp_target: Decimal,
    /// Set once funding falls below the threshold; never cleared
    pub winding_down: bool,
}

impl CashCarryState {
    fn legs(&self, multiplier: Decimal) -> NeutralLegs {
        NeutralLegs {
            spot: self.spot_target,
            perp: self.perp_target,
            multiplier,
        }
    }
}

/// Tokens per contract implied by a perpetual's base asset, e.g. `1000PEPE` for `PEPE`
fn prefix_multiplier(base: &str, token: &str) -> Option<Decimal> {
    if base == token {
        return Some(Decimal::ONE);
    }
    let prefix = base.strip_suffix(token)?;
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    prefix.parse::<Decimal>().ok()
}

/// Resolve the spot and perpetual legs of `token` from an instrument catalog
pub fn resolve_pair(
    token: &str,
    quote: &str,
    catalog: &[Instrument],
) -> Result<(Instrument, Instrument, Decimal)> {
    let spot = catalog
        .iter()
        .find(|i| i.kind == InstrumentKind::Spot && i.base == token && i.quote == quote)
        .ok_or_else(|| {
            BotError::Configuration(format!("no spot market for {}/{}", token, quote))
        })?;

    let (perp, multiplier) = catalog
        .iter()
        .filter(|i| i.kind == InstrumentKind::Perpetual && i.quote == quote)
        .find_map(|i| prefix_multiplier(&i.base, token).map(|m| (i, m)))
        .ok_or_else(|| {
            BotError::Configuration(format!("no perpetual market for {}/{}", token, quote))
        })?;

    let multiplier = if multiplier == Decimal::ONE {
        perp.contract_multiplier
    } else {
        multiplier
    };
    Ok((spot.clone(), perp.clone(), multiplier))
}

pub struct CashCarryStrategy {
    spot: Instrument,
    perp: Instrument,
    multiplier: Decimal,
    value: Decimal,
    slippage: Decimal,
    funding_threshold: Decimal,
    quote: String,
}

impl CashCarryStrategy {
    pub fn new(config: &CashCarryConfig, catalog: &[Instrument]) -> Result<Self> {
        let check = Self::check_parameters(config);
        if !check.valid {
            return Err(BotError::Configuration(check.reason.unwrap_or_default()));
        }
        let (spot, perp, multiplier) = resolve_pair(&config.token, &config.quote, catalog)?;
        info!(
            spot = %spot.symbol,
            perp = %perp.symbol,
            multiplier = %multiplier,
            "trading cash-and-carry pair"
        );
        Ok(Self {
            spot,
            perp,
            multiplier,
            value: config.value,
            slippage: percent(config.slippage_pc),
            funding_threshold: percent(config.funding_pc_threshold),
            quote: config.quote.clone(),
        })
    }

    pub fn spot(&self) -> &Instrument {
        &self.spot
    }

    pub fn perp(&self) -> &Instrument {
        &self.perp
    }

    /// Limit order closing `delta` on one leg, or `None` when below the minimum size
    fn leg_target(
        &self,
        instrument: &Instrument,
        delta: Decimal,
        snapshot: &Snapshot,
    ) -> Result<Option<OrderSpec>> {
        if delta.abs() < instrument.min_size {
            return Ok(None);
        }
        let Some(side) = Side::from_sign(delta) else {
            return Ok(None);
        };
        let book = snapshot.book(&instrument.symbol)?;
        let price = book.touch(side) * (Decimal::ONE + side.sign() * self.slippage);
        Ok(Some(OrderSpec::limit(
            &instrument.symbol,
            side,
            instrument.quantize_price(price),
            instrument.quantize_size(delta.abs()),
        )))
    }

    /// Targets for the first cycle, or the reason the carry cannot start
    fn initial_state(
        &self,
        snapshot: &Snapshot,
    ) -> Result<std::result::Result<CashCarryState, StopReason>> {
        let balance = snapshot.balance(&self.quote);
        if balance < self.value {
            return Ok(Err(StopReason::bad_start(format!(
                "{} {} balance is below the {} target value",
                balance, self.quote, self.value
            ))));
        }

        let spot_mid = snapshot.mid(&self.spot.symbol)?;
        let perp_mid = snapshot.mid(&self.perp.symbol)?;
        match SizeCalculator::neutral_legs(
            self.value,
            spot_mid,
            perp_mid,
            &self.spot,
            &self.perp,
            self.multiplier,
        ) {
            Ok(legs) => Ok(Ok(CashCarryState {
                spot_target: legs.spot,
                perp_target: legs.perp,
                winding_down: false,
            })),
            Err(BotError::Configuration(message)) => {
                Ok(Err(StopReason::new(StopKind::Configuration, message)))
            }
            Err(err) => Err(err),
        }
    }
}

impl Strategy for CashCarryStrategy {
    type Config = CashCarryConfig;
    type State = CashCarryState;

    fn name(&self) -> &'static str {
        "cash_and_carry"
    }

    fn check_parameters(config: &CashCarryConfig) -> ParameterCheck {
        ParameterCheck::require(!config.token.is_empty(), "token must be set.")
            .and_then(|| {
                ParameterCheck::require(config.value > Decimal::ZERO, "value must be positive.")
            })
            .and_then(|| {
                ParameterCheck::require(
                    config.slippage_pc >= Decimal::ZERO,
                    "slippage cannot be negative.",
                )
            })
    }

    fn snapshot_request(&self) -> SnapshotRequest {
        SnapshotRequest::new()
            .with_instrument(&self.spot)
            .with_instrument(&self.perp)
            .with_funding(self.perp.symbol.clone())
            .with_balance(self.quote.clone())
    }

    fn on_cycle(
        &self,
        _now: DateTime<Utc>,
        snapshot: &Snapshot,
        state: Option<&CashCarryState>,
    ) -> Result<CycleOutcome<CashCarryState>> {
        let mut state = match state {
            Some(state) => state.clone(),
            None => match self.initial_state(snapshot)? {
                Ok(state) => state,
                Err(reason) => {
                    warn!(reason = %reason, "cash-and-carry cannot start");
                    let flat = NeutralLegs::flat(self.multiplier);
                    let state = CashCarryState {
                        spot_target: flat.spot,
                        perp_target: flat.perp,
                        winding_down: false,
                    };
                    return Ok(CycleOutcome::stopping(Vec::new(), state, reason));
                }
            },
        };

        let funding = snapshot.funding_rate(&self.perp.symbol)?;
        if funding < self.funding_threshold && !state.winding_down {
            info!(
                symbol = %self.perp.symbol,
                funding = %funding,
                threshold = %self.funding_threshold,
                "funding below threshold, winding down"
            );
            state.winding_down = true;
        }
        let targets = if state.winding_down {
            NeutralLegs::flat(self.multiplier)
        } else {
            state.legs(self.multiplier)
        };

        let spot_position = self.spot.quantize_size(snapshot.net_position(&self.spot));
        let perp_position = self.perp.quantize_size(snapshot.net_position(&self.perp));

        let mut actions = Vec::new();
        for (instrument, target, current) in [
            (&self.spot, targets.spot, spot_position),
            (&self.perp, targets.perp, perp_position),
        ] {
            let wanted: Vec<OrderSpec> = self
                .leg_target(instrument, target - current, snapshot)?
                .into_iter()
                .collect();
            let resting = snapshot
                .orders_for(&instrument.symbol)
                .filter(|order| order.is_entry_limit());
            actions.extend(
                Reconciler::ladder()
                    .for_instrument(instrument)
                    .reconcile(&wanted, resting),
            );
        }

        debug!(
            spot = %spot_position,
            perp = %perp_position,
            spot_target = %targets.spot,
            perp_target = %targets.perp,
            actions = actions.len(),
            "cash-and-carry legs reconciled"
        );

        let flat = spot_position.abs() < self.spot.min_size
            && perp_position.abs() < self.perp.min_size;
        if state.winding_down && flat {
            info!(token = %self.spot.base, "cash-and-carry wound down");
            return Ok(CycleOutcome::stopping(
                actions,
                state,
                StopReason::completed("both legs closed after funding exit"),
            ));
        }

        Ok(CycleOutcome::new(actions, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{BookTop, Position, RestingOrder};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const SPOT: &str = "ETH/USDT";
    const PERP: &str = "ETH/USDT:USDT";

    fn catalog() -> Vec<Instrument> {
        vec![
            Instrument::new("BTC/USDT", dec!(0.1), dec!(0.0001), dec!(0.0001)),
            Instrument::new(SPOT, dec!(0.01), dec!(0.0001), dec!(0.001)),
            Instrument::new(PERP, dec!(0.01), dec!(0.01), dec!(0.01)),
        ]
    }

    fn config() -> CashCarryConfig {
        CashCarryConfig {
            token: "ETH".to_string(),
            value: dec!(1000),
            slippage_pc: dec!(0.05),
            funding_pc_threshold: dec!(0.001),
            quote: "USDT".to_string(),
        }
    }

    fn strategy() -> CashCarryStrategy {
        CashCarryStrategy::new(&config(), &catalog()).unwrap()
    }

    fn snapshot(funding: Decimal) -> Snapshot {
        Snapshot::new(Utc::now())
            .with_book(SPOT, BookTop::new(dec!(1999), dec!(2001)))
            .with_book(PERP, BookTop::new(dec!(2000), dec!(2002)))
            .with_funding_rate(PERP, funding)
            .with_balance("USDT", dec!(5000))
    }

    fn limit(id: &str, spec: &OrderSpec) -> RestingOrder {
        RestingOrder::limit(id, &spec.symbol, spec.side, spec.price.unwrap(), spec.size)
    }

    #[test]
    fn test_resolves_pair() {
        let strategy = strategy();
        assert_eq!(strategy.spot().symbol, SPOT);
        assert_eq!(strategy.perp().symbol, PERP);
    }

    #[test]
    fn test_resolves_prefixed_contract() {
        let catalog = vec![
            Instrument::new("PEPE/USDT", dec!(0.0000001), dec!(1), dec!(1)),
            Instrument::new("1000PEPE/USDT:USDT", dec!(0.0001), dec!(1), dec!(1)),
        ];
        let (spot, perp, multiplier) = resolve_pair("PEPE", "USDT", &catalog).unwrap();
        assert_eq!(spot.symbol, "PEPE/USDT");
        assert_eq!(perp.symbol, "1000PEPE/USDT:USDT");
        assert_eq!(multiplier, dec!(1000));

        assert!(resolve_pair("PEP", "USDT", &catalog).is_err());
    }

    #[test]
    fn test_opens_neutral_legs() {
        let strategy = strategy();
        let outcome = strategy.on_cycle(Utc::now(), &snapshot(dec!(0.0001)), None).unwrap();

        assert_eq!(outcome.state.spot_target, dec!(0.5));
        assert_eq!(outcome.state.perp_target, dec!(-0.5));
        assert_eq!(
            outcome.actions,
            vec![
                OrderAction::Place(OrderSpec::limit(SPOT, Side::Buy, dec!(2002), dec!(0.5))),
                OrderAction::Place(OrderSpec::limit(PERP, Side::Sell, dec!(1999), dec!(0.5))),
            ]
        );
    }

    #[test]
    fn test_neutral_targets() {
        let strategy = strategy();
        let outcome = strategy.on_cycle(Utc::now(), &snapshot(dec!(0.0001)), None).unwrap();
        let state = outcome.state;
        assert_eq!(state.spot_target + state.perp_target * strategy.multiplier, Decimal::ZERO);
    }

    #[test]
    fn test_resting_legs_are_idempotent() {
        let strategy = strategy();
        let first = strategy.on_cycle(Utc::now(), &snapshot(dec!(0.0001)), None).unwrap();
        let mut snap = snapshot(dec!(0.0001));
        for (i, spec) in first.actions.iter().filter_map(OrderAction::spec).enumerate() {
            snap = snap.with_order(limit(&i.to_string(), spec));
        }
        let second = strategy.on_cycle(Utc::now(), &snap, Some(&first.state)).unwrap();
        assert!(second.actions.is_empty());
    }

    #[test]
    fn test_small_delta_suppressed() {
        let strategy = strategy();
        let state = CashCarryState {
            spot_target: dec!(0.49),
            perp_target: dec!(-0.49),
            winding_down: false,
        };
        let snap = snapshot(dec!(0.0001))
            .with_balance("ETH", dec!(0.4895))
            .with_position(Position::new(PERP, dec!(-0.49), dec!(2001)));
        let outcome = strategy.on_cycle(Utc::now(), &snap, Some(&state)).unwrap();
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn test_wind_down_closes_before_stopping() {
        let strategy = strategy();
        let state = CashCarryState {
            spot_target: dec!(0.49),
            perp_target: dec!(-0.49),
            winding_down: false,
        };
        let held = snapshot(dec!(0.000001))
            .with_balance("ETH", dec!(0.49))
            .with_position(Position::new(PERP, dec!(-0.49), dec!(2001)));

        let outcome = strategy.on_cycle(Utc::now(), &held, Some(&state)).unwrap();
        assert!(outcome.state.winding_down);
        assert!(!outcome.is_stopping());
        assert_eq!(
            outcome.actions,
            vec![
                OrderAction::Place(OrderSpec::limit(SPOT, Side::Sell, dec!(1998), dec!(0.49))),
                OrderAction::Place(OrderSpec::limit(PERP, Side::Buy, dec!(2003), dec!(0.49))),
            ]
        );

        // Funding recovering does not resume the carry
        let half = snapshot(dec!(0.01)).with_balance("ETH", dec!(0.49));
        let outcome = strategy.on_cycle(Utc::now(), &half, Some(&outcome.state)).unwrap();
        assert!(!outcome.is_stopping());
        assert_eq!(outcome.actions.len(), 1);

        let flat = snapshot(dec!(0.01));
        let outcome = strategy.on_cycle(Utc::now(), &flat, Some(&outcome.state)).unwrap();
        assert!(outcome.actions.is_empty());
        assert_eq!(outcome.stop.unwrap().kind, StopKind::Completed);
    }

    #[test]
    fn test_bad_start_on_low_balance() {
        let strategy = strategy();
        let snap = snapshot(dec!(0.0001)).with_balance("USDT", dec!(10));
        let outcome = strategy.on_cycle(Utc::now(), &snap, None).unwrap();
        assert!(outcome.actions.is_empty());
        assert_eq!(outcome.stop.unwrap().kind, StopKind::BadStart);
    }

    #[test]
    fn test_missing_funding_skips_cycle() {
        let strategy = strategy();
        let mut snap = snapshot(dec!(0.0001));
        snap.market.funding_rates.clear();
        let err = strategy.on_cycle(Utc::now(), &snap, None).unwrap_err();
        assert!(err.is_skippable());
    }
}
