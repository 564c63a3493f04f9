//! Target-vs-resting order diff
//!
//! The reconciler is the only place that turns a desired order set into exchange
//! actions. It never looks at order ids from earlier cycles: every cycle's resting
//! orders are matched against freshly computed targets by symbol, side, kind, price
//! and size, so re-running it against a book that already matches emits nothing.
//! Resting prices and sizes are snapped onto the instrument's steps before they are
//! compared, so venue-side float noise never reads as a mismatch.
//!
//! Output order is cancels, then modifies, then places, so margin held by stale
//! orders is released before new orders need it.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::debug;

use crate::common::quantity::quantize;
use crate::common::types::{Instrument, RestingOrder, Side};
use crate::strategy::types::{OrderAction, OrderSpec};

/// What to do with a resting order that no longer matches any target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replace {
    /// Cancel it and place the target fresh (price ladders)
    CancelAndPlace,
    /// Modify it in place into an unmatched target of the same kind (protective orders)
    Modify,
}

/// How resting size is compared with target size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMatch {
    /// Sizes must be equal
    Exact,
    /// A partially filled remainder (resting size ≤ target size) still matches
    AtMost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub replace: Replace,
    pub size: SizeMatch,
}

impl ReconcilePolicy {
    /// Grid ladders whose target size already accounts for partial fills
    pub const LADDER: Self = Self {
        replace: Replace::CancelAndPlace,
        size: SizeMatch::Exact,
    };

    /// Fixed-size range rungs that may rest partially filled
    pub const RUNGS: Self = Self {
        replace: Replace::CancelAndPlace,
        size: SizeMatch::AtMost,
    };

    /// Stop-loss / take-profit orders that must never leave a gap
    pub const PROTECTIVE: Self = Self {
        replace: Replace::Modify,
        size: SizeMatch::Exact,
    };
}

/// Diffs target orders against resting orders
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    policy: ReconcilePolicy,
    price_step: Decimal,
    size_step: Decimal,
}

impl Reconciler {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            policy,
            price_step: Decimal::ZERO,
            size_step: Decimal::ZERO,
        }
    }

    /// Compare resting orders on `instrument`'s price and size steps
    pub fn for_instrument(mut self, instrument: &Instrument) -> Self {
        self.price_step = instrument.price_step;
        self.size_step = instrument.size_step;
        self
    }

    fn resting_price(&self, order: &RestingOrder) -> Decimal {
        quantize(order.price, self.price_step)
    }

    fn resting_size(&self, order: &RestingOrder) -> Decimal {
        quantize(order.size, self.size_step)
    }

    pub fn ladder() -> Self {
        Self::new(ReconcilePolicy::LADDER)
    }

    pub fn rungs() -> Self {
        Self::new(ReconcilePolicy::RUNGS)
    }

    pub fn protective() -> Self {
        Self::new(ReconcilePolicy::PROTECTIVE)
    }

    /// True when `resting` already satisfies `target`
    pub fn matches(&self, target: &OrderSpec, resting: &RestingOrder) -> bool {
        let resting_price = self.resting_price(resting);
        let resting_size = self.resting_size(resting);
        let price_matches = target.price.map_or(false, |price| price == resting_price);
        let size_matches = match self.policy.size {
            SizeMatch::Exact => resting_size == target.size,
            SizeMatch::AtMost => resting_size > Decimal::ZERO && resting_size <= target.size,
        };
        target.symbol == resting.symbol
            && target.side == resting.side
            && target.kind == resting.kind
            && price_matches
            && size_matches
    }

    /// Produce the minimal action list moving `resting` onto `targets`
    pub fn reconcile<'a, I>(&self, targets: &[OrderSpec], resting: I) -> Vec<OrderAction>
    where
        I: IntoIterator<Item = &'a RestingOrder>,
    {
        let resting: Vec<&RestingOrder> = resting.into_iter().collect();
        let (kept, duplicates) = self.split_duplicates(targets, &resting);

        let mut claimed = vec![false; kept.len()];
        let mut unmatched_targets = Vec::new();
        for target in targets {
            let found = kept
                .iter()
                .enumerate()
                .find(|(i, order)| !claimed[*i] && self.matches(target, order));
            match found {
                Some((i, _)) => claimed[i] = true,
                None => unmatched_targets.push(target),
            }
        }

        let mut cancels: Vec<OrderAction> = duplicates
            .iter()
            .map(|order| OrderAction::cancel(&order.id, &order.symbol))
            .collect();
        let mut modifies = Vec::new();
        let mut places = Vec::new();

        // Protective orders may change direction in place (a flipped position)
        for target in unmatched_targets {
            let reusable = match (self.policy.replace, target.price) {
                (Replace::Modify, Some(_)) => kept.iter().enumerate().find(|(i, order)| {
                    !claimed[*i] && order.symbol == target.symbol && order.kind == target.kind
                }),
                _ => None,
            };
            match reusable {
                Some((i, order)) => {
                    claimed[i] = true;
                    modifies.push(OrderAction::modify(&order.id, target.clone()));
                }
                None => places.push(OrderAction::Place(target.clone())),
            }
        }

        for (i, order) in kept.iter().enumerate() {
            if !claimed[i] {
                cancels.push(OrderAction::cancel(&order.id, &order.symbol));
            }
        }

        debug!(
            targets = targets.len(),
            resting = resting.len(),
            cancels = cancels.len(),
            modifies = modifies.len(),
            places = places.len(),
            "reconciled orders"
        );

        cancels.extend(modifies);
        cancels.extend(places);
        cancels
    }

    /// Keep one order per (symbol, side, price), preferring one that matches a target
    fn split_duplicates<'a>(
        &self,
        targets: &[OrderSpec],
        resting: &[&'a RestingOrder],
    ) -> (Vec<&'a RestingOrder>, Vec<&'a RestingOrder>) {
        let mut kept: Vec<&RestingOrder> = Vec::new();
        let mut duplicates = Vec::new();
        let mut seen: HashSet<(&str, Side, Decimal)> = HashSet::new();

        let is_wanted = |order: &RestingOrder| targets.iter().any(|t| self.matches(t, order));
        let (wanted, unwanted): (Vec<&RestingOrder>, Vec<&RestingOrder>) =
            resting.iter().copied().partition(|order| is_wanted(*order));

        for order in wanted.into_iter().chain(unwanted) {
            if seen.insert((order.symbol.as_str(), order.side, self.resting_price(order))) {
                kept.push(order);
            } else {
                duplicates.push(order);
            }
        }

        // Keep the caller's id ordering for deterministic output
        kept.sort_by(|a, b| a.id.cmp(&b.id));
        duplicates.sort_by(|a, b| a.id.cmp(&b.id));
        (kept, duplicates)
    }
}

/// Cancel every resting order
pub fn cancel_all<'a, I>(resting: I) -> Vec<OrderAction>
where
    I: IntoIterator<Item = &'a RestingOrder>,
{
    resting
        .into_iter()
        .map(|order| OrderAction::cancel(&order.id, &order.symbol))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::OrderKind;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "ETH/USDT:USDT";

    fn resting(id: &str, side: Side, price: Decimal, size: Decimal) -> RestingOrder {
        RestingOrder::limit(id, SYMBOL, side, price, size)
    }

    #[test]
    fn test_places_missing_targets() {
        let targets = vec![
            OrderSpec::limit(SYMBOL, Side::Buy, dec!(99), dec!(1)),
            OrderSpec::limit(SYMBOL, Side::Sell, dec!(101), dec!(1)),
        ];
        let actions = Reconciler::ladder().reconcile(&targets, []);
        assert_eq!(
            actions,
            vec![
                OrderAction::Place(targets[0].clone()),
                OrderAction::Place(targets[1].clone()),
            ]
        );
    }

    #[test]
    fn test_exact_match_emits_nothing() {
        let targets = vec![OrderSpec::limit(SYMBOL, Side::Buy, dec!(99), dec!(1))];
        let book = [resting("a", Side::Buy, dec!(99.00), dec!(1.0))];
        assert!(Reconciler::ladder().reconcile(&targets, &book).is_empty());
    }

    #[test]
    fn test_ladder_cancels_then_places_on_price_change() {
        let targets = vec![OrderSpec::limit(SYMBOL, Side::Buy, dec!(98), dec!(1))];
        let book = [resting("a", Side::Buy, dec!(99), dec!(1))];
        let actions = Reconciler::ladder().reconcile(&targets, &book);
        assert_eq!(
            actions,
            vec![
                OrderAction::cancel("a", SYMBOL),
                OrderAction::Place(targets[0].clone()),
            ]
        );
    }

    #[test]
    fn test_duplicates_are_cancelled_never_modified() {
        let targets = vec![OrderSpec::limit(SYMBOL, Side::Buy, dec!(99), dec!(1))];
        let book = [
            resting("a", Side::Buy, dec!(99), dec!(0.5)),
            resting("b", Side::Buy, dec!(99), dec!(1)),
        ];
        let actions = Reconciler::protective().reconcile(&targets, &book);
        // "b" matches exactly and is kept; "a" duplicates its price
        assert_eq!(actions, vec![OrderAction::cancel("a", SYMBOL)]);
    }

    #[test]
    fn test_protective_policy_modifies_in_place() {
        let target = OrderSpec::stop(SYMBOL, Side::Sell, dec!(95), dec!(2));
        let mut stop = resting("sl", Side::Sell, dec!(94), dec!(2));
        stop.kind = OrderKind::Stop;
        let actions = Reconciler::protective().reconcile(std::slice::from_ref(&target), [&stop]);
        assert_eq!(actions, vec![OrderAction::modify("sl", target)]);
    }

    #[test]
    fn test_protective_modify_may_change_direction() {
        let target = OrderSpec::stop(SYMBOL, Side::Buy, dec!(101), dec!(3));
        let mut stop = resting("sl", Side::Sell, dec!(99), dec!(1));
        stop.kind = OrderKind::Stop;
        let actions = Reconciler::protective().reconcile(std::slice::from_ref(&target), [&stop]);
        assert_eq!(actions, vec![OrderAction::modify("sl", target)]);

        // A different kind is never reused
        let tp = OrderSpec::take_profit(SYMBOL, Side::Buy, dec!(97), dec!(1));
        let actions = Reconciler::protective().reconcile(std::slice::from_ref(&tp), [&stop]);
        assert_eq!(
            actions,
            vec![OrderAction::cancel("sl", SYMBOL), OrderAction::Place(tp)]
        );
    }

    #[test]
    fn test_resting_values_are_quantized_before_matching() {
        let instrument = Instrument::new(SYMBOL, dec!(0.01), dec!(0.001), dec!(0.001));
        let targets = vec![OrderSpec::limit(SYMBOL, Side::Buy, dec!(99), dec!(0.5))];
        let book = [
            resting("a", Side::Buy, dec!(99.0000001), dec!(0.4999999)),
            resting("b", Side::Buy, dec!(98.9999999), dec!(0.5)),
        ];

        let reconciler = Reconciler::ladder().for_instrument(&instrument);
        assert_eq!(reconciler.reconcile(&targets, &book), vec![OrderAction::cancel("b", SYMBOL)]);
        // Without steps the noise reads as a different price
        assert_eq!(Reconciler::ladder().reconcile(&targets, &book).len(), 3);
    }

    #[test]
    fn test_at_most_accepts_partial_fill_remainder() {
        let targets = vec![OrderSpec::limit(SYMBOL, Side::Buy, dec!(125), dec!(5))];
        let book = [resting("a", Side::Buy, dec!(125), dec!(2))];
        assert!(Reconciler::rungs().reconcile(&targets, &book).is_empty());
        assert_eq!(Reconciler::ladder().reconcile(&targets, &book).len(), 2);
    }

    #[test]
    fn test_untargeted_orders_are_cancelled() {
        let book = [
            resting("a", Side::Buy, dec!(99), dec!(1)),
            resting("b", Side::Sell, dec!(101), dec!(1)),
        ];
        let actions = Reconciler::ladder().reconcile(&[], &book);
        assert_eq!(
            actions,
            vec![OrderAction::cancel("a", SYMBOL), OrderAction::cancel("b", SYMBOL)]
        );
        assert_eq!(cancel_all(&book), actions);
    }

    #[test]
    fn test_market_targets_always_place() {
        let targets = vec![OrderSpec::market(SYMBOL, Side::Buy, dec!(1))];
        let book = [resting("a", Side::Buy, dec!(99), dec!(1))];
        let actions = Reconciler::protective().reconcile(&targets, &book);
        assert_eq!(
            actions,
            vec![OrderAction::cancel("a", SYMBOL), OrderAction::Place(targets[0].clone())]
        );
    }

    #[test]
    fn test_reconcile_twice_is_stable() {
        let targets = vec![
            OrderSpec::limit(SYMBOL, Side::Buy, dec!(99), dec!(1)),
            OrderSpec::limit(SYMBOL, Side::Sell, dec!(101), dec!(1)),
        ];
        let book = [
            resting("a", Side::Buy, dec!(99), dec!(1)),
            resting("b", Side::Sell, dec!(101), dec!(1)),
        ];
        let reconciler = Reconciler::ladder();
        assert!(reconciler.reconcile(&targets, &book).is_empty());
        assert!(reconciler.reconcile(&targets, &book).is_empty());
    }
}
