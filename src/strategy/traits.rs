use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::errors::Result;
use crate::common::snapshot::{Snapshot, SnapshotRequest};
use crate::strategy::types::{CycleOutcome, ParameterCheck};

/// Core strategy trait
///
/// A strategy is a pure function of its parameters, one snapshot and its previous
/// state. It never talks to the exchange: the runner captures the snapshot the
/// strategy asks for, calls [`Strategy::on_cycle`] and executes the returned actions.
///
/// # Implementation Notes
///
/// - `on_cycle` must not block or perform I/O
/// - No order ids are cached in state; resting orders are re-read every cycle
/// - Returning `Err` with a skippable error leaves the previous state untouched
///
/// # Example
///
/// ```ignore
/// struct Hold { instrument: Instrument }
///
/// impl Strategy for Hold {
///     type Config = HoldConfig;
///     type State = ();
///
///     fn name(&self) -> &'static str { "hold" }
///
///     fn check_parameters(_config: &HoldConfig) -> ParameterCheck { ParameterCheck::ok() }
///
///     fn snapshot_request(&self) -> SnapshotRequest {
///         SnapshotRequest::new().with_instrument(&self.instrument)
///     }
///
///     fn on_cycle(&self, _now: DateTime<Utc>, _snapshot: &Snapshot, _state: Option<&()>)
///         -> Result<CycleOutcome<()>> {
///         Ok(CycleOutcome::idle(()))
///     }
/// }
/// ```
pub trait Strategy: Send + Sync {
    /// Parameters the strategy is built from
    type Config;

    /// Record carried from one cycle to the next
    type State: Clone + Serialize + DeserializeOwned + Send;

    /// Unique identifier for this strategy
    fn name(&self) -> &'static str;

    /// Validate parameters without touching the exchange
    fn check_parameters(config: &Self::Config) -> ParameterCheck
    where
        Self: Sized;

    /// Data the runner must capture before each cycle
    fn snapshot_request(&self) -> SnapshotRequest;

    /// Compute the actions moving the exchange toward this cycle's target
    ///
    /// # Arguments
    /// * `now` - Cycle time, used for scheduling decisions
    /// * `snapshot` - Market and account view captured for this cycle
    /// * `state` - State returned by the previous cycle, `None` on the first
    fn on_cycle(
        &self,
        now: DateTime<Utc>,
        snapshot: &Snapshot,
        state: Option<&Self::State>,
    ) -> Result<CycleOutcome<Self::State>>;
}
