//! Cycle driver: snapshot, decide, submit, persist

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::common::errors::{BotError, Result};
use crate::common::snapshot::Snapshot;
use crate::common::traits::Exchange;
use crate::config::StrategyConfig;
use crate::strategy::dispatch::{BotState, BotStrategy};
use crate::strategy::reconciler::cancel_all;
use crate::strategy::types::{OrderAction, StopReason};

/// An action the exchange refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub action: OrderAction,
    pub error: String,
}

/// What happened in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    /// Actions emitted by the strategy, in submission order
    pub actions: Vec<OrderAction>,
    /// Exchange ids of accepted actions
    pub accepted: Vec<String>,
    pub failures: Vec<ExecutionFailure>,
    /// Reason the cycle was skipped without emitting anything
    pub skipped: Option<String>,
    pub stop: Option<StopReason>,
}

impl CycleReport {
    fn skipped(at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            at,
            actions: Vec::new(),
            accepted: Vec::new(),
            failures: Vec::new(),
            skipped: Some(reason.into()),
            stop: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// Drives one strategy instance against an exchange
pub struct StrategyRunner<E: Exchange> {
    exchange: Arc<E>,
    strategy: BotStrategy,
    state: Option<BotState>,
    stopped: Option<StopReason>,
    state_path: Option<PathBuf>,
}

impl<E: Exchange> StrategyRunner<E> {
    pub fn new(exchange: Arc<E>, strategy: BotStrategy) -> Self {
        Self {
            exchange,
            strategy,
            state: None,
            stopped: None,
            state_path: None,
        }
    }

    /// Build the configured strategy from the exchange's instrument catalog
    pub async fn from_config(exchange: Arc<E>, config: &StrategyConfig) -> Result<Self> {
        let catalog = exchange.instruments().await?;
        let strategy = BotStrategy::from_config(config, &catalog)?;
        info!(strategy = strategy.name(), venue = exchange.venue(), "strategy configured");
        Ok(Self::new(exchange, strategy))
    }

    /// Persist state to `path` after every cycle, resuming from it if present
    pub async fn with_state_path(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        self.state = load_state(&path).await?;
        if let Some(state) = &self.state {
            info!(path = %path.display(), kind = state.kind(), "resumed persisted state");
        }
        self.state_path = Some(path);
        Ok(self)
    }

    pub fn strategy(&self) -> &BotStrategy {
        &self.strategy
    }

    pub fn state(&self) -> Option<&BotState> {
        self.state.as_ref()
    }

    /// Set when the strategy asked to stop; no further cycles run
    pub fn stopped(&self) -> Option<&StopReason> {
        self.stopped.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    /// Run one full cycle
    ///
    /// Execution failures are recorded in the report and never retried; the next
    /// cycle re-diffs against whatever the exchange actually holds.
    #[instrument(skip(self), fields(strategy = self.strategy.name()))]
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        if let Some(reason) = &self.stopped {
            return Ok(CycleReport::skipped(now, format!("stopped: {}", reason)));
        }

        let request = self.strategy.snapshot_request();
        let cycle = match Snapshot::capture(self.exchange.as_ref(), &request).await {
            Ok(snapshot) => self
                .strategy
                .on_cycle(now, &snapshot, self.state.as_ref())
                .map(|outcome| (snapshot, outcome)),
            Err(err) => Err(err),
        };
        let (snapshot, mut outcome) = match cycle {
            Ok(cycle) => cycle,
            Err(err) if err.is_skippable() => {
                warn!(error = %err, "cycle skipped");
                return Ok(CycleReport::skipped(now, err.to_string()));
            }
            Err(err) => return Err(err),
        };

        if outcome.is_stopping() {
            let mut actions = leftover_cancels(&snapshot, &outcome.actions);
            if !actions.is_empty() {
                info!(count = actions.len(), "cancelling orders left by stopping strategy");
                actions.append(&mut outcome.actions);
                outcome.actions = actions;
            }
        }

        let mut accepted = Vec::new();
        let mut failures = Vec::new();
        for action in &outcome.actions {
            match self.exchange.submit(action).await {
                Ok(id) => {
                    debug!(action = %action, id = %id, "action accepted");
                    accepted.push(id);
                }
                Err(err) => {
                    warn!(action = %action, error = %err, "action failed");
                    failures.push(ExecutionFailure {
                        action: action.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        match &outcome.stop {
            Some(reason) => {
                info!(reason = %reason, "strategy stopped");
                self.state = None;
                self.stopped = Some(reason.clone());
            }
            None => self.state = outcome.state,
        }
        self.save_state().await?;

        Ok(CycleReport {
            at: now,
            actions: outcome.actions,
            accepted,
            failures,
            skipped: None,
            stop: outcome.stop,
        })
    }

    /// Run cycles every `interval` until the strategy stops
    pub async fn run(&mut self, interval: Duration) -> Result<StopReason> {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let report = self.run_cycle(Utc::now()).await?;
            if let Some(reason) = report.stop {
                return Ok(reason);
            }
        }
    }

    /// Write the current state, or remove the file once the state is discarded
    pub async fn save_state(&self) -> Result<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        match &self.state {
            Some(state) => {
                let json = serde_json::to_string_pretty(state)?;
                tokio::fs::write(path, json).await?;
            }
            None => {
                if tokio::fs::try_exists(path).await? {
                    tokio::fs::remove_file(path).await?;
                }
            }
        }
        Ok(())
    }
}

/// Cancels for snapshot orders a stopping strategy did not cancel itself
fn leftover_cancels(snapshot: &Snapshot, actions: &[OrderAction]) -> Vec<OrderAction> {
    let cancelled: HashSet<&str> = actions
        .iter()
        .filter_map(|action| match action {
            OrderAction::Cancel { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    cancel_all(
        snapshot
            .account
            .orders
            .values()
            .filter(|order| !cancelled.contains(order.id.as_str())),
    )
}

/// Read persisted state, `None` when nothing was saved
pub async fn load_state(path: &Path) -> Result<Option<BotState>> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(BotError::from(err)),
    }
}
