//! Health monitoring and automatic recovery
//!
//! The recovery manager polls every unit on a fixed interval. An unhealthy
//! unit whose dependencies are healthy goes through an escalating sequence of
//! actions (restart, recreate, then recovery of its own dependencies), gated
//! by a per-unit cooldown and bounded by a ceiling on attempts per outage.
//! Only polls that actually run an attempt count against the ceiling.

use crate::{
    Error, Result,
    config::UnitSpec,
    context::OrchestrationContext,
    graph::DependencyGraph,
    health::wait_until_healthy,
    notifier::DRAIN_TIMEOUT,
    shutdown::ShutdownSignal,
    state::{EventType, UnitRuntimeState, UnitStatus},
};
use chrono::Utc;
use futures::{FutureExt, future::BoxFuture, lock::Mutex};
use serde::{Deserialize, Serialize};
use smol::Timer;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Step of the escalation sequence that restored a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Adapter restart
    Restart,
    /// Adapter recreate
    Recreate,
    /// Recovery of unhealthy dependencies
    CascadeDependencies,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryAction::Restart => "restart",
            RecoveryAction::Recreate => "recreate",
            RecoveryAction::CascadeDependencies => "dependency recovery",
        })
    }
}

/// What a poll did with one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    /// Passing its health check
    Healthy,
    /// Back to healthy after an outage
    Recovered,
    /// Unhealthy, but a dependency is not healthy either
    WaitingOnDependencies,
    /// Unhealthy, last attempt too recent
    CoolingDown,
    /// Unhealthy, automated recovery has given up
    RetriesExhausted,
    /// A recovery attempt ran and did not restore the unit
    RecoveryFailed,
    /// Not examined this cycle
    Skipped,
}

impl fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollOutcome::Healthy => "healthy",
            PollOutcome::Recovered => "recovered",
            PollOutcome::WaitingOnDependencies => "waiting on dependencies",
            PollOutcome::CoolingDown => "cooling down",
            PollOutcome::RetriesExhausted => "retries exhausted",
            PollOutcome::RecoveryFailed => "recovery failed",
            PollOutcome::Skipped => "skipped",
        })
    }
}

/// Per-unit outcomes of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    /// Outcome by unit id
    pub outcomes: BTreeMap<String, PollOutcome>,
}

impl PollReport {
    /// Outcome for one unit
    pub fn get(&self, id: &str) -> Option<PollOutcome> {
        self.outcomes.get(id).copied()
    }

    /// Number of units with the given outcome
    pub fn count(&self, outcome: PollOutcome) -> usize {
        self.outcomes.values().filter(|o| **o == outcome).count()
    }
}

/// Fixed-interval monitor with escalating recovery
pub struct RecoveryManager {
    ctx: OrchestrationContext,
    /// Serialises recovery per unit
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl RecoveryManager {
    /// Create a manager for every unit in the context's registry
    pub fn new(ctx: OrchestrationContext) -> Self {
        let locks = ctx
            .registry
            .ids()
            .map(|id| (id.to_string(), Arc::new(Mutex::new(()))))
            .collect();
        Self { ctx, locks }
    }

    /// The orchestration context
    pub fn context(&self) -> &OrchestrationContext {
        &self.ctx
    }

    /// Run one poll over every unit, dependencies first
    pub async fn poll_once(&self) -> PollReport {
        let order: Vec<String> = DependencyGraph::new(&self.ctx.registry)
            .tiers_ascending()
            .into_iter()
            .flat_map(|(_, ids)| ids)
            .collect();

        let mut report = PollReport::default();
        for id in order {
            let outcome = match self.check_unit(&id, false, 0).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Recovery check for '{}' failed: {}", id, e);
                    PollOutcome::Skipped
                }
            };
            report.outcomes.insert(id, outcome);
        }
        report
    }

    /// Check and, if needed, recover one unit right away
    ///
    /// Bypasses the cooldown once; the retry ceiling still applies.
    pub async fn trigger_recovery(&self, id: &str) -> Result<PollOutcome> {
        self.ctx.unit(id)?;
        info!("Manual recovery requested for '{}'", id);
        self.check_unit(id, true, 0).await
    }

    /// Reset a unit's consecutive failure count
    pub async fn reset_failures(&self, id: &str) -> Result<UnitRuntimeState> {
        self.ctx.unit(id)?;
        info!("Resetting failure count for '{}'", id);
        self.ctx
            .store
            .update(id, |state| {
                state.consecutive_failure_count = 0;
                state.max_retries_reported = false;
            })
            .await
    }

    /// Poll until `shutdown` is triggered
    ///
    /// A cycle in progress always finishes. Outstanding notifications are
    /// drained and the store is flushed on exit.
    pub async fn run(&self, shutdown: &ShutdownSignal) -> Result<()> {
        let interval = self.ctx.settings.recovery_interval;
        info!(
            "Recovery loop started for {} units (interval {:?})",
            self.ctx.registry.len(),
            interval
        );

        loop {
            let report = self.poll_once().await;
            debug!(
                "Poll finished: {} healthy, {} recovered, {} failing",
                report.count(PollOutcome::Healthy),
                report.count(PollOutcome::Recovered),
                report.count(PollOutcome::RecoveryFailed) + report.count(PollOutcome::RetriesExhausted)
            );

            if shutdown.is_triggered() {
                break;
            }
            let stop = smol::future::or(
                async {
                    shutdown.wait().await;
                    true
                },
                async {
                    Timer::after(interval).await;
                    false
                },
            )
            .await;
            if stop {
                break;
            }
        }

        self.ctx.notifier.drain(DRAIN_TIMEOUT).await;
        self.ctx.store.flush().await?;
        info!("Recovery loop stopped");
        Ok(())
    }

    /// Units started or stopped by the orchestrator or the operator are left alone
    fn owned_elsewhere(status: UnitStatus, manual: bool) -> bool {
        status.is_transitional() || (status == UnitStatus::Stopped && !manual)
    }

    fn check_unit<'a>(
        &'a self,
        id: &'a str,
        manual: bool,
        depth: usize,
    ) -> BoxFuture<'a, Result<PollOutcome>> {
        async move {
            let unit = self.ctx.unit(id)?;
            if depth > self.ctx.registry.len() {
                warn!("Dependency recovery for '{}' is nested too deep", id);
                return Ok(PollOutcome::Skipped);
            }

            let lock = self
                .locks
                .get(id)
                .cloned()
                .ok_or_else(|| Error::UnitNotFound(id.to_string()))?;
            let Some(_guard) = lock.try_lock() else {
                debug!("Recovery already in flight for '{}'", id);
                return Ok(PollOutcome::Skipped);
            };

            let state = self.ctx.store.get(id).await;
            if Self::owned_elsewhere(state.status, manual) {
                debug!("Skipping '{}' ({})", id, state.status);
                return Ok(PollOutcome::Skipped);
            }

            let result = self.ctx.probe.probe(unit).await;
            if result.ok {
                return self.observe_healthy(id, &state).await;
            }

            let waiting = self.unhealthy_dependencies(unit).await;
            if !waiting.is_empty() {
                info!(
                    "Unit '{}' is unhealthy while dependencies are down: {}",
                    id,
                    waiting.join(", ")
                );
                self.ctx
                    .store
                    .transition(
                        id,
                        UnitStatus::WaitingOnDependencies,
                        Some(format!("waiting on {}", waiting.join(", "))),
                    )
                    .await?;
                return Ok(PollOutcome::WaitingOnDependencies);
            }

            let reason = result.describe();
            let mut outage_opened = false;
            let state = self
                .ctx
                .store
                .update(id, |state| {
                    state.transition(UnitStatus::Unhealthy);
                    state.last_error = Some(reason.clone());
                    if state.downtime_started_at.is_none() {
                        state.downtime_started_at = Some(Utc::now());
                        outage_opened = true;
                    }
                })
                .await?;

            if outage_opened {
                self.emit(id, EventType::Failure, format!("health check failed: {}", reason))
                    .await?;
            } else {
                warn!(
                    "Unit '{}' still unhealthy ({} failed attempts): {}",
                    id, state.consecutive_failure_count, reason
                );
            }

            self.attempt_recovery(unit, &state, manual, depth).await
        }
        .boxed()
    }

    async fn observe_healthy(&self, id: &str, state: &UnitRuntimeState) -> Result<PollOutcome> {
        if state.status == UnitStatus::Healthy && state.downtime_started_at.is_none() {
            return Ok(PollOutcome::Healthy);
        }

        let outage = state.outage_duration();
        self.ctx.store.update(id, |state| state.mark_healthy()).await?;

        match outage {
            Some(outage) => {
                self.emit(
                    id,
                    EventType::RecoverySuccess,
                    format!("healthy again after {}s outage", outage.num_seconds()),
                )
                .await?;
                Ok(PollOutcome::Recovered)
            }
            None => {
                self.emit(id, EventType::Healthy, "passing health check").await?;
                Ok(PollOutcome::Healthy)
            }
        }
    }

    async fn unhealthy_dependencies(&self, unit: &UnitSpec) -> Vec<String> {
        let mut unhealthy = Vec::new();
        for dep in &unit.dependencies {
            if self.ctx.store.status(dep).await != UnitStatus::Healthy {
                unhealthy.push(dep.clone());
            }
        }
        unhealthy
    }

    async fn attempt_recovery(
        &self,
        unit: &UnitSpec,
        state: &UnitRuntimeState,
        manual: bool,
        depth: usize,
    ) -> Result<PollOutcome> {
        let id = unit.id.as_str();
        let policy = &unit.recovery;

        if state.consecutive_failure_count >= policy.max_attempts {
            self.report_exhausted(id, state).await?;
            return Ok(PollOutcome::RetriesExhausted);
        }

        if !manual {
            if let Some(last) = state.last_recovery_attempt_at {
                let elapsed = (Utc::now() - last).to_std().unwrap_or_default();
                if elapsed < policy.backoff {
                    debug!(
                        "Unit '{}' cooling down ({:?} of {:?})",
                        id, elapsed, policy.backoff
                    );
                    return Ok(PollOutcome::CoolingDown);
                }
            }
        }

        let state = self
            .ctx
            .store
            .update(id, |state| {
                state.consecutive_failure_count += 1;
                state.last_recovery_attempt_at = Some(Utc::now());
            })
            .await?;
        let attempt = state.consecutive_failure_count;
        info!(
            "Attempting recovery of '{}' (attempt {}/{})",
            id, attempt, policy.max_attempts
        );

        match self.escalate(unit, manual, depth).await {
            Some(action) => {
                let outage = state
                    .outage_duration()
                    .map(|d| d.num_seconds())
                    .unwrap_or_default();
                self.ctx.store.update(id, |state| state.mark_healthy()).await?;
                self.emit(
                    id,
                    EventType::RecoverySuccess,
                    format!("recovered by {} after {}s outage", action, outage),
                )
                .await?;
                Ok(PollOutcome::Recovered)
            }
            None => {
                self.emit(
                    id,
                    EventType::RecoveryFailed,
                    format!(
                        "recovery attempt {} of {} did not restore the unit",
                        attempt, policy.max_attempts
                    ),
                )
                .await?;
                if attempt >= policy.max_attempts {
                    self.report_exhausted(id, &state).await?;
                }
                Ok(PollOutcome::RecoveryFailed)
            }
        }
    }

    /// Log `max_retries_exceeded` once per outage
    async fn report_exhausted(&self, id: &str, state: &UnitRuntimeState) -> Result<()> {
        if state.max_retries_reported {
            return Ok(());
        }
        let attempts = state.consecutive_failure_count;
        self.ctx
            .store
            .update(id, |state| state.max_retries_reported = true)
            .await?;
        error!(
            "{}",
            Error::MaxRetriesExceeded {
                unit: id.to_string(),
                attempts,
            }
        );
        self.emit(
            id,
            EventType::MaxRetriesExceeded,
            format!(
                "giving up after {} failed recovery attempts; manual intervention required",
                attempts
            ),
        )
        .await
    }

    /// Run the escalation sequence, stopping at the first step that works
    async fn escalate(&self, unit: &UnitSpec, manual: bool, depth: usize) -> Option<RecoveryAction> {
        let id = unit.id.as_str();
        let adapter = &self.ctx.adapter;

        match adapter.restart(id).await {
            Ok(()) if self.reprobe(unit).await => return Some(RecoveryAction::Restart),
            Ok(()) => debug!("Restart did not restore '{}'", id),
            Err(e) => warn!("Restart of '{}' failed: {}", id, e),
        }

        match adapter.recreate(id).await {
            Ok(()) if self.reprobe(unit).await => return Some(RecoveryAction::Recreate),
            Ok(()) => debug!("Recreate did not restore '{}'", id),
            Err(e) => warn!("Recreate of '{}' failed: {}", id, e),
        }

        let mut cascaded = false;
        for dep in &unit.dependencies {
            let Some(dep_spec) = self.ctx.registry.get(dep) else {
                continue;
            };
            if self.ctx.probe.probe(dep_spec).await.ok {
                continue;
            }

            cascaded = true;
            info!("Recovering dependency '{}' of '{}'", dep, id);
            match self.check_unit(dep, manual, depth + 1).await {
                Ok(outcome) => debug!("Dependency '{}': {}", dep, outcome),
                Err(e) => warn!("Dependency recovery of '{}' failed: {}", dep, e),
            }
        }

        if cascaded && self.reprobe(unit).await {
            return Some(RecoveryAction::CascadeDependencies);
        }
        None
    }

    async fn reprobe(&self, unit: &UnitSpec) -> bool {
        wait_until_healthy(
            self.ctx.probe.as_ref(),
            unit,
            unit.startup_timeout,
            self.ctx.settings.probe_interval,
        )
        .await
        .ok
    }

    async fn emit(&self, id: &str, event_type: EventType, message: impl Into<String>) -> Result<()> {
        let record = self.ctx.store.append_event(id, event_type, message).await?;
        self.ctx.notifier.notify(&record);
        Ok(())
    }
}
