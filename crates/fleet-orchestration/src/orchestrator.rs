//! Tier-driven lifecycle orchestration
//!
//! This module implements the start and stop logic for the whole fleet and
//! for single units. Units are processed tier by tier; a tier is a join
//! barrier, so a later tier never begins until every unit of the previous
//! tier reached a terminal state. Within a tier units run concurrently up to
//! a bound, or strictly one after another in id order.

use crate::{
    Error, Result,
    context::OrchestrationContext,
    graph::{DependencyGraph, ValidationReport},
    health::wait_until_healthy,
    shutdown::ShutdownSignal,
    state::UnitStatus,
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use smol::Timer;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operation a run summary describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Start every unit
    StartAll,
    /// Stop every unit
    StopAll,
    /// Stop then start every unit
    RestartAll,
    /// Start one unit
    StartUnit,
    /// Stop one unit
    StopUnit,
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every unit reached its target state
    Success,
    /// Some units failed or were skipped
    PartialFailure,
}

/// A unit that did not reach its target state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Unit id
    pub unit: String,
    /// Why it failed
    pub reason: String,
}

/// Aggregated result of one orchestrator invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run id
    pub run_id: Uuid,
    /// What was run
    pub operation: Operation,
    /// When the run began
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: Option<DateTime<Utc>>,
    /// Units that reached their target state
    pub succeeded: Vec<String>,
    /// Units that failed, with reasons
    pub failed: Vec<UnitFailure>,
    /// Units never attempted because the run was cancelled
    pub skipped: Vec<String>,
    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl RunSummary {
    fn begin(operation: Operation) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            operation,
            started_at: Utc::now(),
            finished_at: None,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        }
    }

    fn record(&mut self, unit: String, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(unit),
            Err(e) => self.failed.push(UnitFailure {
                unit,
                reason: e.to_string(),
            }),
        }
    }

    fn cancel(&mut self, remaining: impl IntoIterator<Item = String>) {
        self.cancelled = true;
        self.skipped.extend(remaining);
    }

    fn absorb(&mut self, other: RunSummary) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
        self.cancelled |= other.cancelled;
    }

    fn finish(mut self) -> Self {
        self.succeeded.sort();
        self.succeeded.dedup();
        self.failed.sort_by(|a, b| a.unit.cmp(&b.unit));
        self.skipped.sort();
        self.skipped.dedup();
        self.finished_at = Some(Utc::now());
        self
    }

    /// Success when nothing failed and nothing was skipped
    pub fn outcome(&self) -> RunOutcome {
        if self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure
        }
    }

    /// Whether `unit` failed in this run
    pub fn has_failed(&self, unit: &str) -> bool {
        self.failed.iter().any(|f| f.unit == unit)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?}: {} succeeded, {} failed, {} skipped",
            self.operation,
            self.outcome(),
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.unit, failure.reason)?;
        }
        Ok(())
    }
}

/// Starts and stops units in dependency order
pub struct LifecycleOrchestrator {
    ctx: OrchestrationContext,
}

impl LifecycleOrchestrator {
    /// Create a new orchestrator
    pub fn new(ctx: OrchestrationContext) -> Self {
        Self { ctx }
    }

    /// The orchestration context
    pub fn context(&self) -> &OrchestrationContext {
        &self.ctx
    }

    /// Run the validator and refuse to act on fatal issues
    fn validation_gate(&self) -> Result<ValidationReport> {
        let report = DependencyGraph::new(&self.ctx.registry).validate();
        for warning in report.warnings() {
            warn!("{}", warning);
        }
        if report.is_fatal(self.ctx.settings.strict) {
            return Err(Error::Configuration(report));
        }
        Ok(report)
    }

    /// Start every unit, tiers ascending
    ///
    /// With `parallel` set, at most `max_concurrency` units of a tier are in
    /// flight at once; otherwise a tier runs sequentially in id order.
    pub async fn start_all(
        &self,
        parallel: bool,
        max_concurrency: usize,
        shutdown: &ShutdownSignal,
    ) -> Result<RunSummary> {
        self.validation_gate()?;
        let tiers = DependencyGraph::new(&self.ctx.registry).tiers_ascending();
        let concurrency = if parallel { max_concurrency.max(1) } else { 1 };

        info!(
            "Starting {} units in {} tiers (concurrency {})",
            self.ctx.registry.len(),
            tiers.len(),
            concurrency
        );

        let mut summary = RunSummary::begin(Operation::StartAll);
        for (index, (tier, ids)) in tiers.iter().enumerate() {
            if shutdown.is_triggered() {
                warn!("Start cancelled before tier {}", tier);
                summary.cancel(tiers[index..].iter().flat_map(|(_, ids)| ids.clone()));
                break;
            }

            info!("Starting tier {}: {}", tier, ids.join(", "));
            let results: Vec<(String, Result<()>)> = stream::iter(ids.iter().cloned())
                .map(|id| async move {
                    let result = self.start_unit(&id).await;
                    (id, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (id, result) in results {
                summary.record(id, result);
            }
        }

        let summary = summary.finish();
        info!("{}", summary);
        Ok(summary)
    }

    /// Stop every unit, tiers descending
    ///
    /// A graceful stop falls back to a hard stop when the unit is still
    /// running after `timeout`.
    pub async fn stop_all(
        &self,
        force: bool,
        timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> Result<RunSummary> {
        self.validation_gate()?;
        let tiers = DependencyGraph::new(&self.ctx.registry).tiers_descending();
        let concurrency = self.ctx.settings.max_concurrency.max(1);

        info!("Stopping {} units (force: {})", self.ctx.registry.len(), force);

        let mut summary = RunSummary::begin(Operation::StopAll);
        for (index, (tier, ids)) in tiers.iter().enumerate() {
            if shutdown.is_triggered() {
                warn!("Stop cancelled before tier {}", tier);
                summary.cancel(tiers[index..].iter().flat_map(|(_, ids)| ids.clone()));
                break;
            }

            info!("Stopping tier {}: {}", tier, ids.join(", "));
            let results: Vec<(String, Result<()>)> = stream::iter(ids.iter().cloned())
                .map(|id| async move {
                    let result = self.stop_unit(&id, force, timeout).await;
                    (id, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (id, result) in results {
                summary.record(id, result);
            }
        }

        let summary = summary.finish();
        info!("{}", summary);
        Ok(summary)
    }

    /// Stop the fleet, then start it again
    pub async fn restart_all(
        &self,
        parallel: bool,
        max_concurrency: usize,
        force: bool,
        timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> Result<RunSummary> {
        let stopped = self.stop_all(force, timeout, shutdown).await?;
        let mut summary = RunSummary::begin(Operation::RestartAll);
        summary.started_at = stopped.started_at;

        // stop successes are not restart successes; only failures carry over
        summary.failed.extend(stopped.failed);
        if stopped.cancelled {
            // nothing was started again
            summary.cancel(self.ctx.registry.ids().map(str::to_string));
            return Ok(summary.finish());
        }

        let started = self.start_all(parallel, max_concurrency, shutdown).await?;
        summary.absorb(started);
        Ok(summary.finish())
    }

    /// Start one unit, honouring the dependency gate
    pub async fn start_one(&self, id: &str) -> Result<RunSummary> {
        self.validation_gate()?;
        self.ctx.unit(id)?;

        let mut summary = RunSummary::begin(Operation::StartUnit);
        let result = self.start_unit(id).await;
        summary.record(id.to_string(), result);
        Ok(summary.finish())
    }

    /// Stop one unit
    ///
    /// Dependents are left running; a warning names those still healthy.
    pub async fn stop_one(&self, id: &str, force: bool, timeout: Duration) -> Result<RunSummary> {
        self.validation_gate()?;
        self.ctx.unit(id)?;

        let graph = DependencyGraph::new(&self.ctx.registry);
        let mut healthy_dependents = Vec::new();
        for dependent in graph.dependents_of(id) {
            if self.ctx.store.status(&dependent).await == UnitStatus::Healthy {
                healthy_dependents.push(dependent);
            }
        }
        if !healthy_dependents.is_empty() {
            warn!(
                "Stopping '{}' while dependents are healthy: {}",
                id,
                healthy_dependents.join(", ")
            );
        }

        let mut summary = RunSummary::begin(Operation::StopUnit);
        let result = self.stop_unit(id, force, timeout).await;
        summary.record(id.to_string(), result);
        Ok(summary.finish())
    }

    /// Dependencies of `id` whose current status is not healthy
    async fn unsatisfied_dependencies(&self, id: &str) -> Result<Vec<String>> {
        let unit = self.ctx.unit(id)?;
        let mut unsatisfied = Vec::new();
        for dep in &unit.dependencies {
            if self.ctx.store.status(dep).await != UnitStatus::Healthy {
                unsatisfied.push(dep.clone());
            }
        }
        Ok(unsatisfied)
    }

    async fn start_unit(&self, id: &str) -> Result<()> {
        let unit = self.ctx.unit(id)?;
        let store = &self.ctx.store;

        let unsatisfied = self.unsatisfied_dependencies(id).await?;
        if !unsatisfied.is_empty() {
            let err = Error::DependencyUnsatisfied {
                unit: id.to_string(),
                dependencies: unsatisfied,
            };
            warn!("{}", err);
            store
                .transition(id, UnitStatus::StartFailed, Some(err.to_string()))
                .await?;
            return Err(err);
        }

        // Already up: adopt it instead of starting it again
        if self.ctx.adapter.is_running(id).await.unwrap_or(false)
            && self.ctx.probe.probe(unit).await.ok
        {
            info!("Unit '{}' is already running and healthy", id);
            store.update(id, |state| state.mark_healthy()).await?;
            return Ok(());
        }

        store.transition(id, UnitStatus::Starting, None).await?;
        info!("Starting unit '{}'", id);

        if let Err(e) = self.ctx.adapter.start(id).await {
            warn!("Failed to start '{}': {}", id, e);
            store
                .transition(id, UnitStatus::StartFailed, Some(e.to_string()))
                .await?;
            return Err(e);
        }

        let result = wait_until_healthy(
            self.ctx.probe.as_ref(),
            unit,
            unit.startup_timeout,
            self.ctx.settings.probe_interval,
        )
        .await;

        if result.ok {
            store.update(id, |state| state.mark_healthy()).await?;
            info!("Unit '{}' is healthy ({}ms)", id, result.latency_ms);
            Ok(())
        } else {
            let err = Error::HealthCheck {
                unit: id.to_string(),
                reason: format!(
                    "not healthy within {:?}: {}",
                    unit.startup_timeout,
                    result.describe()
                ),
            };
            store
                .transition(id, UnitStatus::StartFailed, Some(err.to_string()))
                .await?;
            Err(err)
        }
    }

    async fn stop_unit(&self, id: &str, force: bool, timeout: Duration) -> Result<()> {
        self.ctx.unit(id)?;
        let store = &self.ctx.store;
        let adapter = &self.ctx.adapter;

        store.transition(id, UnitStatus::Stopping, None).await?;
        info!("Stopping unit '{}'", id);

        let outcome = if force {
            adapter.stop(id, false, timeout).await
        } else {
            match adapter.stop(id, true, timeout).await {
                Ok(()) if self.wait_stopped(id, timeout).await => Ok(()),
                Ok(()) => {
                    warn!("Unit '{}' still running after {:?}, forcing stop", id, timeout);
                    adapter.stop(id, false, timeout).await
                }
                Err(e) => {
                    warn!("Graceful stop of '{}' failed ({}), forcing stop", id, e);
                    adapter.stop(id, false, timeout).await
                }
            }
        };

        match outcome {
            Ok(()) => {
                store.transition(id, UnitStatus::Stopped, None).await?;
                info!("Unit '{}' stopped", id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to stop '{}': {}", id, e);
                store
                    .transition(id, UnitStatus::StopFailed, Some(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    /// Poll the adapter until the unit is no longer running or `timeout` passes
    async fn wait_stopped(&self, id: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.ctx.adapter.is_running(id).await {
                Ok(false) => return true,
                Ok(true) => {}
                Err(e) => debug!("Could not query '{}': {}", id, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            Timer::after(self.ctx.settings.probe_interval.min(deadline - now)).await;
        }
    }
}
