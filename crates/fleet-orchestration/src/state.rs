//! Runtime state management for orchestration
//!
//! This module provides the per-unit lifecycle state shared by the lifecycle
//! orchestrator and the recovery manager, plus the append-only event log.
//! Every unit has its own lock: writes to different units never contend, and
//! a reader sees either the previous or the new state of a unit, never a
//! partial update. Each write is persisted through a [`StateBackend`] while
//! the unit's lock is held, so the durable copy follows the in-memory order.

use crate::{
    Result,
    backend::{StateBackend, memory::MemoryBackend, sled::SledBackend},
};
use chrono::{DateTime, Utc};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle status of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Never observed
    #[default]
    Unknown,
    /// Start requested, waiting for the health check
    Starting,
    /// Passing its health check
    Healthy,
    /// Failing its health check
    Unhealthy,
    /// Unhealthy because a dependency is not healthy
    WaitingOnDependencies,
    /// Stop requested
    Stopping,
    /// Fully stopped
    Stopped,
    /// Could not be started
    StartFailed,
    /// Could not be stopped
    StopFailed,
}

impl UnitStatus {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Unknown => "unknown",
            UnitStatus::Starting => "starting",
            UnitStatus::Healthy => "healthy",
            UnitStatus::Unhealthy => "unhealthy",
            UnitStatus::WaitingOnDependencies => "waiting_on_dependencies",
            UnitStatus::Stopping => "stopping",
            UnitStatus::Stopped => "stopped",
            UnitStatus::StartFailed => "start_failed",
            UnitStatus::StopFailed => "stop_failed",
        }
    }

    /// Whether the status counts against group and overall health
    pub fn counts_as_unhealthy(&self) -> bool {
        matches!(
            self,
            UnitStatus::Unhealthy
                | UnitStatus::WaitingOnDependencies
                | UnitStatus::StartFailed
                | UnitStatus::StopFailed
        )
    }

    /// Whether the lifecycle orchestrator currently owns the unit
    pub fn is_transitional(&self) -> bool {
        matches!(self, UnitStatus::Starting | UnitStatus::Stopping)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable runtime state of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRuntimeState {
    /// Unit id
    pub unit_id: String,
    /// Current status
    pub status: UnitStatus,
    /// When the status last changed
    pub last_transition_at: DateTime<Utc>,
    /// Recovery attempts made since the unit was last healthy
    pub consecutive_failure_count: u32,
    /// Start of the most recent recovery attempt
    pub last_recovery_attempt_at: Option<DateTime<Utc>>,
    /// Start of the current outage
    pub downtime_started_at: Option<DateTime<Utc>>,
    /// Reason for the most recent failure
    #[serde(default)]
    pub last_error: Option<String>,
    /// Whether retry exhaustion has been reported for the current outage
    #[serde(default)]
    pub max_retries_reported: bool,
}

impl UnitRuntimeState {
    /// Fresh state for a unit that has never been observed
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: UnitStatus::Unknown,
            last_transition_at: Utc::now(),
            consecutive_failure_count: 0,
            last_recovery_attempt_at: None,
            downtime_started_at: None,
            last_error: None,
            max_retries_reported: false,
        }
    }

    /// Move to `status`, stamping the transition time if it changed
    pub fn transition(&mut self, status: UnitStatus) {
        if self.status != status {
            debug!("Unit '{}': {} -> {}", self.unit_id, self.status, status);
            self.status = status;
            self.last_transition_at = Utc::now();
        }
    }

    /// Mark the unit healthy and close any open outage
    pub fn mark_healthy(&mut self) {
        self.transition(UnitStatus::Healthy);
        self.consecutive_failure_count = 0;
        self.downtime_started_at = None;
        self.last_error = None;
        self.max_retries_reported = false;
    }

    /// Length of the current outage, if any
    pub fn outage_duration(&self) -> Option<chrono::Duration> {
        self.downtime_started_at.map(|start| Utc::now() - start)
    }
}

/// Kind of an event log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Unit observed healthy without a prior outage
    Healthy,
    /// Start of an outage
    Failure,
    /// Outage ended by recovery
    RecoverySuccess,
    /// A recovery attempt did not restore the unit
    RecoveryFailed,
    /// Automated recovery gave up
    MaxRetriesExceeded,
}

impl EventType {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Healthy => "healthy",
            EventType::Failure => "failure",
            EventType::RecoverySuccess => "recovery_success",
            EventType::RecoveryFailed => "recovery_failed",
            EventType::MaxRetriesExceeded => "max_retries_exceeded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only event log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number assigned by the backend
    pub sequence: u64,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Unit the event is about
    pub unit_id: String,
    /// Kind of event
    pub event_type: EventType,
    /// Human-readable detail
    pub message: String,
}

type StateCell = Arc<Mutex<UnitRuntimeState>>;

/// Keyed store of unit runtime states and the event log
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    cells: Mutex<HashMap<String, StateCell>>,
}

impl StateStore {
    /// Open a persistent store at `path`, resuming any saved states
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = SledBackend::new(path).await?;
        Self::with_backend(Arc::new(backend)).await
    }

    /// Create a non-persistent store
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Create a store over a custom backend, loading its saved states
    pub async fn with_backend(backend: Arc<dyn StateBackend>) -> Result<Self> {
        backend.init().await?;

        let mut cells = HashMap::new();
        for state in backend.load_states().await? {
            cells.insert(state.unit_id.clone(), Arc::new(Mutex::new(state)));
        }
        if !cells.is_empty() {
            info!("Resumed state for {} units", cells.len());
        }

        Ok(Self {
            backend,
            cells: Mutex::new(cells),
        })
    }

    async fn cell(&self, unit_id: &str) -> StateCell {
        let mut cells = self.cells.lock().await;
        cells
            .entry(unit_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UnitRuntimeState::new(unit_id))))
            .clone()
    }

    /// Current state of a unit, created as `unknown` on first access
    pub async fn get(&self, unit_id: &str) -> UnitRuntimeState {
        self.cell(unit_id).await.lock().await.clone()
    }

    /// Current status of a unit
    pub async fn status(&self, unit_id: &str) -> UnitStatus {
        self.cell(unit_id).await.lock().await.status
    }

    /// Replace a unit's state
    pub async fn set(&self, state: UnitRuntimeState) -> Result<()> {
        let cell = self.cell(&state.unit_id).await;
        let mut guard = cell.lock().await;
        self.backend.put_state(&state).await?;
        *guard = state;
        Ok(())
    }

    /// Atomically modify a unit's state and persist the result
    pub async fn update<F>(&self, unit_id: &str, f: F) -> Result<UnitRuntimeState>
    where
        F: FnOnce(&mut UnitRuntimeState),
    {
        let cell = self.cell(unit_id).await;
        let mut guard = cell.lock().await;
        let mut next = guard.clone();
        f(&mut next);
        self.backend.put_state(&next).await?;
        *guard = next.clone();
        Ok(next)
    }

    /// Move a unit to `status`, recording `error` as the last failure reason
    pub async fn transition(
        &self,
        unit_id: &str,
        status: UnitStatus,
        error: Option<String>,
    ) -> Result<UnitRuntimeState> {
        self.update(unit_id, |state| {
            state.transition(status);
            if error.is_some() {
                state.last_error = error;
            }
        })
        .await
    }

    /// Append an entry to the event log
    pub async fn append_event(
        &self,
        unit_id: &str,
        event_type: EventType,
        message: impl Into<String>,
    ) -> Result<EventRecord> {
        let record = EventRecord {
            sequence: 0,
            timestamp: Utc::now(),
            unit_id: unit_id.to_string(),
            event_type,
            message: message.into(),
        };
        let record = self.backend.append_event(record).await?;
        info!(
            unit = %record.unit_id,
            event = %record.event_type,
            "{}",
            record.message
        );
        Ok(record)
    }

    /// The most recent `limit` events, oldest first
    pub async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        self.backend.recent_events(limit).await
    }

    /// States of every unit seen so far, ordered by id
    pub async fn snapshot(&self) -> Vec<UnitRuntimeState> {
        let cells: Vec<StateCell> = self.cells.lock().await.values().cloned().collect();
        let mut states = Vec::with_capacity(cells.len());
        for cell in cells {
            states.push(cell.lock().await.clone());
        }
        states.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        states
    }

    /// Flush pending writes to durable storage
    pub async fn flush(&self) -> Result<()> {
        self.backend.flush().await
    }
}
