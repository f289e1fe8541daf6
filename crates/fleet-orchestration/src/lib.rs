//! # Fleet orchestration
//!
//! Dependency-aware lifecycle orchestration and self-healing for a fleet of
//! managed units.
//!
//! The crate is organised leaves first: an immutable [`UnitRegistry`] is
//! validated by the [`DependencyGraph`], the [`LifecycleOrchestrator`] starts
//! and stops units tier by tier through a [`RuntimeAdapter`], and the
//! [`RecoveryManager`] keeps probing them and restores unhealthy units. Both
//! share one [`StateStore`] and one [`HealthProbe`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleet_orchestration::{
//!     CommandAdapter, CommandTemplates, HealthCheck, HealthProber, LifecycleOrchestrator,
//!     OrchestrationContext, ShutdownSignal, StateStore, UnitRegistry, UnitSpec,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> fleet_orchestration::Result<()> {
//! let registry = UnitRegistry::from_units([
//!     UnitSpec::new("db", 1, HealthCheck::connectivity("localhost", 5432)),
//!     UnitSpec::new("api", 2, HealthCheck::endpoint("http://localhost:8080/health"))
//!         .with_dependency("db"),
//! ]);
//!
//! let context = OrchestrationContext::new(
//!     registry,
//!     Arc::new(StateStore::in_memory()),
//!     Arc::new(HealthProber::new()),
//!     Arc::new(CommandAdapter::new(CommandTemplates::docker_compose())),
//! );
//!
//! let summary = LifecycleOrchestrator::new(context)
//!     .start_all(true, 5, &ShutdownSignal::never())
//!     .await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod adapter;
mod backend;
mod config;
mod context;
mod executors;
mod graph;
mod health;
mod notifier;
mod orchestrator;
mod recovery;
mod report;
mod shutdown;
mod state;

pub use adapter::RuntimeAdapter;
pub use backend::{StateBackend, memory::MemoryBackend, sled::SledBackend};
pub use config::{DEFAULT_MAX_CONCURRENCY, HealthCheck, RecoveryPolicy, UnitRegistry, UnitSpec};
pub use context::{EngineSettings, OrchestrationContext};
pub use executors::command::{CommandAdapter, CommandTemplates};
pub use graph::{DependencyGraph, Severity, ValidationIssue, ValidationReport, validate};
pub use health::{HealthProbe, HealthProber, HealthResult, ProbeFailure, wait_until_healthy};
pub use notifier::{DRAIN_TIMEOUT, NotificationPayload, NotificationSink, Notifier, WebhookSink};
pub use orchestrator::{LifecycleOrchestrator, Operation, RunOutcome, RunSummary, UnitFailure};
pub use recovery::{PollOutcome, PollReport, RecoveryAction, RecoveryManager};
pub use report::{
    DEGRADED_THRESHOLD, GroupReport, HealthLevel, StatusSnapshot, UnitReport, report_snapshot,
};
pub use shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
pub use state::{EventRecord, EventType, StateStore, UnitRuntimeState, UnitStatus};

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The registry failed validation; no action was taken
    #[error("Configuration invalid:\n{0}")]
    Configuration(ValidationReport),

    /// A declared dependency was not healthy
    #[error("Dependency not satisfied for '{unit}': {}", .dependencies.join(", "))]
    DependencyUnsatisfied {
        /// Unit that could not start
        unit: String,
        /// Dependencies that were not healthy
        dependencies: Vec<String>,
    },

    /// Unit not found in the registry
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// The runtime adapter failed to carry out an action
    #[error("Runtime adapter error for '{unit}': {message}")]
    RuntimeAdapter {
        /// Unit the action was for
        unit: String,
        /// Adapter error detail
        message: String,
    },

    /// The unit did not become healthy
    #[error("Health check failed for '{unit}': {reason}")]
    HealthCheck {
        /// Unit that failed
        unit: String,
        /// Last probe failure
        reason: String,
    },

    /// Automated recovery gave up on the unit
    #[error("Unit '{unit}' exceeded {attempts} recovery attempts")]
    MaxRetriesExceeded {
        /// Unit that exhausted its attempts
        unit: String,
        /// Configured ceiling
        attempts: u32,
    },

    /// State storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Runtime adapter error for `unit`
    pub fn adapter(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RuntimeAdapter {
            unit: unit.into(),
            message: message.into(),
        }
    }
}
