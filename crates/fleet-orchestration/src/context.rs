//! Orchestration context shared by the orchestrator and the recovery manager
//!
//! The context carries the immutable registry and the shared collaborators
//! (state store, prober, runtime adapter, notifier) so neither component
//! needs ambient global state.

use crate::{
    Error, Result,
    adapter::RuntimeAdapter,
    config::{DEFAULT_MAX_CONCURRENCY, UnitRegistry, UnitSpec},
    health::HealthProbe,
    notifier::Notifier,
    state::StateStore,
};
use std::sync::Arc;
use std::time::Duration;

/// Engine-wide tunables
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Units started concurrently within one tier
    pub max_concurrency: usize,
    /// Spacing between probes while waiting for a unit to become healthy
    pub probe_interval: Duration,
    /// Spacing between recovery polls
    pub recovery_interval: Duration,
    /// Treat validation warnings as fatal
    pub strict: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            probe_interval: Duration::from_secs(2),
            recovery_interval: Duration::from_secs(30),
            strict: false,
        }
    }
}

/// Context object for orchestration and recovery
#[derive(Clone)]
pub struct OrchestrationContext {
    /// Unit registry
    pub registry: Arc<UnitRegistry>,

    /// Shared runtime state
    pub store: Arc<StateStore>,

    /// Health prober
    pub probe: Arc<dyn HealthProbe>,

    /// Runtime adapter acting on units
    pub adapter: Arc<dyn RuntimeAdapter>,

    /// Push channel for recovery outcomes
    pub notifier: Arc<Notifier>,

    /// Engine tunables
    pub settings: EngineSettings,
}

impl OrchestrationContext {
    /// Create a context with default settings and notifications disabled
    pub fn new(
        registry: UnitRegistry,
        store: Arc<StateStore>,
        probe: Arc<dyn HealthProbe>,
        adapter: Arc<dyn RuntimeAdapter>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            probe,
            adapter,
            notifier: Arc::new(Notifier::disabled()),
            settings: EngineSettings::default(),
        }
    }

    /// Replace the notifier
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Look up a unit, failing with [`Error::UnitNotFound`]
    pub fn unit(&self, id: &str) -> Result<&UnitSpec> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::UnitNotFound(id.to_string()))
    }
}
