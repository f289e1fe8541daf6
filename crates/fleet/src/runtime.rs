//! Engine wiring for one CLI invocation

use anyhow::{Context, Result};
use fleet_config::{Config, parser};
use fleet_orchestration::{
    CommandAdapter, HealthProbe, HealthProber, OrchestrationContext, RecoveryManager, StateStore,
    UnitStatus,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parsed configuration plus the engine context built from it
pub struct Runtime {
    /// Parsed configuration
    pub config: Config,
    /// Shared engine context
    pub context: OrchestrationContext,
}

impl Runtime {
    /// Open the persistent state store for `config`
    pub async fn open(config: Config) -> Result<Self> {
        let state_dir = config.state_dir();
        let store = StateStore::open(&state_dir)
            .await
            .with_context(|| format!("failed to open state store at {}", state_dir.display()))?;
        info!("Using state store at {}", state_dir.display());
        Ok(Self::build(config, store))
    }

    /// Like [`Runtime::open`], but fall back to live probes when the
    /// persistent store is unavailable
    ///
    /// Read-only commands then probe every unit directly into an in-memory
    /// store.
    pub async fn open_for_reading(config: Config) -> Result<Self> {
        let state_dir = config.state_dir();
        match StateStore::open(&state_dir).await {
            Ok(store) => Ok(Self::build(config, store)),
            Err(e) => {
                warn!(
                    "State store at {} unavailable ({}), probing units directly",
                    state_dir.display(),
                    e
                );
                let runtime = Self::build(config, StateStore::in_memory());
                runtime.probe_all().await?;
                Ok(runtime)
            }
        }
    }

    fn build(config: Config, store: StateStore) -> Self {
        let context = OrchestrationContext::new(
            config.registry(),
            Arc::new(store),
            Arc::new(HealthProber::new()),
            Arc::new(CommandAdapter::new(config.command_templates())),
        )
        .with_notifier(config.notifier())
        .with_settings(config.engine_settings());

        Self { config, context }
    }

    /// Record one live probe result per unit
    async fn probe_all(&self) -> Result<()> {
        let ctx = &self.context;
        for unit in ctx.registry.units() {
            let result = ctx.probe.probe(unit).await;
            debug!("Probed {}: {}", unit.id, result.describe());
            ctx.store
                .update(&unit.id, |state| {
                    if result.ok {
                        state.mark_healthy();
                    } else {
                        state.transition(UnitStatus::Unhealthy);
                        state.last_error = result.failure.as_ref().map(|f| f.to_string());
                    }
                })
                .await?;
        }
        Ok(())
    }

    /// Recovery manager over this runtime's context
    pub fn recovery_manager(&self) -> RecoveryManager {
        RecoveryManager::new(self.context.clone())
    }
}

/// Parse the configuration file
pub fn load_config(config_path: &Path) -> Result<Config> {
    parser::parse_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))
}
