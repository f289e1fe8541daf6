//! # Fleet Configuration
//!
//! YAML configuration parser for fleet.
//!
//! This crate parses a fleet file and converts it into the orchestration
//! engine's types: the [`UnitRegistry`], engine settings, runtime command
//! templates and the notifier.

#![warn(missing_docs)]

use fleet_orchestration::{
    CommandTemplates, EngineSettings, HealthCheck, Notifier, UnitRegistry, WebhookSink,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod parser;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable not found
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Optional fleet name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Global settings
    #[serde(default, skip_serializing_if = "Settings::is_default")]
    pub settings: Settings,

    /// Push notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,

    /// Command templates for the runtime adapter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<CommandTemplates>,

    /// Named unit groups
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,

    /// Unit definitions
    pub units: BTreeMap<String, Unit>,
}

/// Global settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Units started concurrently within one tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Seconds between probes while waiting for a unit to start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_interval: Option<u64>,

    /// Seconds between recovery polls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_interval: Option<u64>,

    /// Default startup timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<u64>,

    /// Default stop timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<u64>,

    /// Where runtime state is kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Settings {
    /// Check if settings are default (all None)
    fn is_default(&self) -> bool {
        self == &Settings::default()
    }
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Notifications {
    /// Webhook receiving recovery outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,

    /// Source tag placed in every payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Unit definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Priority tier
    #[serde(default)]
    pub tier: u32,

    /// Unit dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// How to probe the unit
    pub health_check: HealthCheck,

    /// Startup timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<u64>,

    /// Recovery policy overrides
    #[serde(default)]
    pub recovery: Recovery,
}

/// Recovery policy overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Recovery {
    /// Minimum seconds between recovery attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<u64>,

    /// Consecutive failures before automated recovery gives up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Config {
    /// Build the unit registry
    pub fn registry(&self) -> UnitRegistry {
        parser::convert_to_registry(self)
    }

    /// Engine settings with defaults filled in
    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            max_concurrency: self
                .settings
                .max_concurrency
                .unwrap_or(defaults.max_concurrency),
            probe_interval: self
                .settings
                .probe_interval
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_interval),
            recovery_interval: self
                .settings
                .recovery_interval
                .map(Duration::from_secs)
                .unwrap_or(defaults.recovery_interval),
            strict: false,
        }
    }

    /// Runtime command templates, `docker compose` when not configured
    pub fn command_templates(&self) -> CommandTemplates {
        self.runtime
            .clone()
            .unwrap_or_else(CommandTemplates::docker_compose)
    }

    /// Default stop timeout
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.stop_timeout.unwrap_or(30))
    }

    /// Directory for persisted state
    ///
    /// Falls back to `<data dir>/fleet/<name>`, or `.fleet/<name>` when the
    /// platform has no data directory.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.settings.state_dir {
            return dir.clone();
        }
        let name = self.name.as_deref().unwrap_or("default");
        dirs::data_dir()
            .map(|dir| dir.join("fleet"))
            .unwrap_or_else(|| PathBuf::from(".fleet"))
            .join(name)
    }

    /// Notifier for the configured webhook, disabled when none is set
    pub fn notifier(&self) -> Notifier {
        match &self.notifications {
            Some(Notifications {
                webhook: Some(url),
                source,
            }) => Notifier::new(
                Arc::new(WebhookSink::new(url.clone())),
                source.clone().unwrap_or_else(|| "fleet".to_string()),
            ),
            _ => Notifier::disabled(),
        }
    }
}
