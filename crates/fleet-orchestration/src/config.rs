//! Unit configuration types.
//!
//! This module defines the declarative model for managed units: identity,
//! dependencies, priority tier, health check and recovery policy. A
//! [`UnitRegistry`] is built once at startup and shared immutably by every
//! component of the engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default number of units started concurrently within one tier
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Description of a single managed unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitSpec {
    /// Unique unit identity
    pub id: String,
    /// Units that must be healthy before this unit may start
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Priority tier; lower tiers start first and stop last
    #[serde(default)]
    pub priority_tier: u32,
    /// How to decide whether the unit is healthy
    pub health_check: HealthCheck,
    /// How long to wait for the unit to pass its health check after starting
    #[serde(with = "duration_secs", default = "default_startup_timeout")]
    pub startup_timeout: Duration,
    /// Recovery policy used by the recovery manager
    #[serde(default)]
    pub recovery: RecoveryPolicy,
}

impl UnitSpec {
    /// Create a unit with default timeouts and recovery policy
    pub fn new(id: impl Into<String>, priority_tier: u32, health_check: HealthCheck) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            priority_tier,
            health_check,
            startup_timeout: default_startup_timeout(),
            recovery: RecoveryPolicy::default(),
        }
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    /// Set the startup timeout
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the recovery policy
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Timeout applied to a single probe of this unit
    ///
    /// Falls back to the startup timeout when the check does not set one.
    pub fn probe_timeout(&self) -> Duration {
        self.health_check.timeout().unwrap_or(self.startup_timeout)
    }
}

/// Health check definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthCheck {
    /// TCP connection to `host:port`
    Connectivity {
        /// Host to connect to
        host: String,
        /// Port to connect to
        port: u16,
        /// Per-probe timeout
        #[serde(
            default,
            with = "duration_secs_opt",
            skip_serializing_if = "Option::is_none"
        )]
        timeout: Option<Duration>,
    },
    /// HTTP GET against `url`
    Endpoint {
        /// URL to request
        url: String,
        /// Status code that counts as healthy
        #[serde(default = "default_expected_status")]
        expected_status: u16,
        /// Per-probe timeout
        #[serde(
            default,
            with = "duration_secs_opt",
            skip_serializing_if = "Option::is_none"
        )]
        timeout: Option<Duration>,
    },
}

impl HealthCheck {
    /// Connectivity check without an explicit timeout
    pub fn connectivity(host: impl Into<String>, port: u16) -> Self {
        HealthCheck::Connectivity {
            host: host.into(),
            port,
            timeout: None,
        }
    }

    /// Endpoint check expecting HTTP 200
    pub fn endpoint(url: impl Into<String>) -> Self {
        HealthCheck::Endpoint {
            url: url.into(),
            expected_status: default_expected_status(),
            timeout: None,
        }
    }

    /// Explicit per-probe timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            HealthCheck::Connectivity { timeout, .. } => *timeout,
            HealthCheck::Endpoint { timeout, .. } => *timeout,
        }
    }

    /// Short description used in logs and status output
    pub fn describe(&self) -> String {
        match self {
            HealthCheck::Connectivity { host, port, .. } => format!("tcp://{}:{}", host, port),
            HealthCheck::Endpoint {
                url,
                expected_status,
                ..
            } => format!("{} (expect {})", url, expected_status),
        }
    }
}

/// Per-unit recovery policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryPolicy {
    /// Minimum time between two recovery attempts
    #[serde(with = "duration_secs", default = "default_recovery_backoff")]
    pub backoff: Duration,
    /// Maximum consecutive failures before automated recovery gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            backoff: default_recovery_backoff(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Immutable catalogue of every managed unit
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnitRegistry {
    units: BTreeMap<String, UnitSpec>,
    #[serde(default)]
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl UnitRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of units
    ///
    /// A later unit with the same id replaces an earlier one.
    pub fn from_units(units: impl IntoIterator<Item = UnitSpec>) -> Self {
        let mut registry = Self::new();
        for unit in units {
            registry.units.insert(unit.id.clone(), unit);
        }
        registry
    }

    /// Add a named group of units
    pub fn with_group(
        mut self,
        name: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.groups
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Look up a unit by id
    pub fn get(&self, id: &str) -> Option<&UnitSpec> {
        self.units.get(id)
    }

    /// Whether a unit exists
    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// All units, ordered by id
    pub fn units(&self) -> impl Iterator<Item = &UnitSpec> {
        self.units.values()
    }

    /// All unit ids, ordered
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// Named groups and their members
    pub fn groups(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.groups
    }

    /// Number of units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the registry has no units
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_recovery_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_expected_status() -> u16 {
    200
}

/// Durations as (fractional) seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_spec_serialization() {
        let unit = UnitSpec::new("api", 2, HealthCheck::endpoint("http://localhost:8080/health"))
            .with_dependency("db")
            .with_startup_timeout(Duration::from_millis(1500));

        let yaml = serde_yaml::to_string(&unit).expect("Failed to serialize");
        let deserialized: UnitSpec = serde_yaml::from_str(&yaml).expect("Failed to deserialize");
        assert_eq!(unit, deserialized);
    }

    #[test]
    fn test_health_check_defaults() {
        let yaml = "kind: endpoint\nurl: http://localhost/health\n";
        let check: HealthCheck = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(check, HealthCheck::endpoint("http://localhost/health"));

        let yaml = "kind: connectivity\nhost: db\nport: 5432\ntimeout: 2.5\n";
        let check: HealthCheck = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(check.timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_probe_timeout_falls_back_to_startup_timeout() {
        let unit = UnitSpec::new("db", 1, HealthCheck::connectivity("localhost", 5432))
            .with_startup_timeout(Duration::from_secs(7));
        assert_eq!(unit.probe_timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_registry_ordering() {
        let registry = UnitRegistry::from_units([
            UnitSpec::new("web", 2, HealthCheck::connectivity("localhost", 80)),
            UnitSpec::new("db", 1, HealthCheck::connectivity("localhost", 5432)),
        ]);

        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["db", "web"]);
        assert!(registry.contains("db"));
        assert!(registry.get("cache").is_none());
    }
}
