//! Configuration parser with environment variable substitution

use crate::{Config, ConfigError, Result, Unit};
use fleet_orchestration::{RecoveryPolicy, UnitRegistry, UnitSpec};
use regex::Regex;
use serde_yaml::Value;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Parse a YAML configuration file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// Parse YAML configuration from a string
///
/// `${VAR}` and `${VAR:-default}` are substituted in every string value
/// before the document is mapped onto [`Config`]. A value that becomes a
/// number or boolean after substitution is typed accordingly, so
/// `port: "${DB_PORT:-5432}"` works.
pub fn parse_str(content: &str) -> Result<Config> {
    let raw: Value = serde_yaml::from_str(content)?;
    let substituted = substitute_value(raw)?;
    let config: Config = serde_yaml::from_value(substituted)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
///
/// Only file-level problems are checked here. Dependency problems are
/// reported by the graph validator.
fn validate_config(config: &Config) -> Result<()> {
    if config.version != "1.0" {
        return Err(ConfigError::ValidationError(format!(
            "Unsupported version: {}, expected 1.0",
            config.version
        )));
    }

    if config.settings.max_concurrency == Some(0) {
        return Err(ConfigError::ValidationError(
            "settings.max_concurrency must be at least 1".to_string(),
        ));
    }

    for (group, members) in &config.groups {
        for member in members {
            if !config.units.contains_key(member) {
                return Err(ConfigError::ValidationError(format!(
                    "Group '{}' references unknown unit '{}'",
                    group, member
                )));
            }
        }
    }

    for (name, unit) in &config.units {
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Unit names must not be empty".to_string(),
            ));
        }
        if unit.dependencies.iter().any(|dep| dep == name) {
            return Err(ConfigError::ValidationError(format!(
                "Unit '{}' depends on itself",
                name
            )));
        }
    }

    Ok(())
}

/// Substitute environment variables in a string
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR.replace_all(input, |cap: &regex::Captures<'_>| {
        let expr = &cap[1];

        // ${VAR:-default}
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::EnvVarNotFound(missing.join(", ")));
    }

    Ok(result.into_owned())
}

fn substitute_value(value: Value) -> Result<Value> {
    match value {
        Value::String(s) if ENV_VAR.is_match(&s) => {
            let substituted = substitute_env_vars(&s)?;
            Ok(retype_scalar(substituted))
        }
        Value::Sequence(items) => items
            .into_iter()
            .map(substitute_value)
            .collect::<Result<Vec<_>>>()
            .map(Value::Sequence),
        Value::Mapping(mapping) => {
            let mut out = serde_yaml::Mapping::with_capacity(mapping.len());
            for (key, value) in mapping {
                out.insert(key, substitute_value(value)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other),
    }
}

fn retype_scalar(s: String) -> Value {
    match serde_yaml::from_str::<Value>(&s) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(s),
    }
}

/// Convert configuration to the engine's unit registry
pub fn convert_to_registry(config: &Config) -> UnitRegistry {
    let default_startup = config.settings.startup_timeout.map(Duration::from_secs);

    let units = config
        .units
        .iter()
        .map(|(name, unit)| convert_unit(name, unit, default_startup));

    config
        .groups
        .iter()
        .fold(UnitRegistry::from_units(units), |registry, (name, members)| {
            registry.with_group(name.clone(), members.iter().cloned())
        })
}

fn convert_unit(name: &str, unit: &Unit, default_startup: Option<Duration>) -> UnitSpec {
    let defaults = RecoveryPolicy::default();
    let recovery = RecoveryPolicy {
        backoff: unit
            .recovery
            .backoff
            .map(Duration::from_secs)
            .unwrap_or(defaults.backoff),
        max_attempts: unit.recovery.max_attempts.unwrap_or(defaults.max_attempts),
    };

    let mut spec = unit
        .dependencies
        .iter()
        .fold(
            UnitSpec::new(name, unit.tier, unit.health_check.clone()),
            |spec, dep| spec.with_dependency(dep.clone()),
        )
        .with_recovery(recovery);

    if let Some(timeout) = unit
        .startup_timeout
        .map(Duration::from_secs)
        .or(default_startup)
    {
        spec = spec.with_startup_timeout(timeout);
    }

    spec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_env_vars() {
        unsafe {
            std::env::set_var("FLEET_TEST_VAR", "test_value");
        }

        assert_eq!(
            substitute_env_vars("prefix_${FLEET_TEST_VAR}_suffix").unwrap(),
            "prefix_test_value_suffix"
        );
        assert_eq!(
            substitute_env_vars("${FLEET_UNSET_VAR:-fallback}").unwrap(),
            "fallback"
        );

        let err = substitute_env_vars("${FLEET_UNSET_A} ${FLEET_UNSET_B}").unwrap_err();
        match err {
            ConfigError::EnvVarNotFound(names) => {
                assert_eq!(names, "FLEET_UNSET_A, FLEET_UNSET_B")
            }
            other => panic!("unexpected error: {other}"),
        }

        unsafe {
            std::env::remove_var("FLEET_TEST_VAR");
        }
    }

    #[test]
    fn test_substituted_scalars_are_retyped() {
        assert_eq!(retype_scalar("5432".to_string()), Value::from(5432));
        assert_eq!(retype_scalar("true".to_string()), Value::Bool(true));
        assert_eq!(
            retype_scalar("localhost".to_string()),
            Value::String("localhost".to_string())
        );
    }

    #[test]
    fn test_literal_strings_are_untouched() {
        let value = substitute_value(Value::String("8080".to_string())).unwrap();
        assert_eq!(value, Value::String("8080".to_string()));
    }
}
