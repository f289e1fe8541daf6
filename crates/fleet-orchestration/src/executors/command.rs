//! Shell command runtime adapter.
//!
//! Every adapter call is rendered from an operator supplied template and run
//! through `sh -c`. Templates may reference `{unit}` (the unit id) and
//! `{timeout}` (the stop timeout in whole seconds). Unit ids containing
//! anything beyond `[A-Za-z0-9._-]` are single-quoted before substitution.

use crate::{Error, Result, adapter::RuntimeAdapter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Command templates for each adapter action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplates {
    /// Start the unit
    pub start: String,
    /// Stop the unit gracefully
    pub stop: String,
    /// Stop the unit hard; falls back to `stop`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<String>,
    /// Restart the unit; falls back to `stop` then `start`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Recreate the unit; falls back to `restart`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recreate: Option<String>,
    /// Exit status 0 means the unit is running
    pub status: String,
}

impl CommandTemplates {
    /// Templates for units managed by `docker compose` in the working directory
    pub fn docker_compose() -> Self {
        Self {
            start: "docker compose up -d {unit}".to_string(),
            stop: "docker compose stop -t {timeout} {unit}".to_string(),
            kill: Some("docker compose kill {unit}".to_string()),
            restart: Some("docker compose restart {unit}".to_string()),
            recreate: Some("docker compose up -d --force-recreate {unit}".to_string()),
            status: "test -n \"$(docker compose ps -q --status running {unit})\"".to_string(),
        }
    }
}

/// Runtime adapter running shell commands
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    templates: CommandTemplates,
    shell: String,
}

impl CommandAdapter {
    /// Create an adapter over `templates`
    pub fn new(templates: CommandTemplates) -> Self {
        Self {
            templates,
            shell: "sh".to_string(),
        }
    }

    /// Use a different shell binary (it must accept `-c <script>`)
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// The templates in use
    pub fn templates(&self) -> &CommandTemplates {
        &self.templates
    }

    fn render(template: &str, unit_id: &str, timeout: Duration) -> String {
        template
            .replace("{unit}", &shell_quote(unit_id))
            .replace("{timeout}", &timeout.as_secs().to_string())
    }

    /// Run a rendered script and capture its output
    async fn run(&self, unit_id: &str, script: &str) -> Result<std::process::Output> {
        debug!("Running for '{}': {}", unit_id, script);
        Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .output()
            .await
            .map_err(|e| Error::adapter(unit_id, format!("failed to spawn `{}`: {}", script, e)))
    }

    /// Run a command and fail unless it exits successfully
    async fn run_checked(&self, unit_id: &str, action: &str, template: &str) -> Result<()> {
        self.run_checked_with_timeout(unit_id, action, template, Duration::ZERO)
            .await
    }

    async fn run_checked_with_timeout(
        &self,
        unit_id: &str,
        action: &str,
        template: &str,
        timeout: Duration,
    ) -> Result<()> {
        let script = Self::render(template, unit_id, timeout);
        let output = self.run(unit_id, &script).await?;

        if output.status.success() {
            info!("{} '{}' succeeded", action, unit_id);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            warn!("{} '{}' failed ({}): {}", action, unit_id, output.status, detail);
            Err(Error::adapter(
                unit_id,
                format!("{} exited with {}: {}", action, output.status, detail),
            ))
        }
    }
}

/// Quote `word` for `sh` unless it is made of safe characters only
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

#[async_trait]
impl RuntimeAdapter for CommandAdapter {
    async fn start(&self, unit_id: &str) -> Result<()> {
        self.run_checked(unit_id, "start", &self.templates.start).await
    }

    async fn stop(&self, unit_id: &str, graceful: bool, timeout: Duration) -> Result<()> {
        let template = match (&self.templates.kill, graceful) {
            (Some(kill), false) => kill,
            _ => &self.templates.stop,
        };
        let action = if graceful { "stop" } else { "kill" };
        self.run_checked_with_timeout(unit_id, action, template, timeout)
            .await
    }

    async fn restart(&self, unit_id: &str) -> Result<()> {
        match &self.templates.restart {
            Some(template) => self.run_checked(unit_id, "restart", template).await,
            None => {
                self.run_checked(unit_id, "stop", &self.templates.stop).await?;
                self.run_checked(unit_id, "start", &self.templates.start).await
            }
        }
    }

    async fn recreate(&self, unit_id: &str) -> Result<()> {
        match &self.templates.recreate {
            Some(template) => self.run_checked(unit_id, "recreate", template).await,
            None => self.restart(unit_id).await,
        }
    }

    async fn is_running(&self, unit_id: &str) -> Result<bool> {
        let script = Self::render(&self.templates.status, unit_id, Duration::ZERO);
        let output = self.run(unit_id, &script).await?;
        Ok(output.status.success())
    }
}
