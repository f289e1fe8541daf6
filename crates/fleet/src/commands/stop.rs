use crate::commands::{execute, finish_run};
use anyhow::Result;
use fleet::Outcome;
use fleet::protocol::Request;
use fleet_orchestration::ShutdownSignal;
use std::path::Path;
use tracing::info;

/// `fleet stop`
pub async fn run(
    config_path: &Path,
    force: bool,
    timeout: Option<u64>,
    shutdown: &ShutdownSignal,
) -> Result<Outcome> {
    info!("Stopping units ({})", if force { "forced" } else { "graceful" });
    let request = Request::Stop { force, timeout };
    finish_run(execute(config_path, request, shutdown).await?)
}

/// `fleet stop-unit <id>`
///
/// Dependents are left running; the orchestrator warns about them.
pub async fn unit(
    config_path: &Path,
    id: &str,
    force: bool,
    timeout: Option<u64>,
    shutdown: &ShutdownSignal,
) -> Result<Outcome> {
    let request = Request::StopUnit {
        id: id.to_string(),
        force,
        timeout,
    };
    finish_run(execute(config_path, request, shutdown).await?)
}
