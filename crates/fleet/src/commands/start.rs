use crate::commands::{execute, finish_run};
use anyhow::Result;
use fleet::Outcome;
use fleet::protocol::Request;
use fleet_orchestration::ShutdownSignal;
use std::path::Path;
use tracing::info;

/// `fleet start`
pub async fn run(
    config_path: &Path,
    sequential: bool,
    max_concurrency: Option<usize>,
    shutdown: &ShutdownSignal,
) -> Result<Outcome> {
    info!(
        "Starting units ({})",
        match max_concurrency {
            _ if sequential => "sequential".to_string(),
            Some(limit) => format!("up to {} at a time", limit),
            None => "configured concurrency".to_string(),
        }
    );

    let request = Request::Start {
        sequential,
        max_concurrency,
    };
    finish_run(execute(config_path, request, shutdown).await?)
}

/// `fleet restart`
pub async fn restart(
    config_path: &Path,
    sequential: bool,
    max_concurrency: Option<usize>,
    force: bool,
    timeout: Option<u64>,
    shutdown: &ShutdownSignal,
) -> Result<Outcome> {
    let request = Request::Restart {
        sequential,
        max_concurrency,
        force,
        timeout,
    };
    finish_run(execute(config_path, request, shutdown).await?)
}

/// `fleet start-unit <id>`
pub async fn unit(config_path: &Path, id: &str, shutdown: &ShutdownSignal) -> Result<Outcome> {
    let request = Request::StartUnit { id: id.to_string() };
    finish_run(execute(config_path, request, shutdown).await?)
}
