pub mod recovery;
pub mod report;
pub mod start;
pub mod status;
pub mod stop;
pub mod validate;

use anyhow::{Result, anyhow, bail};
use clap::ValueEnum;
use comfy_table::{Cell, Color, Table};
use fleet::Outcome;
use fleet::client::ControlClient;
use fleet::daemon::{self, Host};
use fleet::protocol::{Request, Response};
use fleet::runtime::{Runtime, load_config};
use fleet_orchestration::{DRAIN_TIMEOUT, RunSummary, ShutdownSignal, UnitStatus};
use std::path::Path;
use tracing::info;

/// Output format for read-only commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Run `request` in the monitor serving this configuration, or in-process
/// when none is running
///
/// In-process runs wait for outstanding notifications before returning.
pub async fn execute(
    config_path: &Path,
    request: Request,
    shutdown: &ShutdownSignal,
) -> Result<Response> {
    let config = load_config(config_path)?;
    let socket = daemon::socket_path(&config.state_dir());

    if let Some(mut client) = ControlClient::find(&socket).await {
        info!("Forwarding to the running monitor at {}", socket.display());
        return client.send_request(&request).await;
    }

    let runtime = if request.is_mutating() {
        Runtime::open(config).await?
    } else {
        Runtime::open_for_reading(config).await?
    };
    let host = Host::new(&runtime, shutdown.clone());
    let response = host.handle(request).await;
    runtime.context.notifier.drain(DRAIN_TIMEOUT).await;
    Ok(response)
}

/// Turn a failure response into an error or exit outcome
///
/// A fatal validation report means nothing was attempted.
pub fn failure(response: Response) -> Result<Outcome> {
    match response {
        Response::InvalidGraph { report } => {
            eprintln!("Invalid dependency graph:\n{}", report);
            Ok(Outcome::HardFailure)
        }
        Response::Error { message } => Err(anyhow!(message)),
        other => bail!("unexpected response: {:?}", other),
    }
}

/// Print the result of an orchestrator run and map it to an exit outcome
pub fn finish_run(response: Response) -> Result<Outcome> {
    match response {
        Response::Run { summary } => {
            print_summary(&summary);
            Ok(summary.outcome().into())
        }
        other => failure(other),
    }
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table.set_header(vec!["UNIT", "RESULT", "DETAIL"]);

    for unit in &summary.succeeded {
        table.add_row(vec![
            Cell::new(unit),
            Cell::new("ok").fg(Color::Green),
            Cell::new("-"),
        ]);
    }
    for failure in &summary.failed {
        table.add_row(vec![
            Cell::new(&failure.unit),
            Cell::new("failed").fg(Color::Red),
            Cell::new(&failure.reason),
        ]);
    }
    for unit in &summary.skipped {
        table.add_row(vec![
            Cell::new(unit),
            Cell::new("skipped").fg(Color::Yellow),
            Cell::new("cancelled"),
        ]);
    }

    println!("{}", table);
    println!("{}", summary);
    if summary.cancelled {
        println!("Run cancelled by shutdown signal");
    }
}

pub(crate) fn status_color(status: UnitStatus) -> Color {
    match status {
        UnitStatus::Healthy => Color::Green,
        UnitStatus::Starting | UnitStatus::Stopping | UnitStatus::WaitingOnDependencies => {
            Color::Yellow
        }
        UnitStatus::Unhealthy | UnitStatus::StartFailed | UnitStatus::StopFailed => Color::Red,
        UnitStatus::Stopped | UnitStatus::Unknown => Color::DarkGrey,
    }
}
