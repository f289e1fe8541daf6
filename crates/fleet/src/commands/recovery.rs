use crate::commands::{execute, failure};
use anyhow::{Result, bail};
use comfy_table::{Cell, Color, Table};
use fleet::Outcome;
use fleet::client::ControlClient;
use fleet::daemon::{self, ControlServer, Host};
use fleet::protocol::{Request, Response};
use fleet::runtime::{Runtime, load_config};
use fleet_orchestration::{PollOutcome, PollReport, ShutdownSignal};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// `fleet trigger-recovery <id> [--reset]`
///
/// Skips the cooldown but not the retry ceiling; `--reset` clears the failure
/// count first so an exhausted unit becomes eligible again.
pub async fn trigger(
    config_path: &Path,
    id: &str,
    reset: bool,
    shutdown: &ShutdownSignal,
) -> Result<Outcome> {
    let request = Request::TriggerRecovery {
        id: id.to_string(),
        reset,
    };
    let (id, reset, outcome) = match execute(config_path, request, shutdown).await? {
        Response::Recovery { id, reset, outcome } => (id, reset, outcome),
        other => return failure(other),
    };

    if reset {
        println!("Reset failure count for {}", id);
    }
    println!("{}: {}", id, outcome);
    Ok(match outcome {
        PollOutcome::Healthy | PollOutcome::Recovered => Outcome::Success,
        PollOutcome::RetriesExhausted => {
            println!("Retry ceiling reached; use --reset to re-arm automated recovery");
            Outcome::PartialFailure
        }
        _ => Outcome::PartialFailure,
    })
}

/// `fleet monitor [--once]`
///
/// The continuous monitor hosts requests from other invocations until it is
/// shut down.
pub async fn monitor(config_path: &Path, once: bool, shutdown: &ShutdownSignal) -> Result<Outcome> {
    if once {
        return match execute(config_path, Request::Poll, shutdown).await? {
            Response::Poll { report } => Ok(print_poll(&report)),
            other => failure(other),
        };
    }

    let config = load_config(config_path)?;
    let socket = daemon::socket_path(&config.state_dir());
    if ControlClient::find(&socket).await.is_some() {
        bail!("a monitor is already serving {}", socket.display());
    }

    let runtime = Runtime::open(config).await?;
    let server = ControlServer::bind(&socket)?;
    let host = Arc::new(Host::new(&runtime, shutdown.clone()));

    let (polled, ()) = smol::future::zip(
        host.recovery_manager().run(shutdown),
        server.serve(host.clone(), shutdown),
    )
    .await;
    polled?;

    info!("Monitor stopped");
    Ok(Outcome::Success)
}

fn print_poll(report: &PollReport) -> Outcome {
    let mut table = Table::new();
    table.set_header(vec!["UNIT", "OUTCOME"]);
    let mut outcome = Outcome::Success;
    for (id, result) in &report.outcomes {
        let color = match result {
            PollOutcome::Healthy | PollOutcome::Recovered => Color::Green,
            PollOutcome::Skipped | PollOutcome::CoolingDown => Color::DarkGrey,
            PollOutcome::WaitingOnDependencies => Color::Yellow,
            PollOutcome::RetriesExhausted | PollOutcome::RecoveryFailed => Color::Red,
        };
        if matches!(
            result,
            PollOutcome::RetriesExhausted
                | PollOutcome::RecoveryFailed
                | PollOutcome::WaitingOnDependencies
                | PollOutcome::CoolingDown
        ) {
            outcome = Outcome::PartialFailure;
        }
        table.add_row(vec![Cell::new(id), Cell::new(result).fg(color)]);
    }
    println!("{}", table);
    outcome
}
