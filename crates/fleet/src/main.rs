use anyhow::Result;
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use fleet::{Outcome, logging, signals};
use fleet_orchestration::{ShutdownSignal, shutdown_channel};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};

mod commands;

use commands::OutputFormat;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Fleet - dependency-aware unit orchestration and self-healing")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "fleet.yaml")]
    config: PathBuf,

    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every unit, tier by tier
    Start {
        /// One unit at a time
        #[arg(long)]
        sequential: bool,

        /// Units started concurrently within a tier
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        max_concurrency: Option<usize>,
    },

    /// Stop every unit, highest tier first
    Stop {
        /// Skip the graceful phase
        #[arg(short, long)]
        force: bool,

        /// Seconds to wait for a graceful stop
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Stop then start every unit
    Restart {
        /// One unit at a time
        #[arg(long)]
        sequential: bool,

        /// Units started concurrently within a tier
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        max_concurrency: Option<usize>,

        /// Skip the graceful phase when stopping
        #[arg(short, long)]
        force: bool,

        /// Seconds to wait for a graceful stop
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show unit, group and overall status
    Status {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Validate the configuration and dependency graph
    Validate {
        /// Treat warnings such as priority inversions as errors
        #[arg(short, long)]
        strict: bool,
    },

    /// Start one unit if its dependencies are healthy
    StartUnit {
        /// Unit id
        id: String,
    },

    /// Stop one unit, leaving its dependents running
    StopUnit {
        /// Unit id
        id: String,

        /// Skip the graceful phase
        #[arg(short, long)]
        force: bool,

        /// Seconds to wait for a graceful stop
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Run recovery for one unit now, ignoring the cooldown
    TriggerRecovery {
        /// Unit id
        id: String,

        /// Clear the failure count first
        #[arg(long)]
        reset: bool,
    },

    /// Show the status snapshot and recent events
    Report {
        /// Number of events to show
        #[arg(long, default_value_t = 20)]
        events: usize,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Run the recovery loop in the foreground, serving other fleet commands
    Monitor {
        /// Run a single poll cycle and exit
        #[arg(long)]
        once: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init(&cli.log_level, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Outcome::HardFailure.into();
        }
    };

    let (trigger, shutdown) = shutdown_channel();
    if let Err(e) = signals::install(&trigger) {
        warn!("Running without signal handling: {:#}", e);
    }

    let result = smol::block_on(run(cli, &shutdown));
    drop(trigger);

    match result {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            Outcome::HardFailure.into()
        }
    }
}

async fn run(cli: Cli, shutdown: &ShutdownSignal) -> Result<Outcome> {
    let config = cli.config.as_path();

    match cli.command {
        Commands::Start {
            sequential,
            max_concurrency,
        } => {
            commands::start::run(config, sequential, max_concurrency, shutdown).await
        }
        Commands::Stop { force, timeout } => {
            commands::stop::run(config, force, timeout, shutdown).await
        }
        Commands::Restart {
            sequential,
            max_concurrency,
            force,
            timeout,
        } => {
            commands::start::restart(
                config,
                sequential,
                max_concurrency,
                force,
                timeout,
                shutdown,
            )
            .await
        }
        Commands::Status { format } => commands::status::run(config, format, shutdown).await,
        Commands::Validate { strict } => commands::validate::run(config, strict).await,
        Commands::StartUnit { id } => commands::start::unit(config, &id, shutdown).await,
        Commands::StopUnit { id, force, timeout } => {
            commands::stop::unit(config, &id, force, timeout, shutdown).await
        }
        Commands::TriggerRecovery { id, reset } => {
            commands::recovery::trigger(config, &id, reset, shutdown).await
        }
        Commands::Report { events, format } => {
            commands::report::run(config, events, format, shutdown).await
        }
        Commands::Monitor { once } => commands::recovery::monitor(config, once, shutdown).await,
    }
}
