//! SIGINT/SIGTERM handling

use anyhow::{Context, Result};
use fleet_orchestration::ShutdownTrigger;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

/// Fire `trigger` on the first SIGINT or SIGTERM
///
/// The first signal requests a graceful shutdown: running tiers finish and
/// the recovery loop completes its cycle. A second signal exits immediately.
pub fn install(trigger: &ShutdownTrigger) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let trigger = trigger.clone();

    std::thread::Builder::new()
        .name("fleet-signals".to_string())
        .spawn(move || {
            let mut received = signals.forever();
            if let Some(signal) = received.next() {
                info!(signal, "shutdown signal received, finishing current work");
                trigger.trigger();
            }
            if let Some(signal) = received.next() {
                warn!(signal, "second signal received, exiting");
                std::process::exit(130);
            }
        })
        .context("failed to spawn signal thread")?;

    Ok(())
}
