//! Operator CLI for the fleet orchestration engine
//!
//! The binary wires a parsed configuration file into the engine: a
//! [`runtime::Runtime`] owns the registry, the state store, the health
//! prober, the command adapter and the notifier. Every command except
//! `validate` becomes a [`protocol::Request`] handled by a
//! [`daemon::Host`], either inside a running `fleet monitor` (reached with
//! [`client::ControlClient`]) or in-process when no monitor is up.

pub mod client;
pub mod daemon;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod signals;

use fleet_orchestration::RunOutcome;
use std::process::ExitCode;

/// How a command ended, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything reached its target state
    Success,
    /// Some units failed or were skipped
    PartialFailure,
    /// Nothing was attempted, e.g. a fatal validation error
    HardFailure,
}

impl Outcome {
    /// Process exit code for this outcome
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::PartialFailure => 1,
            Outcome::HardFailure => 2,
        }
    }
}

impl From<RunOutcome> for Outcome {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success => Outcome::Success,
            RunOutcome::PartialFailure => Outcome::PartialFailure,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}
