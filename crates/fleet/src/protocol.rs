//! Messages exchanged with a running `fleet monitor`
//!
//! One JSON document per line in each direction; every request gets exactly
//! one response.

use fleet_orchestration::{EventRecord, PollOutcome, PollReport, RunSummary, StatusSnapshot};
use serde::{Deserialize, Serialize};

/// Request messages from a CLI invocation to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Start every unit
    Start {
        sequential: bool,
        max_concurrency: Option<usize>,
    },

    /// Stop every unit
    Stop { force: bool, timeout: Option<u64> },

    /// Stop then start every unit
    Restart {
        sequential: bool,
        max_concurrency: Option<usize>,
        force: bool,
        timeout: Option<u64>,
    },

    /// Start one unit
    StartUnit { id: String },

    /// Stop one unit
    StopUnit {
        id: String,
        force: bool,
        timeout: Option<u64>,
    },

    /// Manual recovery of one unit, optionally resetting its failure count
    TriggerRecovery { id: String, reset: bool },

    /// One recovery poll over every unit
    Poll,

    /// Status snapshot
    Status,

    /// Status snapshot plus recent events
    Report { events: usize },
}

impl Request {
    /// Whether the request changes unit or store state
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Request::Status | Request::Report { .. })
    }
}

/// Response messages from the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of an orchestrator run
    Run { summary: RunSummary },

    /// Result of a manual recovery
    Recovery {
        id: String,
        reset: bool,
        outcome: PollOutcome,
    },

    /// Result of a poll cycle
    Poll { report: PollReport },

    /// Current status
    Status { snapshot: StatusSnapshot },

    /// Current status and recent events
    Report {
        snapshot: StatusSnapshot,
        events: Vec<EventRecord>,
    },

    /// The dependency graph failed validation; nothing was attempted
    InvalidGraph { report: String },

    /// The request failed
    Error { message: String },
}
