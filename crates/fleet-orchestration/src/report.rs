//! On-demand status snapshots

use crate::{config::UnitRegistry, state::StateStore, state::UnitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Largest number of unhealthy units still reported as degraded
pub const DEGRADED_THRESHOLD: usize = 2;

/// Aggregate health of the fleet or of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    /// No unhealthy units
    Healthy,
    /// A few unhealthy units
    Degraded,
    /// More than the degraded threshold
    Unhealthy,
}

impl HealthLevel {
    /// Level for a given number of unhealthy units
    pub fn from_unhealthy_count(count: usize) -> Self {
        match count {
            0 => HealthLevel::Healthy,
            n if n <= DEGRADED_THRESHOLD => HealthLevel::Degraded,
            _ => HealthLevel::Unhealthy,
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Degraded => "degraded",
            HealthLevel::Unhealthy => "unhealthy",
        })
    }
}

/// Status line for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    /// Unit id
    pub id: String,
    /// Priority tier
    pub tier: u32,
    /// Current status
    pub status: UnitStatus,
    /// When the status last changed
    pub last_transition_at: DateTime<Utc>,
    /// Recovery attempts since last healthy
    pub consecutive_failures: u32,
    /// Length of the current outage in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outage_seconds: Option<i64>,
    /// Most recent failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Status of a named group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    /// Aggregate level
    pub status: HealthLevel,
    /// Unhealthy members
    pub unhealthy: usize,
    /// All members
    pub total: usize,
}

/// Point-in-time view of the whole fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
    /// Aggregate level of every unit
    pub overall_status: HealthLevel,
    /// Aggregate level per group
    pub groups: BTreeMap<String, GroupReport>,
    /// Per-unit status, ordered by id
    pub units: Vec<UnitReport>,
}

impl StatusSnapshot {
    /// Number of units counted as unhealthy
    pub fn unhealthy_count(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| unit.status.counts_as_unhealthy())
            .count()
    }
}

/// Build a snapshot of every unit in `registry`
pub async fn report_snapshot(registry: &UnitRegistry, store: &StateStore) -> StatusSnapshot {
    let mut units = Vec::with_capacity(registry.len());
    for spec in registry.units() {
        let state = store.get(&spec.id).await;
        units.push(UnitReport {
            id: spec.id.clone(),
            tier: spec.priority_tier,
            status: state.status,
            last_transition_at: state.last_transition_at,
            consecutive_failures: state.consecutive_failure_count,
            outage_seconds: state.outage_duration().map(|d| d.num_seconds()),
            last_error: state.last_error,
        });
    }

    let unhealthy: BTreeMap<&str, bool> = units
        .iter()
        .map(|unit| (unit.id.as_str(), unit.status.counts_as_unhealthy()))
        .collect();

    let groups = registry
        .groups()
        .iter()
        .map(|(name, members)| {
            let count = members
                .iter()
                .filter(|member| unhealthy.get(member.as_str()).copied().unwrap_or(false))
                .count();
            (
                name.clone(),
                GroupReport {
                    status: HealthLevel::from_unhealthy_count(count),
                    unhealthy: count,
                    total: members.len(),
                },
            )
        })
        .collect();

    let overall = unhealthy.values().filter(|bad| **bad).count();

    StatusSnapshot {
        generated_at: Utc::now(),
        overall_status: HealthLevel::from_unhealthy_count(overall),
        groups,
        units,
    }
}
