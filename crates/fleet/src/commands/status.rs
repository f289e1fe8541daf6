use crate::commands::{OutputFormat, execute, failure, status_color};
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use fleet::Outcome;
use fleet::protocol::{Request, Response};
use fleet_orchestration::{HealthLevel, ShutdownSignal, StatusSnapshot};
use std::path::Path;

/// `fleet status`
///
/// Never fails because of unit health; only an unreadable configuration
/// makes it exit non-zero.
pub async fn run(
    config_path: &Path,
    format: OutputFormat,
    shutdown: &ShutdownSignal,
) -> Result<Outcome> {
    let snapshot = match execute(config_path, Request::Status, shutdown).await? {
        Response::Status { snapshot } => snapshot,
        other => return failure(other),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Table => display_snapshot(&snapshot),
    }

    Ok(Outcome::Success)
}

pub(crate) fn display_snapshot(snapshot: &StatusSnapshot) {
    if snapshot.units.is_empty() {
        println!("No units configured");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["UNIT", "TIER", "STATUS", "FAILURES", "OUTAGE", "LAST ERROR"]);

    for unit in &snapshot.units {
        table.add_row(vec![
            Cell::new(&unit.id),
            Cell::new(unit.tier),
            Cell::new(unit.status).fg(status_color(unit.status)),
            Cell::new(unit.consecutive_failures),
            Cell::new(
                unit.outage_seconds
                    .map(|secs| format!("{}s", secs))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(unit.last_error.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{}", table);

    if !snapshot.groups.is_empty() {
        let mut groups = Table::new();
        groups.set_header(vec!["GROUP", "STATUS", "UNHEALTHY"]);
        for (name, group) in &snapshot.groups {
            groups.add_row(vec![
                Cell::new(name),
                Cell::new(group.status).fg(level_color(group.status)),
                Cell::new(format!("{}/{}", group.unhealthy, group.total)),
            ]);
        }
        println!("{}", groups);
    }

    println!(
        "Overall: {} ({} unhealthy)",
        snapshot.overall_status,
        snapshot.unhealthy_count()
    );
}

fn level_color(level: HealthLevel) -> Color {
    match level {
        HealthLevel::Healthy => Color::Green,
        HealthLevel::Degraded => Color::Yellow,
        HealthLevel::Unhealthy => Color::Red,
    }
}
