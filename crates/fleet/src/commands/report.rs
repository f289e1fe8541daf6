use crate::commands::status::display_snapshot;
use crate::commands::{OutputFormat, execute, failure};
use anyhow::Result;
use comfy_table::{Cell, Table};
use fleet::Outcome;
use fleet::protocol::{Request, Response};
use fleet_orchestration::ShutdownSignal;
use std::path::Path;

/// `fleet report`: the status snapshot plus the most recent events
pub async fn run(
    config_path: &Path,
    events: usize,
    format: OutputFormat,
    shutdown: &ShutdownSignal,
) -> Result<Outcome> {
    let request = Request::Report { events };
    let (snapshot, recent) = match execute(config_path, request, shutdown).await? {
        Response::Report { snapshot, events } => (snapshot, events),
        other => return failure(other),
    };

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "snapshot": snapshot,
                "events": recent,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            display_snapshot(&snapshot);
            if recent.is_empty() {
                println!("No events recorded");
            } else {
                let mut table = Table::new();
                table.set_header(vec!["TIME", "UNIT", "EVENT", "MESSAGE"]);
                for event in &recent {
                    table.add_row(vec![
                        Cell::new(event.timestamp.format("%Y-%m-%d %H:%M:%S")),
                        Cell::new(&event.unit_id),
                        Cell::new(event.event_type),
                        Cell::new(&event.message),
                    ]);
                }
                println!("{}", table);
            }
        }
    }

    Ok(Outcome::Success)
}
