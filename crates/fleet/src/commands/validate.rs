use anyhow::Result;
use fleet::Outcome;
use fleet::runtime::load_config;
use fleet_orchestration::DependencyGraph;
use std::path::Path;

/// `fleet validate [--strict]`
///
/// Configuration errors surface as `Err` and exit with code 2 like any other
/// hard failure.
pub async fn run(config_path: &Path, strict: bool) -> Result<Outcome> {
    println!("Validating {}...", config_path.display());

    let config = load_config(config_path)?;
    let registry = config.registry();
    let graph = DependencyGraph::new(&registry);
    let report = graph.validate();

    println!("  Version: {}", config.version);
    if let Some(name) = &config.name {
        println!("  Name: {}", name);
    }
    println!("  Units: {}", registry.len());
    println!("  Groups: {}", registry.groups().len());

    if !report.is_clean() {
        println!("{}", report);
    }

    if report.is_fatal(strict) {
        println!("✗ Dependency graph invalid");
        return Ok(Outcome::HardFailure);
    }

    for (tier, units) in graph.tiers_ascending() {
        println!("  Tier {}: {}", tier, units.join(", "));
    }
    println!("✓ Configuration valid");
    Ok(Outcome::Success)
}
