use crate::errors::Result;
use crate::scenario::{Check, Suite};
use std::path::Path;

pub fn run(suite_path: &Path) -> Result<()> {
    let suite = Suite::load(suite_path)?;

    if suite.scenarios.is_empty() {
        println!("No scenarios in {}", suite_path.display());
        return Ok(());
    }

    println!("{:<36} {:<26} {:<10}", "SCENARIO", "SERVICE", "CHECKS");
    println!("{}", "-".repeat(80));

    for scenario in &suite.scenarios {
        let checks = scenario
            .checks
            .iter()
            .map(check_name)
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<36} {:<26} {}",
            scenario.name,
            scenario.service,
            if checks.is_empty() { "-".to_string() } else { checks }
        );
    }

    println!();
    println!("Fixtures: {}", suite.fixtures_dir.display());

    Ok(())
}

fn check_name(check: &Check) -> String {
    match check {
        Check::Connect { user, .. } => format!("connect({})", user),
        Check::RejectCredentials { user, .. } => format!("reject({})", user),
        Check::ConfigLines { file, .. } => format!("lines({})", file),
        Check::Http { path } => format!("http({})", path),
        Check::ExpectStartupFailure { .. } => "startup-failure".to_string(),
    }
}
