// Run scenario suites against the configured image

use crate::config::Config;
use crate::errors::{HarnessError, Result};
use crate::scenario::{Outcome, ScenarioReport, ScenarioRunner, Suite};
use colored::*;
use std::path::PathBuf;

pub struct RunOptions {
    pub suite: PathBuf,
    pub scenario: Option<String>,
    pub keep_workspace: bool,
    pub image: Option<String>,
    pub json: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let mut config = Config::load_from_current_dir()?;
    if let Some(image) = opts.image {
        config.image = image;
    }
    if opts.keep_workspace {
        config.workspace.keep = true;
    }

    let suite = Suite::load(&opts.suite)?;
    if let Some(name) = &opts.scenario {
        if suite.find(name).is_none() {
            return Err(HarnessError::ConfigError(format!(
                "No scenario named '{}' in {}",
                name,
                opts.suite.display()
            )));
        }
    }

    if !opts.json {
        let count = opts.scenario.as_ref().map_or(suite.scenarios.len(), |_| 1);
        println!(
            "Running {} scenario{} against {}",
            count,
            if count == 1 { "" } else { "s" },
            config.image.cyan()
        );
        println!();
    }

    let runner = ScenarioRunner::new(config)?;
    let reports = runner.run_suite(&suite, opts.scenario.as_deref());

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        return Err(HarnessError::Assertion(format!(
            "{} of {} scenario(s) failed",
            failed,
            reports.len()
        )));
    }

    Ok(())
}

fn print_reports(reports: &[ScenarioReport]) {
    for report in reports {
        let seconds = report.duration_ms as f64 / 1000.0;
        match &report.outcome {
            Outcome::Passed => {
                println!("{} {:<40} {:>7.1}s", "✓".green().bold(), report.name, seconds);
            }
            Outcome::Failed { phase, error } => {
                println!("{} {:<40} {:>7.1}s", "✗".red().bold(), report.name, seconds);
                println!("    {} {:?}", "failed after:".dimmed(), phase);
                println!("    {}", error.red());
            }
        }

        if let Some(path) = &report.retained_workspace {
            println!("    {} {}", "workspace:".dimmed(), path.display());
        }
    }

    let passed = reports.iter().filter(|r| r.passed()).count();
    println!();
    println!(
        "{} passed, {} failed",
        passed.to_string().green().bold(),
        (reports.len() - passed).to_string().red().bold()
    );
}
