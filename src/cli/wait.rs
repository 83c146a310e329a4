// Block until an endpoint is ready

use crate::clock::SystemClock;
use crate::compose::ServiceEndpoint;
use crate::config::{parse_duration, Config};
use crate::errors::Result;
use crate::probe::{self, ReadinessProbe};
use colored::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Protocol {
    Bolt,
    Http,
    Tcp,
}

impl Protocol {
    pub fn probe(&self) -> ReadinessProbe {
        match self {
            Protocol::Bolt => probe::bolt(),
            Protocol::Http => probe::http("/"),
            Protocol::Tcp => probe::tcp(),
        }
    }
}

pub fn run(endpoint: &str, protocol: Protocol, timeout: Option<&str>) -> Result<()> {
    let endpoint: ServiceEndpoint = endpoint.parse()?;
    let config = Config::load_from_current_dir()?;

    let mut policy = config.readiness.retry_policy()?;
    if let Some(timeout) = timeout {
        policy = policy.with_timeout(parse_duration(timeout)?);
    }

    println!(
        "Waiting for {} ({:?}, timeout {:?})...",
        endpoint.to_string().cyan(),
        protocol,
        policy.timeout
    );
    let attempts = probe::wait_until_ready(&endpoint, &protocol.probe(), &policy, &SystemClock)?;
    println!(
        "{} {} is ready after {} attempt{}",
        "✓".green().bold(),
        endpoint,
        attempts,
        if attempts == 1 { "" } else { "s" }
    );

    Ok(())
}
