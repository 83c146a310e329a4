use crate::compose::ServiceEndpoint;
use crate::errors::Result;
use crate::verify;
use colored::*;

/// Authenticate against a running server and report the negotiated version
pub fn run(endpoint: &str, user: &str, password: &str) -> Result<()> {
    let endpoint: ServiceEndpoint = endpoint.parse()?;
    let version = verify::verify_connectivity(&endpoint, user, password)?;

    println!(
        "{} Authenticated as '{}' at {} (Bolt {})",
        "✓".green().bold(),
        user,
        endpoint,
        version
    );
    Ok(())
}
