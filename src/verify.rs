// Verification against a started composition
// Bolt authentication, HTTP reachability and line checks on generated config files

use crate::bolt::{BoltConnection, BoltVersion};
use crate::compose::ports::ServiceEndpoint;
use crate::errors::{HarnessError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a Bolt session, authenticate with `user`/`password`, and close it.
/// Returns the negotiated protocol version.
pub fn verify_connectivity(endpoint: &ServiceEndpoint, user: &str, password: &str) -> Result<BoltVersion> {
    verify_connectivity_with_timeout(endpoint, user, password, DEFAULT_CONNECT_TIMEOUT)
}

pub fn verify_connectivity_with_timeout(
    endpoint: &ServiceEndpoint,
    user: &str,
    password: &str,
    timeout: Duration,
) -> Result<BoltVersion> {
    let mut connection = BoltConnection::connect(endpoint, timeout)?;
    connection.authenticate(user, password)?;

    let version = connection.version();
    connection.goodbye()?;

    info!(%endpoint, user, %version, "verified connectivity");
    Ok(version)
}

/// Status code of `GET http://<endpoint><path>`
pub fn http_status(endpoint: &ServiceEndpoint, path: &str, timeout: Duration) -> Result<u16> {
    let connectivity = |message: String| HarnessError::Connectivity {
        endpoint: endpoint.to_string(),
        message,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| connectivity(format!("cannot build HTTP client: {}", e)))?;

    let url = format!("http://{}{}", endpoint, path);
    let response = client
        .get(&url)
        .send()
        .map_err(|e| connectivity(format!("GET {} failed: {}", url, e)))?;

    Ok(response.status().as_u16())
}

/// Check the HTTP port answers `GET /` with a 2xx status
pub fn verify_http(endpoint: &ServiceEndpoint) -> Result<u16> {
    let status = http_status(endpoint, "/", DEFAULT_CONNECT_TIMEOUT)?;
    if !(200..300).contains(&status) {
        return Err(HarnessError::Connectivity {
            endpoint: endpoint.to_string(),
            message: format!("GET / returned HTTP {}", status),
        });
    }
    Ok(status)
}

/// A configuration file written by a container into a bind-mounted directory
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl ConfigFile {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarnessError::Assertion(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::Assertion(format!("cannot read {}: {}", path.display(), e))
        })?;

        Ok(Self::from_contents(path, &content))
    }

    pub fn from_contents(path: &Path, content: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: content
                .lines()
                .map(|l| l.trim_end_matches('\r').to_string())
                .collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Exact whole-line match
    pub fn contains_line(&self, line: &str) -> bool {
        self.lines.iter().any(|l| l == line)
    }

    pub fn assert_line_present(&self, line: &str) -> Result<()> {
        if self.contains_line(line) {
            Ok(())
        } else {
            Err(HarnessError::Assertion(format!(
                "expected line '{}' in {}",
                line,
                self.path.display()
            )))
        }
    }

    pub fn assert_line_absent(&self, line: &str) -> Result<()> {
        if self.contains_line(line) {
            Err(HarnessError::Assertion(format!(
                "unexpected line '{}' in {}",
                line,
                self.path.display()
            )))
        } else {
            Ok(())
        }
    }

    /// Value of the last uncommented `key=value` line for `key`
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .filter(|l| !l.trim_start().starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .filter(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.trim())
            .last()
    }
}
