// Published port resolution for compose services
// Host ports are assigned by docker; this module only reads them back

use crate::errors::{HarnessError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Resolved host address for a container port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServiceEndpoint {
    type Err = HarnessError;

    /// Accepts `host:port`, `[v6]:port` and a bare `port` (meaning localhost)
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(port) = s.parse::<u16>() {
            return Ok(ServiceEndpoint::new("localhost", port));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| HarnessError::ConfigError(format!("Invalid endpoint '{}', expected host:port", s)))?;

        let port = port
            .parse::<u16>()
            .map_err(|_| HarnessError::ConfigError(format!("Invalid port in endpoint '{}'", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(HarnessError::ConfigError(format!("Missing host in endpoint '{}'", s)));
        }

        Ok(ServiceEndpoint::new(host, port))
    }
}

/// A container port the test wants published to the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExposedPort {
    pub service: String,
    pub container_port: u16,
}

impl ExposedPort {
    pub fn new(service: impl Into<String>, container_port: u16) -> Self {
        Self {
            service: service.into(),
            container_port,
        }
    }
}

/// Parse the output of `docker compose port <service> <port>`.
///
/// Compose prints one binding per line (`0.0.0.0:49153`, `[::]:49153`). The
/// first binding wins and wildcard addresses are reported as `localhost`.
pub fn parse_port_output(output: &str) -> Result<ServiceEndpoint> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| HarnessError::DockerError("port is not published".to_string()))?;

    let (host, port) = line
        .rsplit_once(':')
        .ok_or_else(|| HarnessError::DockerError(format!("Unexpected port output: '{}'", line)))?;

    let port = port
        .parse::<u16>()
        .map_err(|_| HarnessError::DockerError(format!("Unexpected port output: '{}'", line)))?;

    if port == 0 {
        return Err(HarnessError::DockerError("port is not published".to_string()));
    }

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = match host {
        "" | "0.0.0.0" | "::" => "localhost",
        other => other,
    };

    Ok(ServiceEndpoint::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_wildcard() {
        let endpoint = parse_port_output("0.0.0.0:49153\n").unwrap();
        assert_eq!(endpoint, ServiceEndpoint::new("localhost", 49153));
    }

    #[test]
    fn test_parse_first_binding_wins() {
        let endpoint = parse_port_output("\n[::]:49160\n0.0.0.0:49161\n").unwrap();
        assert_eq!(endpoint.port, 49160);
        assert_eq!(endpoint.host, "localhost");
    }

    #[test]
    fn test_parse_specific_host() {
        let endpoint = parse_port_output("127.0.0.1:32768").unwrap();
        assert_eq!(endpoint, ServiceEndpoint::new("127.0.0.1", 32768));
    }

    #[test]
    fn test_parse_unpublished() {
        assert!(parse_port_output("").is_err());
        assert!(parse_port_output(":0").is_err());
        assert!(parse_port_output("garbage").is_err());
    }

    #[test]
    fn test_endpoint_from_str_and_display() {
        let endpoint: ServiceEndpoint = "localhost:7687".parse().unwrap();
        assert_eq!(endpoint.to_string(), "localhost:7687");

        let v6: ServiceEndpoint = "[::1]:7474".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:7474");

        let bare: ServiceEndpoint = "7687".parse().unwrap();
        assert_eq!(bare, ServiceEndpoint::new("localhost", 7687));

        assert!("localhost".parse::<ServiceEndpoint>().is_err());
        assert!(":7687".parse::<ServiceEndpoint>().is_err());
    }
}
