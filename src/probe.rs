// Readiness probing for started services
// Probes are closures retried with backoff until they pass or the timeout elapses

use crate::bolt::connection::BoltConnection;
use crate::clock::Clock;
use crate::compose::ports::ServiceEndpoint;
use crate::errors::{HarnessError, Result};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Protocol-specific readiness check
pub type ReadinessProbe = Arc<dyn Fn(&ServiceEndpoint) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`ReadinessProbe`]
pub fn from_fn<F>(f: F) -> ReadinessProbe
where
    F: Fn(&ServiceEndpoint) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Per-attempt connect timeout used by the built-in probes
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: u32,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            backoff_factor: 2,
            timeout: Duration::from_secs(90),
        }
    }
}

impl RetryPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fixed interval, no backoff
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            backoff_factor: 1,
            timeout,
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.backoff_factor.max(1))
            .min(self.max_interval.max(self.interval))
    }
}

/// Run `probe` until it succeeds or `policy.timeout` elapses.
/// Returns the number of attempts it took.
pub fn wait_until_ready(
    endpoint: &ServiceEndpoint,
    probe: &ReadinessProbe,
    policy: &RetryPolicy,
    clock: &dyn Clock,
) -> Result<u32> {
    let start = clock.now();
    let mut delay = policy.interval;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match probe(endpoint) {
            Ok(()) => {
                info!(%endpoint, attempts, "service ready");
                return Ok(attempts);
            }
            Err(e) => e.to_string(),
        };

        let elapsed = clock.elapsed_since(start);
        debug!(%endpoint, attempts, ?elapsed, error = %last_error, "service not ready yet");

        if elapsed >= policy.timeout {
            return Err(HarnessError::ReadinessTimeout {
                endpoint: endpoint.to_string(),
                waited: elapsed,
                attempts,
                last_error,
            });
        }

        clock.sleep(delay.min(policy.timeout - elapsed));
        delay = policy.next_delay(delay);
    }
}

/// Ready once the port completes a Bolt version handshake
pub fn bolt() -> ReadinessProbe {
    from_fn(|endpoint| {
        let connection = BoltConnection::connect(endpoint, ATTEMPT_TIMEOUT)?;
        connection.close();
        Ok(())
    })
}

/// Ready once `GET <path>` answers with a 2xx status
pub fn http(path: &str) -> ReadinessProbe {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    from_fn(move |endpoint| {
        let status = crate::verify::http_status(endpoint, &path, ATTEMPT_TIMEOUT)?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(HarnessError::Connectivity {
                endpoint: endpoint.to_string(),
                message: format!("GET {} returned HTTP {}", path, status),
            })
        }
    })
}

/// Ready once the port accepts a TCP connection
pub fn tcp() -> ReadinessProbe {
    from_fn(|endpoint| {
        connect_tcp(endpoint, ATTEMPT_TIMEOUT).map(|_| ())
    })
}

/// Open a TCP connection to the first address `endpoint` resolves to that accepts
pub(crate) fn connect_tcp(endpoint: &ServiceEndpoint, timeout: Duration) -> Result<TcpStream> {
    let connectivity = |message: String| HarnessError::Connectivity {
        endpoint: endpoint.to_string(),
        message,
    };

    let addrs = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| connectivity(format!("cannot resolve host: {}", e)))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(connectivity(match last_error {
        Some(e) => e.to_string(),
        None => "host resolved to no addresses".to_string(),
    }))
}
