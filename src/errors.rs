use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Fixture error for '{}': {message}", .path.display())]
    Fixture { path: PathBuf, message: String },

    #[error("Container startup failed for image {image}: {reason}")]
    StartupFailed { image: String, reason: String },

    #[error("Service at {endpoint} was not ready after {waited:?} ({attempts} attempts): {last_error}")]
    ReadinessTimeout {
        endpoint: String,
        waited: Duration,
        attempts: u32,
        last_error: String,
    },

    #[error("Could not connect to {endpoint}: {message}")]
    Connectivity { endpoint: String, message: String },

    #[error("Authentication failed ({code}): {message}")]
    AuthenticationFailed { code: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Docker error: {0}")]
    DockerError(String),

    #[error("Service '{service}' does not expose container port {port}")]
    ServiceNotExposed { service: String, port: u16 },

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Wrap any error raised while bringing a composition up.
    /// Errors that already name the failing image are passed through untouched.
    pub fn startup(image: &str, cause: HarnessError) -> Self {
        match cause {
            HarnessError::StartupFailed { .. } => cause,
            other => HarnessError::StartupFailed {
                image: image.to_string(),
                reason: other.to_string(),
            },
        }
    }

    pub fn fixture(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        HarnessError::Fixture {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_startup_failure(&self) -> bool {
        matches!(self, HarnessError::StartupFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
