use crate::errors::{HarnessError, Result};
use crate::probe::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = ".composeprobe.yml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Image under test, bound to `image_variable` when a composition starts
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_image_variable")]
    pub image_variable: String,
    #[serde(default = "default_host_root_variable")]
    pub host_root_variable: String,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_max_interval")]
    pub max_interval: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Retain workspaces after the run for debugging
    #[serde(default)]
    pub keep: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComposeConfig {
    #[serde(default)]
    pub command: ComposeCommand,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeCommand {
    /// Prefer `docker compose`, fall back to `docker-compose`
    #[default]
    Auto,
    Docker,
    DockerCompose,
}

fn default_image() -> String {
    "neo4j:4.4-enterprise".to_string()
}

fn default_image_variable() -> String {
    "NEO4J_IMAGE".to_string()
}

fn default_host_root_variable() -> String {
    "HOST_ROOT".to_string()
}

fn default_timeout() -> String {
    "90s".to_string()
}

fn default_interval() -> String {
    "1s".to_string()
}

fn default_max_interval() -> String {
    "5s".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: default_image(),
            image_variable: default_image_variable(),
            host_root_variable: default_host_root_variable(),
            readiness: ReadinessConfig::default(),
            workspace: WorkspaceConfig::default(),
            compose: ComposeConfig::default(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            interval: default_interval(),
            max_interval: default_max_interval(),
        }
    }
}

impl ReadinessConfig {
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy {
            timeout: parse_duration(&self.timeout)?,
            interval: parse_duration(&self.interval)?,
            max_interval: parse_duration(&self.max_interval)?,
            ..RetryPolicy::default()
        };

        if policy.interval.is_zero() {
            return Err(HarnessError::ConfigError(
                "readiness.interval must be greater than zero".to_string(),
            ));
        }

        Ok(policy)
    }
}

impl Config {
    /// Load config from `.composeprobe.yml` in `dir`, then apply environment overrides
    pub fn load(dir: &Path) -> Result<Self> {
        let mut config = Self::load_file(&dir.join(CONFIG_FILE_NAME))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config starting from the current directory, searching upward for a config file
    pub fn load_from_current_dir() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        match Self::find_root(&cwd) {
            Some(root) => Self::load(&root),
            None => {
                let mut config = Config::default();
                config.apply_overrides(|key| std::env::var(key).ok());
                Ok(config)
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Config::default());
        }

        serde_yml::from_str(&content).map_err(|e| {
            HarnessError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `COMPOSEPROBE_*` overrides using the given variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup("COMPOSEPROBE_IMAGE").filter(|v| !v.trim().is_empty()) {
            self.image = image.trim().to_string();
        }

        if let Some(keep) = lookup("COMPOSEPROBE_KEEP_WORKSPACE") {
            self.workspace.keep = matches!(
                keep.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    /// Find the nearest directory at or above `start_path` containing a config file
    pub fn find_root(start_path: &Path) -> Option<PathBuf> {
        start_path
            .ancestors()
            .find(|dir| dir.join(CONFIG_FILE_NAME).is_file())
            .map(Path::to_path_buf)
    }
}

/// Parse a duration string such as "500ms", "30s", "2m" or a bare number of seconds
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let invalid = || HarnessError::ConfigError(format!("Invalid duration value: '{}'", value));

    if let Some(num_str) = value.strip_suffix("ms") {
        num_str
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| invalid())
    } else if let Some(num_str) = value.strip_suffix('s') {
        num_str
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid())
    } else if let Some(num_str) = value.strip_suffix('m') {
        let minutes = num_str.trim().parse::<u64>().map_err(|_| invalid())?;
        let seconds = minutes.checked_mul(60).ok_or_else(invalid)?;
        Ok(Duration::from_secs(seconds))
    } else {
        value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.image_variable, "NEO4J_IMAGE");
        assert_eq!(config.host_root_variable, "HOST_ROOT");
        assert!(!config.workspace.keep);
        assert_eq!(config.compose.command, ComposeCommand::Auto);

        let policy = config.readiness.retry_policy().unwrap();
        assert_eq!(policy.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_load_missing_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_file(&temp_dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.image, "neo4j:4.4-enterprise");
    }

    #[test]
    fn test_default_image_matches_bundled_suite() {
        // The bundled suite asserts 4.x config key names
        let suite = include_str!("../suites/dockersecrets.yml");
        assert!(suite.contains("dbms.memory.pagecache.size"));
        assert!(default_image().starts_with("neo4j:4."));
    }

    #[test]
    fn test_load_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
image: neo4j:5.26-enterprise
readiness:
  timeout: 2m
workspace:
  keep: true
compose:
  command: docker-compose
"#,
        )
        .unwrap();

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.image, "neo4j:5.26-enterprise");
        assert_eq!(config.readiness.interval, "1s");
        assert!(config.workspace.keep);
        assert_eq!(config.compose.command, ComposeCommand::DockerCompose);
        assert_eq!(
            config.readiness.retry_policy().unwrap().timeout,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "compose:\n  command: podman\n").unwrap();

        let err = Config::load_file(&path).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigError(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("COMPOSEPROBE_IMAGE", "neo4j:5.20-community"),
            ("COMPOSEPROBE_KEEP_WORKSPACE", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.image, "neo4j:5.20-community");
        assert!(config.workspace.keep);
    }

    #[test]
    fn test_find_root_walks_upward() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(Config::find_root(&nested), Some(temp_dir.path().to_path_buf()));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("1h").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let err = parse_duration("307445734561825861m").unwrap_err();
        assert!(matches!(err, HarnessError::ConfigError(_)));
        assert!(err.to_string().contains("307445734561825861m"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let readiness = ReadinessConfig {
            interval: "0s".to_string(),
            ..ReadinessConfig::default()
        };
        assert!(readiness.retry_policy().is_err());
    }
}
