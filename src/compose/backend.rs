// Process boundary for docker compose
// Everything that shells out to docker lives behind `ComposeBackend`

use crate::compose::env::EnvBindings;
use crate::config::ComposeCommand;
use crate::errors::{HarnessError, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use tracing::debug;

/// A compose project as seen by the backend
#[derive(Debug, Clone)]
pub struct ComposeProject {
    /// Project name passed with `-p`, unique per workspace
    pub name: String,
    pub descriptor: PathBuf,
    /// Directory compose runs in; relative `file:` secrets resolve from here
    pub working_dir: PathBuf,
    pub env: EnvBindings,
}

/// Operations the launcher needs from an orchestration engine
pub trait ComposeBackend: Send + Sync {
    /// Create and start all services in the background
    fn up(&self, project: &ComposeProject) -> Result<()>;

    /// Stop and remove containers, networks and anonymous volumes
    fn down(&self, project: &ComposeProject) -> Result<()>;

    /// Raw `port` output for a published container port
    fn port(&self, project: &ComposeProject, service: &str, container_port: u16) -> Result<String>;

    /// Spawn a process following a service's logs, if the backend supports it
    fn follow_logs(&self, project: &ComposeProject, service: &str) -> Result<Option<Child>>;
}

/// Docker Compose command variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerComposeVariant {
    /// Legacy docker-compose (with hyphen)
    Hyphenated,
    /// Modern docker compose (no hyphen, subcommand of docker)
    Subcommand,
}

/// `ComposeBackend` driving the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCompose {
    variant: DockerComposeVariant,
}

impl DockerCompose {
    pub fn new(variant: DockerComposeVariant) -> Self {
        Self { variant }
    }

    /// Pick the variant according to config, probing the system for `auto`
    pub fn from_config(command: ComposeCommand) -> Self {
        let variant = match command {
            ComposeCommand::Docker => DockerComposeVariant::Subcommand,
            ComposeCommand::DockerCompose => DockerComposeVariant::Hyphenated,
            ComposeCommand::Auto => Self::detect_variant(),
        };
        Self::new(variant)
    }

    pub fn detect() -> Self {
        Self::new(Self::detect_variant())
    }

    fn detect_variant() -> DockerComposeVariant {
        // Try modern "docker compose" first
        let modern = Command::new("docker")
            .arg("compose")
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if modern {
            DockerComposeVariant::Subcommand
        } else {
            DockerComposeVariant::Hyphenated
        }
    }

    pub fn variant(&self) -> DockerComposeVariant {
        self.variant
    }

    /// Check if Docker is available on the system
    pub fn is_docker_available(&self) -> bool {
        Command::new("docker")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Program and full argument list for a compose invocation (no shell involved)
    pub fn command_line(&self, project: &ComposeProject, args: &[&str]) -> (String, Vec<String>) {
        let mut full_args = Vec::with_capacity(args.len() + 5);
        let program = match self.variant {
            DockerComposeVariant::Subcommand => {
                full_args.push("compose".to_string());
                "docker"
            }
            DockerComposeVariant::Hyphenated => "docker-compose",
        };

        full_args.push("-p".to_string());
        full_args.push(project.name.clone());
        full_args.push("-f".to_string());
        full_args.push(project.descriptor.to_string_lossy().to_string());
        full_args.extend(args.iter().map(|a| a.to_string()));

        (program.to_string(), full_args)
    }

    fn command(&self, project: &ComposeProject, args: &[&str]) -> Command {
        let (program, full_args) = self.command_line(project, args);
        debug!(project = %project.name, "{} {}", program, full_args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(full_args).current_dir(&project.working_dir);
        for (name, value) in project.env.iter() {
            cmd.env(name, value);
        }
        cmd
    }

    fn execute(&self, project: &ComposeProject, args: &[&str]) -> Result<String> {
        let output = self.command(project, args).output().map_err(|e| {
            HarnessError::DockerError(format!("Failed to run docker compose: {}", e))
        })?;

        command_output(args, output)
    }
}

/// Stdout of a finished compose command, or `CommandFailed` carrying its stderr
fn command_output(args: &[&str], output: Output) -> Result<String> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HarnessError::CommandFailed(format!(
            "`compose {}` exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

impl ComposeBackend for DockerCompose {
    fn up(&self, project: &ComposeProject) -> Result<()> {
        self.execute(project, &["up", "-d"]).map(|_| ())
    }

    fn down(&self, project: &ComposeProject) -> Result<()> {
        self.execute(project, &["down", "-v", "--remove-orphans"])
            .map(|_| ())
    }

    fn port(&self, project: &ComposeProject, service: &str, container_port: u16) -> Result<String> {
        let port = container_port.to_string();
        self.execute(project, &["port", service, &port])
    }

    fn follow_logs(&self, project: &ComposeProject, service: &str) -> Result<Option<Child>> {
        let child = self
            .command(project, &["logs", "--follow", "--no-log-prefix", service])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HarnessError::DockerError(format!("Failed to follow logs: {}", e)))?;
        Ok(Some(child))
    }
}

/// Derive a compose project name.
/// Docker project names must be lowercase alphanumeric with hyphens only.
pub fn project_name(label: &str) -> String {
    let sanitized = label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>();

    // Remove leading/trailing hyphens and collapse multiple hyphens
    let name = sanitized
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if name.is_empty() {
        "composeprobe".to_string()
    } else {
        name
    }
}
