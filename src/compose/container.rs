// Composition lifecycle: start, resolve ports, wait for readiness
// RunningComposition tears its services down exactly once, on stop or on drop

use crate::clock::{Clock, SystemClock};
use crate::compose::backend::{project_name, ComposeBackend, ComposeProject, DockerCompose};
use crate::compose::env::{unresolved_variables, EnvBindings};
use crate::compose::logs::LogFollower;
use crate::compose::ports::{parse_port_output, ExposedPort, ServiceEndpoint};
use crate::errors::{HarnessError, Result};
use crate::probe::{self, ReadinessProbe, RetryPolicy};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

struct ReadinessCheck {
    target: ExposedPort,
    probe: ReadinessProbe,
}

pub struct Composition {
    descriptor: PathBuf,
    project_name: Option<String>,
    env: EnvBindings,
    image: Option<String>,
    exposed: Vec<ExposedPort>,
    checks: Vec<ReadinessCheck>,
    log_services: Vec<String>,
    policy: RetryPolicy,
    backend: Option<Arc<dyn ComposeBackend>>,
    clock: Arc<dyn Clock>,
}

impl Composition {
    pub fn new(descriptor: impl Into<PathBuf>) -> Self {
        Self {
            descriptor: descriptor.into(),
            project_name: None,
            env: EnvBindings::new(),
            image: None,
            exposed: Vec::new(),
            checks: Vec::new(),
            log_services: Vec::new(),
            policy: RetryPolicy::default(),
            backend: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a specific backend instead of detecting the docker CLI at start
    pub fn with_backend(mut self, backend: Arc<dyn ComposeBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_project_name(mut self, name: &str) -> Self {
        self.project_name = Some(project_name(name));
        self
    }

    /// Publish a container port of `service` and make its host mapping available
    pub fn with_exposed_service(mut self, service: &str, container_port: u16) -> Self {
        let port = ExposedPort::new(service, container_port);
        if !self.exposed.contains(&port) {
            self.exposed.push(port);
        }
        self
    }

    pub fn with_env(mut self, name: &str, value: impl Into<String>) -> Self {
        self.env.set(name, value);
        self
    }

    /// Bind the image under test to `variable`; startup errors name this image
    pub fn with_image(mut self, variable: &str, image: &str) -> Self {
        self.env.set(variable, image);
        self.image = Some(image.to_string());
        self
    }

    /// Bind `variable` to the absolute form of `root`, for volume mappings
    pub fn with_host_root(mut self, variable: &str, root: &Path) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.env.set(variable, root.to_string_lossy().to_string());
        self
    }

    /// Block `start` until `probe` passes against `service:container_port`.
    /// The port is exposed if it was not already.
    pub fn waiting_for(mut self, service: &str, container_port: u16, probe: ReadinessProbe) -> Self {
        self = self.with_exposed_service(service, container_port);
        self.checks.push(ReadinessCheck {
            target: ExposedPort::new(service, container_port),
            probe,
        });
        self
    }

    /// Re-emit the service's container logs as tracing events while it runs
    pub fn with_log_consumer(mut self, service: &str) -> Self {
        if !self.log_services.iter().any(|s| s == service) {
            self.log_services.push(service.to_string());
        }
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.policy = self.policy.with_timeout(timeout);
        self
    }

    /// Image named in startup errors
    fn image_label(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| self.descriptor.display().to_string())
    }

    fn derive_project_name(&self) -> String {
        if let Some(name) = &self.project_name {
            return name.clone();
        }

        let stem = self
            .descriptor
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent = self
            .descriptor
            .parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        project_name(&format!("{}-{}", parent, stem))
    }

    /// Bring the services up and resolve their published ports, without
    /// waiting for readiness.
    pub fn launch(self) -> Result<RunningComposition> {
        let image = self.image_label();

        if !self.descriptor.is_file() {
            return Err(HarnessError::fixture(
                &self.descriptor,
                "compose descriptor does not exist",
            ));
        }

        let text = fs::read_to_string(&self.descriptor)
            .map_err(|e| HarnessError::fixture(&self.descriptor, e))?;
        let missing = unresolved_variables(&text, &self.env, |name| std::env::var_os(name).is_some());
        if !missing.is_empty() {
            return Err(HarnessError::ConfigError(format!(
                "{} references unbound variables: {}",
                self.descriptor.display(),
                missing.join(", ")
            )));
        }

        let working_dir = self
            .descriptor
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let project = ComposeProject {
            name: self.derive_project_name(),
            descriptor: self.descriptor.clone(),
            working_dir,
            env: self.env.clone(),
        };

        let backend = self
            .backend
            .clone()
            .unwrap_or_else(|| Arc::new(DockerCompose::detect()));

        // From here on the guard owns teardown, whatever happens next
        let mut running = RunningComposition {
            project,
            backend,
            image: image.clone(),
            endpoints: HashMap::new(),
            followers: Vec::new(),
            checks: self.checks,
            policy: self.policy,
            clock: self.clock,
            stopped: false,
        };

        info!(project = %running.project.name, %image, "starting composition");
        running
            .backend
            .up(&running.project)
            .map_err(|e| HarnessError::startup(&image, e))?;

        for exposed in self.exposed {
            let raw = running
                .backend
                .port(&running.project, &exposed.service, exposed.container_port)
                .and_then(|out| parse_port_output(&out))
                .map_err(|e| {
                    HarnessError::startup(
                        &image,
                        HarnessError::DockerError(format!(
                            "cannot resolve {}:{}: {}",
                            exposed.service, exposed.container_port, e
                        )),
                    )
                })?;
            info!(service = %exposed.service, container_port = exposed.container_port, endpoint = %raw, "resolved port");
            running.endpoints.insert(exposed, raw);
        }

        for service in self.log_services {
            match running.backend.follow_logs(&running.project, &service) {
                Ok(Some(child)) => running.followers.push(LogFollower::attach(&service, child)),
                Ok(None) => {}
                Err(e) => warn!(%service, error = %e, "cannot stream container logs"),
            }
        }

        Ok(running)
    }

    /// Launch and block until every readiness check passes or times out
    pub fn start(self) -> Result<RunningComposition> {
        let running = self.launch()?;
        running.await_readiness()?;
        Ok(running)
    }

    /// Start, hand the running composition to `body`, then tear down on every path.
    /// A teardown failure is reported only when `body` itself succeeded.
    pub fn run<T, F>(self, body: F) -> Result<T>
    where
        F: FnOnce(&RunningComposition) -> Result<T>,
    {
        let mut running = self.start()?;
        let outcome = body(&running);
        let teardown = running.stop();

        match (outcome, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(teardown_error)) => {
                warn!(error = %teardown_error, "teardown failed after an earlier error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }
}

/// Live handle to started services
pub struct RunningComposition {
    project: ComposeProject,
    backend: Arc<dyn ComposeBackend>,
    image: String,
    endpoints: HashMap<ExposedPort, ServiceEndpoint>,
    followers: Vec<LogFollower>,
    checks: Vec<ReadinessCheck>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    stopped: bool,
}

impl RunningComposition {
    pub fn project_name(&self) -> &str {
        &self.project.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Run every registered readiness check. Failures name the image under test.
    pub fn await_readiness(&self) -> Result<()> {
        for check in &self.checks {
            let endpoint = self.endpoint(&check.target.service, check.target.container_port)?;
            info!(service = %check.target.service, %endpoint, timeout = ?self.policy.timeout, "waiting for readiness");
            probe::wait_until_ready(endpoint, &check.probe, &self.policy, self.clock.as_ref())
                .map_err(|e| HarnessError::startup(&self.image, e))?;
        }
        Ok(())
    }

    pub fn endpoint(&self, service: &str, container_port: u16) -> Result<&ServiceEndpoint> {
        self.endpoints
            .get(&ExposedPort::new(service, container_port))
            .ok_or_else(|| HarnessError::ServiceNotExposed {
                service: service.to_string(),
                port: container_port,
            })
    }

    pub fn service_host(&self, service: &str, container_port: u16) -> Result<&str> {
        self.endpoint(service, container_port).map(|e| e.host.as_str())
    }

    pub fn service_port(&self, service: &str, container_port: u16) -> Result<u16> {
        self.endpoint(service, container_port).map(|e| e.port)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (&ExposedPort, &ServiceEndpoint)> {
        self.endpoints.iter()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Tear the composition down. Only the first call does anything.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        info!(project = %self.project.name, "stopping composition");
        let result = self.backend.down(&self.project);

        for follower in self.followers.drain(..) {
            follower.stop();
        }

        result
    }
}

impl Drop for RunningComposition {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(project = %self.project.name, error = %e, "failed to stop composition");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use std::process::Child;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedBackend {
        calls: Mutex<Vec<String>>,
        fail_up: bool,
    }

    impl ScriptedBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ComposeBackend for ScriptedBackend {
        fn up(&self, project: &ComposeProject) -> Result<()> {
            self.calls.lock().unwrap().push(format!("up {}", project.name));
            if self.fail_up {
                Err(HarnessError::DockerError("secret file not found".to_string()))
            } else {
                Ok(())
            }
        }

        fn down(&self, project: &ComposeProject) -> Result<()> {
            self.calls.lock().unwrap().push(format!("down {}", project.name));
            Ok(())
        }

        fn port(&self, _project: &ComposeProject, service: &str, port: u16) -> Result<String> {
            self.calls.lock().unwrap().push(format!("port {} {}", service, port));
            Ok(format!("0.0.0.0:{}\n", 40000 + port % 1000))
        }

        fn follow_logs(&self, _project: &ComposeProject, _service: &str) -> Result<Option<Child>> {
            Ok(None)
        }
    }

    fn descriptor(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("simple-container-compose.yml");
        fs::write(&path, "services:\n  db:\n    image: ${NEO4J_IMAGE}\n").unwrap();
        path
    }

    #[test]
    fn test_start_resolves_ports_and_stops_once() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::default());

        let mut running = Composition::new(descriptor(&dir))
            .with_backend(backend.clone())
            .with_project_name("unit")
            .with_image("NEO4J_IMAGE", "neo4j:test")
            .with_exposed_service("db", 7687)
            .with_exposed_service("db", 7474)
            .start()
            .unwrap();

        assert_eq!(running.service_host("db", 7687).unwrap(), "localhost");
        assert_eq!(running.service_port("db", 7687).unwrap(), 40687);
        assert_eq!(running.service_port("db", 7474).unwrap(), 40474);
        assert!(matches!(
            running.endpoint("db", 9999),
            Err(HarnessError::ServiceNotExposed { .. })
        ));

        running.stop().unwrap();
        running.stop().unwrap();
        drop(running);

        let downs = backend.calls().iter().filter(|c| c.starts_with("down")).count();
        assert_eq!(downs, 1);
    }

    #[test]
    fn test_failed_up_tears_down_and_names_image() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend {
            fail_up: true,
            ..Default::default()
        });

        let err = Composition::new(descriptor(&dir))
            .with_backend(backend.clone())
            .with_project_name("unit")
            .with_image("NEO4J_IMAGE", "neo4j:test")
            .start()
            .err()
            .unwrap();

        assert!(err.to_string().contains("Container startup failed for image neo4j:test"));
        assert_eq!(backend.calls(), vec!["up unit", "down unit"]);
    }

    #[test]
    fn test_readiness_timeout_is_startup_failure() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let never = probe::from_fn(|endpoint| {
            Err(HarnessError::Connectivity {
                endpoint: endpoint.to_string(),
                message: "refused".to_string(),
            })
        });

        let err = Composition::new(descriptor(&dir))
            .with_backend(backend.clone())
            .with_clock(Arc::new(FakeClock::new()))
            .with_image("NEO4J_IMAGE", "neo4j:test")
            .waiting_for("db", 7687, never)
            .start()
            .err()
            .unwrap();

        assert!(err.is_startup_failure());
        assert!(err.to_string().contains("not ready after"));
        assert_eq!(backend.calls().last().map(|c| c.starts_with("down")), Some(true));
    }

    #[test]
    fn test_unbound_variable_fails_before_up() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let path = dir.path().join("compose.yml");
        fs::write(&path, "services:\n  db:\n    image: ${COMPOSEPROBE_UNIT_UNBOUND_IMAGE}\n").unwrap();

        let err = Composition::new(path)
            .with_backend(backend.clone())
            .start()
            .err()
            .unwrap();

        assert!(matches!(err, HarnessError::ConfigError(_)));
        assert!(err.to_string().contains("COMPOSEPROBE_UNIT_UNBOUND_IMAGE"));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_project_name_derived_from_workspace() {
        let dir = TempDir::new().unwrap();
        let composition = Composition::new(descriptor(&dir));
        let name = composition.derive_project_name();

        assert!(name.ends_with("-simple-container-compose"));
        assert_eq!(name, name.to_lowercase());
    }

    #[test]
    fn test_run_tears_down_when_body_fails() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::default());

        let result: Result<()> = Composition::new(descriptor(&dir))
            .with_backend(backend.clone())
            .with_image("NEO4J_IMAGE", "neo4j:test")
            .run(|_| Err(HarnessError::Assertion("expected line missing".to_string())));

        assert!(matches!(result, Err(HarnessError::Assertion(_))));
        let downs = backend.calls().iter().filter(|c| c.starts_with("down")).count();
        assert_eq!(downs, 1);
    }
}
