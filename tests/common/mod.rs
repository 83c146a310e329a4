// Common test utilities for composeprobe integration tests
// Fake Bolt server and recording compose backend shared by the tests/ binaries
#![allow(dead_code)]

use composeprobe::bolt::chunk;
use composeprobe::bolt::connection::{tag, MAGIC};
use composeprobe::bolt::packstream::{self, Value};
use composeprobe::compose::{ComposeBackend, ComposeProject, EnvBindings};
use composeprobe::errors::{HarnessError, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::thread;

/// In-process Bolt server that accepts a fixed set of user/password pairs
pub struct FakeBoltServer {
    pub port: u16,
    pub messages: Arc<Mutex<Vec<(u8, Value)>>>,
}

type Credentials = Arc<Vec<(String, String)>>;

impl FakeBoltServer {
    pub fn start(version: (u8, u8), user: &str, password: &str) -> Self {
        Self::start_with_users(version, &[(user, password)])
    }

    /// Accept any of `users`, e.g. a new secret password and a default that was never removed
    pub fn start_with_users(version: (u8, u8), users: &[(&str, &str)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind fake Bolt server");
        let port = listener.local_addr().unwrap().port();
        let messages = Arc::new(Mutex::new(Vec::new()));

        let users: Credentials = Arc::new(
            users
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
        );
        let log = messages.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let (users, log) = (users.clone(), log.clone());
                thread::spawn(move || serve(stream, version, &users, &log));
            }
        });

        FakeBoltServer { port, messages }
    }

    /// Tags of every message received so far, in order
    pub fn received_tags(&self) -> Vec<u8> {
        self.messages.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn first_hello(&self) -> Option<Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| *t == tag::HELLO)
            .map(|(_, v)| v.clone())
    }
}

fn serve(
    mut stream: TcpStream,
    (major, minor): (u8, u8),
    users: &[(String, String)],
    log: &Mutex<Vec<(u8, Value)>>,
) {
    let mut preamble = [0u8; 20];
    if stream.read_exact(&mut preamble).is_err() || preamble[..4] != MAGIC {
        return;
    }
    if stream.write_all(&[0, 0, minor, major]).is_err() {
        return;
    }

    let uses_logon = (major, minor) >= (5, 1);
    let authorized = |extra: Option<&Value>| {
        let field = |key: &str| extra.and_then(|m| m.get(key)).and_then(Value::as_str);
        users.iter().any(|(user, password)| {
            field("principal") == Some(user.as_str()) && field("credentials") == Some(password.as_str())
        })
    };

    loop {
        let Ok(payload) = chunk::read_message(&mut stream) else { return };
        let Ok(Value::Structure { tag: message, fields }) = packstream::decode(&payload) else {
            return;
        };
        let extra = fields.first().cloned().unwrap_or(Value::Null);
        log.lock().unwrap().push((message, extra.clone()));

        let reply = match message {
            tag::HELLO if uses_logon => success(),
            tag::HELLO | tag::LOGON if authorized(Some(&extra)) => success(),
            tag::HELLO | tag::LOGON => failure(
                "Neo.ClientError.Security.Unauthorized",
                "The client is unauthorized due to authentication failure.",
            ),
            tag::GOODBYE => return,
            _ => failure("Neo.ClientError.Request.Invalid", "unsupported message"),
        };

        let mut buf = Vec::new();
        packstream::encode(&reply, &mut buf).unwrap();
        if chunk::write_message(&mut stream, &buf).is_err() {
            return;
        }
    }
}

fn success() -> Value {
    Value::Structure {
        tag: tag::SUCCESS,
        fields: vec![packstream::map([
            ("server", Value::from("Neo4j/5.26.0")),
            ("connection_id", Value::from("bolt-1")),
        ])],
    }
}

fn failure(code: &str, message: &str) -> Value {
    Value::Structure {
        tag: tag::FAILURE,
        fields: vec![packstream::map([
            ("code", Value::from(code)),
            ("message", Value::from(message)),
        ])],
    }
}

type UpHook = Box<dyn Fn(&ComposeProject) -> Result<()> + Send + Sync>;

/// `ComposeBackend` that records calls instead of running docker.
///
/// Like compose, `up` fails when a `secrets.*.file` referenced by the
/// descriptor is missing.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<String>>,
    ports: HashMap<u16, u16>,
    env_seen: Mutex<Vec<EnvBindings>>,
    working_dirs: Mutex<Vec<PathBuf>>,
    on_up: Option<UpHook>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `container_port` on `host_port` of localhost
    pub fn map_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, host_port);
        self
    }

    /// Run `hook` after a successful `up`, e.g. to play the container writing files
    pub fn on_up<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ComposeProject) -> Result<()> + Send + Sync + 'static,
    {
        self.on_up = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }

    pub fn env_seen(&self) -> Vec<EnvBindings> {
        self.env_seen.lock().unwrap().clone()
    }

    pub fn working_dirs(&self) -> Vec<PathBuf> {
        self.working_dirs.lock().unwrap().clone()
    }

    fn check_secret_files(project: &ComposeProject) -> Result<()> {
        let text = std::fs::read_to_string(&project.descriptor)?;
        let doc: serde_yml::Value = serde_yml::from_str(&text)
            .map_err(|e| HarnessError::DockerError(format!("invalid compose file: {}", e)))?;

        if let Some(secrets) = doc.get("secrets").and_then(|s| s.as_mapping()) {
            for (name, spec) in secrets {
                let Some(file) = spec.get("file").and_then(|f| f.as_str()) else { continue };
                let path = project.working_dir.join(file);
                if !path.exists() {
                    return Err(HarnessError::DockerError(format!(
                        "secret {:?}: file {} not found",
                        name.as_str().unwrap_or_default(),
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl ComposeBackend for RecordingBackend {
    fn up(&self, project: &ComposeProject) -> Result<()> {
        self.calls.lock().unwrap().push(format!("up {}", project.name));
        self.env_seen.lock().unwrap().push(project.env.clone());
        self.working_dirs.lock().unwrap().push(project.working_dir.clone());

        Self::check_secret_files(project)?;
        match &self.on_up {
            Some(hook) => hook(project),
            None => Ok(()),
        }
    }

    fn down(&self, project: &ComposeProject) -> Result<()> {
        self.calls.lock().unwrap().push(format!("down {}", project.name));
        Ok(())
    }

    fn port(&self, _project: &ComposeProject, service: &str, container_port: u16) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("port {} {}", service, container_port));
        let host_port = self
            .ports
            .get(&container_port)
            .copied()
            .unwrap_or(40000 + container_port % 10000);
        Ok(format!("0.0.0.0:{}\n", host_port))
    }

    fn follow_logs(&self, _project: &ComposeProject, _service: &str) -> Result<Option<Child>> {
        Ok(None)
    }
}

/// Path to the bundled compose fixtures
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("dockersecrets")
}

pub fn suite_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("suites")
        .join("dockersecrets.yml")
}
