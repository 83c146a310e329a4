// Container log streaming into tracing
// One reader thread per output stream of the `logs --follow` process

use std::io::{BufRead, BufReader, Read};
use std::process::Child;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Follows one service's log process and re-emits each line as a tracing event
pub struct LogFollower {
    service: String,
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

impl LogFollower {
    pub fn attach(service: &str, mut child: Child) -> Self {
        let mut readers = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(service.to_string(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(service.to_string(), "stderr", stderr));
        }

        Self {
            service: service.to_string(),
            child,
            readers,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Kill the log process and wait for the reader threads to drain
    pub fn stop(mut self) {
        if let Err(e) = self.child.kill() {
            // Already exited is fine
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!(service = %self.service, error = %e, "failed to stop log follower");
            }
        }
        let _ = self.child.wait();

        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
    }
}

fn spawn_reader<R>(service: String, stream: &'static str, source: R) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        forward_lines(BufReader::new(source), |line| {
            info!(target: "container", service = %service, stream, "{}", line);
        });
    })
}

/// Hand every non-empty line to `emit` until EOF. Invalid UTF-8 is replaced, not fatal.
fn forward_lines<R, F>(mut reader: R, mut emit: F)
where
    R: BufRead,
    F: FnMut(&str),
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    emit(line);
                }
            }
        }
    }
}
