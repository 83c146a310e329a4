// Time source for readiness polling
// Backoff and startup timeouts read and wait through `Clock`, never the OS directly

use std::time::{Duration, Instant};

/// What `wait_until_ready` needs from time: a reading and a pause between attempts
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Pause before the next readiness attempt
    fn sleep(&self, duration: Duration);

    /// Time spent waiting since `start`, as this clock sees it
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Wall-clock time with real sleeps, used outside tests
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
