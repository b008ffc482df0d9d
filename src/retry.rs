//! Bounded polling used by every wait in the kiosk (tool readiness, network)

use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll `interval` apart until `max_wait` has elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    pub fn from_secs(interval: u64, max_wait: u64) -> Self {
        Self::new(Duration::from_secs(interval), Duration::from_secs(max_wait))
    }
}

/// The wait ran out without a successful attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    pub waited: Duration,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s) in {:?}", self.attempts, self.waited)?;
        if let Some(err) = &self.last_error {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Timeout {}

/// Run `action` until it returns Ok or the policy's deadline passes
///
/// The action is always attempted at least once, and once more right at the
/// deadline, so a `max_wait` of zero degenerates to a single attempt.
pub fn retry<T, E, F>(policy: &RetryPolicy, what: &str, mut action: F) -> Result<T, Timeout>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let started = Instant::now();
    let deadline = started + policy.max_wait;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match action() {
            Ok(value) => {
                if attempts > 1 {
                    debug!(what, attempts, elapsed = ?started.elapsed(), "ready after retrying");
                }
                return Ok(value);
            }
            Err(e) => e.to_string(),
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(Timeout {
                waited: started.elapsed(),
                attempts,
                last_error: Some(last_error),
            });
        }

        debug!(what, attempts, error = %last_error, "not ready, polling again");
        // Never sleep past the deadline
        std::thread::sleep(policy.interval.min(deadline - now));
    }
}
