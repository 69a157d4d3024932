//! Fixed-delay, bounded reconnection.

use std::io;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;

pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// How many times a dropped socket is reopened, and how long to wait between tries.
///
/// The delay is constant; there is no backoff and no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Attempt counter for one Session.
///
/// The budget is restored only after a reopened connection proves healthy:
/// [`arm`](Self::arm) when the socket opens, [`confirm`](Self::confirm) when
/// the first data frame arrives. A connection that opens and drops before
/// any data keeps counting against the same outage.
#[derive(Debug)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
    armed: bool,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            armed: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts()
    }

    pub fn should_retry(&self) -> bool {
        self.attempts < self.policy.max_attempts()
    }

    /// Claims the next attempt, returning its 1-based number and the wait before it.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        self.armed = false;
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.policy.delay()))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.armed = false;
    }

    /// Marks a freshly opened connection as on probation.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Restores the budget if the armed connection delivered data.
    pub fn confirm(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.reset();
        true
    }
}

/// Delivers `message` on `tx` after `delay` from a short-lived timer thread.
pub fn schedule<T: Send + 'static>(delay: Duration, tx: Sender<T>, message: T) -> io::Result<()> {
    thread::Builder::new()
        .name("opconsole-reconnect".to_string())
        .spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let _ = tx.send(message);
        })
        .map(|_| ())
}
