use embassy_time::{Duration, Instant};

/// Gates attempts so that at most one is made per backoff interval.
///
/// Every attempt starts the interval. Only a confirmed success clears it, so
/// an attempt that looks fine at first but fails later is still gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    delay: Duration,
    attempts: u32,
    next_eligible: Option<Instant>,
}

impl Backoff {
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            attempts: 0,
            next_eligible: None,
        }
    }

    /// Whether an attempt may be made at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.next_eligible.is_none_or(|at| now >= at)
    }

    /// Records an attempt started at `now`.
    pub fn record_attempt(&mut self, now: Instant) {
        self.next_eligible = Some(now + self.delay);
    }

    /// Counts the last attempt as failed.
    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Forgets previous attempts after a confirmed success.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_eligible = None;
    }

    /// Consecutive failed attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_eligible(&self) -> Option<Instant> {
        self.next_eligible
    }
}
