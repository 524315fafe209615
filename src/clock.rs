//! Time source for the connection state machine.

use core::cell::Cell;

use embassy_time::{Duration, Instant};

/// Supplies the current instant.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The `embassy-time` driver clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    ticks: Cell<u64>,
}

impl ManualClock {
    pub const fn new() -> Self {
        Self {
            ticks: Cell::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.ticks.set(self.ticks.get() + by.as_ticks());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.get())
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}
