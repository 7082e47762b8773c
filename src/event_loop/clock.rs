//! Time sources for the event loop
//!
//! Readings are durations since an arbitrary per-clock origin. The manual
//! clock gives tests full control over time: `sleep_until` simply jumps.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// A monotonic time source
pub trait Clock {
    /// Current reading
    fn now(&self) -> Duration;

    /// Block until the reading reaches `deadline`
    fn sleep_until(&self, deadline: Duration);
}

/// Wall-clock time
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual time that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }

    /// Move time forward by fractional seconds. Negative and NaN amounts
    /// are ignored.
    pub fn advance_secs(&self, seconds: f64) {
        if !(seconds > 0.0) {
            return;
        }
        self.advance(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}
