//! Time source used for protocol deadlines and fixed delays.

use std::time::{Duration, Instant};

/// Monotonic clock with a blocking sleep.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    /// Time elapsed since `since`.
    fn elapsed(&self, since: Instant) -> Duration {
        self.now()
            .saturating_duration_since(since)
    }
}

/// Wall clock backed by `std::time` and `std::thread::sleep`.
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

/// Virtual clock: `sleep` advances time instantly and is recorded.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct MockClock {
    base: Instant,
    offset: std::cell::Cell<Duration>,
    sleeps: std::cell::RefCell<Vec<Duration>>,
}

#[cfg(test)]
impl MockClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: std::cell::Cell::new(Duration::ZERO),
            sleeps: std::cell::RefCell::new(Vec::new()),
        }
    }

    /// Virtual time elapsed since creation.
    pub(crate) fn total(&self) -> Duration {
        self.offset.get()
    }

    /// Sleeps other than the ack-poll interval, in order.
    pub(crate) fn long_sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .borrow()
            .iter()
            .copied()
            .filter(|d| *d > crate::receiver::POLL_INTERVAL)
            .collect()
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
        self.sleeps.borrow_mut().push(duration);
    }
}
