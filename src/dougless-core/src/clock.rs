//! Time sources for the event loop.
//!
//! Deadline comparisons in the loop and the timer registry go through a
//! [`Clock`] rather than `Instant::now()` directly, so tests can substitute a
//! manually advanced clock. Wall-clock time is never consulted.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A monotonic time source.
///
/// This is one of the two substitution points of the core (the other being
/// the prompter in the permissions layer); everything else is concrete.
pub trait Clock: Send + Sync + 'static {
    /// The current monotonic instant.
    fn now(&self) -> Instant;
}

/// The default clock, backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Useful for pinning deadline arithmetic in tests without real sleeps. Note
/// that the event loop still parks on its queue while idle; tests that
/// advance a `ManualClock` must also give the loop a reason to wake (any
/// scheduled task does).
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Create a manual clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        *self.now.lock() += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
