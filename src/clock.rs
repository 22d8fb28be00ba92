//! Pluggable time source for ttl scheduling.
//!
//! SPEC_FULL.md §9 leaves open "whether ttl timers are measured against wall
//! clock or a monotonic scheduler" and resolves it (DESIGN.md, "Clock
//! choice") in favor of a monotonic, pluggable clock: `SystemClock` wraps
//! `std::time::Instant` for production use, `VirtualClock` lets tests
//! advance time deterministically without sleeping (SPEC_FULL.md §8's ttl
//! scenario needs exactly this to stay fast and non-flaky).

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock, backed by `Instant::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock tests can advance by hand. Starts pinned at the instant it was
/// created and only moves forward when [`VirtualClock::advance`] is called.
#[derive(Clone)]
pub struct VirtualClock {
    current: Arc<Mutex<Instant>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        VirtualClock {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_only_moves_on_advance() {
        let clock = VirtualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_millis(50));
        assert!(clock.now() >= t0 + Duration::from_millis(50));
    }
}
