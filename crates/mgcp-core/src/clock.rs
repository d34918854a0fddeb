//! Monotonic time sources
//!
//! Every scheduler instance reads time from a [`Clock`]. Production code uses
//! [`WallClock`]; tests drive a [`ManualClock`] explicitly so that timers and
//! reschedule delays are deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source measured from the clock's own origin
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created
    fn now(&self) -> Duration;
}

/// Shared clock handle
pub type ClockRef = Arc<dyn Clock>;

/// Clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    /// Create a wall clock whose origin is "now"
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `delta`
    pub fn advance(&self, delta: Duration) {
        self.nanos.fetch_add(delta.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time. Moving backwards is ignored to keep the
    /// clock monotonic.
    pub fn set(&self, at: Duration) {
        self.nanos.fetch_max(at.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_monotonic() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(20));
        assert_eq!(clock.now(), Duration::from_millis(20));

        clock.set(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(20));

        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_wall_clock_advances() {
        let clock = WallClock::new();
        let first = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > first);
    }
}
