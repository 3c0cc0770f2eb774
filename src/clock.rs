//! Clock abstractions used by the circuit breaker, DNS groups, and health checks.

use std::time::Instant;

/// Clock abstraction so timing can be faked in tests.
///
/// All components in this crate read time exclusively through this trait so
/// that sliding-window rollovers, breaker open-windows, DNS TTL refreshes,
/// and health-check ping watchdogs can be driven deterministically.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic nanoseconds since an arbitrary, clock-specific epoch.
    fn now_nanos(&self) -> u64;

    /// Convenience millisecond view of [`Clock::now_nanos`].
    fn now_millis(&self) -> u64 {
        self.now_nanos() / 1_000_000
    }
}

/// Monotonic clock backed by `Instant::now()`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

/// A manually advanced clock for deterministic tests.
///
/// Shared via `Arc` internally so clones observe the same virtual time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the virtual clock by `nanos`.
    pub fn advance(&self, nanos: u64) {
        self.now.fetch_add(nanos, std::sync::atomic::Ordering::SeqCst);
    }

    /// Advance the virtual clock by a [`std::time::Duration`].
    pub fn advance_by(&self, duration: std::time::Duration) {
        self.advance(duration.as_nanos() as u64);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_starts_at_zero_and_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_nanos(), 0);
        clock.advance(1_500_000);
        assert_eq!(clock.now_millis(), 1);
        clock.advance_by(std::time::Duration::from_millis(999));
        assert_eq!(clock.now_millis(), 1000);
    }

    #[test]
    fn manual_clock_clones_share_state() {
        let clock = ManualClock::new();
        let clone = clock.clone();
        clock.advance(10);
        assert_eq!(clone.now_nanos(), 10);
    }

    #[test]
    fn monotonic_clock_is_non_decreasing() {
        let clock = MonotonicClock::default();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }
}
