//! Virtual-time abstraction used everywhere in the engine instead of
//! `std::time`/`Instant` directly, so that tests can run the same decision
//! logic a production cache would run without waiting on a real clock.
//!
//! Virtual time is milliseconds since some clock-defined origin. Unlike a
//! plain monotonic instant, a [`VirtualTime`] value that flows through an
//! entry's payload sometimes carries its sign as data (see
//! `entry::Payload::last_read_timestamp`): a negative value means "known
//! clean as of this magnitude of time", not "before the origin". `Clock`
//! itself always hands out non-negative values from [`Clock::now`].

use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, Instant},
};

/// Milliseconds on the cache's virtual clock.
pub type VirtualTime = i64;

/// Abstracts real time so the engine can be driven by a scaled or
/// manually-advanced clock in tests.
///
/// Mirrors the workspace convention of a `Runtime`-style trait injected
/// everywhere time matters, rather than calling `Instant::now()`/
/// `thread::sleep` directly from engine code.
pub trait Clock: Send + Sync + 'static {
    /// The current virtual time. Always non-negative and non-decreasing.
    fn now(&self) -> VirtualTime;

    /// The virtual duration between two virtual timestamps, clamped to
    /// zero if `later` is not after `earlier` (callers treat a negative
    /// gap as a logic error rather than propagating it).
    fn gap(&self, earlier: VirtualTime, later: VirtualTime) -> Duration {
        if later <= earlier {
            Duration::ZERO
        } else {
            Duration::from_millis((later - earlier) as u64)
        }
    }

    /// Adds a real/virtual duration to a virtual timestamp.
    fn add(&self, t: VirtualTime, dt: Duration) -> VirtualTime {
        t.saturating_add(dt.as_millis() as i64)
    }

    /// Converts a virtual duration into the real duration a caller should
    /// actually wait to observe that much virtual time pass, given the
    /// clock's time factor.
    fn real_interval(&self, dt: Duration) -> Duration;

    /// Blocks the calling (worker) thread for approximately `dt` of virtual
    /// time, per `real_interval`.
    fn sleep(&self, dt: Duration) {
        std::thread::sleep(self.real_interval(dt));
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> VirtualTime {
        (**self).now()
    }

    fn gap(&self, earlier: VirtualTime, later: VirtualTime) -> Duration {
        (**self).gap(earlier, later)
    }

    fn add(&self, t: VirtualTime, dt: Duration) -> VirtualTime {
        (**self).add(t, dt)
    }

    fn real_interval(&self, dt: Duration) -> Duration {
        (**self).real_interval(dt)
    }

    fn sleep(&self, dt: Duration) {
        (**self).sleep(dt)
    }
}

/// Production clock: real wall-clock time, optionally sped up or slowed
/// down by `time_factor` (virtual milliseconds per real millisecond).
#[derive(Clone)]
pub struct SystemClock {
    start: Instant,
    start_virtual: VirtualTime,
    time_factor: f64,
}

impl fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemClock")
            .field("time_factor", &self.time_factor)
            .finish()
    }
}

impl SystemClock {
    /// A clock where virtual time advances in lockstep with real time.
    pub fn new() -> Self {
        Self::with_time_factor(1.0)
    }

    /// A clock where `time_factor` virtual milliseconds pass per real
    /// millisecond. Values greater than 1.0 make configured cache timings
    /// elapse faster than real time; useful for accelerating soak tests
    /// without touching the engine's timing logic.
    pub fn with_time_factor(time_factor: f64) -> Self {
        assert!(time_factor > 0.0, "time_factor must be positive");
        Self {
            start: Instant::now(),
            start_virtual: 1,
            time_factor,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> VirtualTime {
        let elapsed = self.start.elapsed().as_secs_f64() * self.time_factor;
        self.start_virtual.saturating_add((elapsed * 1000.0) as i64)
    }

    fn real_interval(&self, dt: Duration) -> Duration {
        Duration::from_secs_f64(dt.as_secs_f64() / self.time_factor)
    }
}

/// A clock whose time only moves when a test explicitly advances it.
///
/// Unlike [`SystemClock`], `sleep` never blocks: tests that exercise
/// decision logic directly (not through the worker threads) want to
/// simulate the passage of time without actually waiting for it.
#[derive(Clone)]
pub struct ManualClock {
    now: std::sync::Arc<AtomicI64>,
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now.load(Ordering::SeqCst))
            .finish()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(start: VirtualTime) -> Self {
        Self {
            now: std::sync::Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn advance(&self, dt: Duration) {
        self.now.fetch_add(dt.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, t: VirtualTime) {
        self.now.store(t, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> VirtualTime {
        self.now.load(Ordering::SeqCst)
    }

    fn real_interval(&self, _dt: Duration) -> Duration {
        Duration::ZERO
    }

    fn sleep(&self, _dt: Duration) {
        // Intentionally does not block: see struct docs.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_explicitly() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        assert_eq!(clock.gap(t0, t0), Duration::ZERO);
        clock.advance(Duration::from_millis(50));
        assert_eq!(clock.gap(t0, clock.now()), Duration::from_millis(50));
    }

    #[test]
    fn gap_clamps_to_zero_when_out_of_order() {
        let clock = ManualClock::new();
        assert_eq!(clock.gap(100, 50), Duration::ZERO);
    }

    #[test]
    fn system_clock_advances_with_real_time() {
        let clock = SystemClock::new();
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.now() > t0);
    }
}
