//! Cheap atomic counters plus a max-age-cached snapshot for `getStatus`.
//!
//! This is deliberately minimal: a rich, human-facing reporting
//! subsystem (JMX beans, formatted tables) is an explicit external
//! collaborator and out of scope here.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::clock::{Clock, VirtualTime};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatus {
    pub entry_count: u64,
    pub initial_reads: u64,
    pub resync_reads: u64,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
    pub evictions: u64,
    pub expiries: u64,
    pub removals: u64,
    pub taken_at: VirtualTime,
}

/// Atomic counters updated by the worker loops without any lock.
#[derive(Default)]
pub struct StatsCounters {
    pub initial_reads: AtomicU64,
    pub resync_reads: AtomicU64,
    pub writes_succeeded: AtomicU64,
    pub writes_failed: AtomicU64,
    pub evictions: AtomicU64,
    pub expiries: AtomicU64,
    pub removals: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, entry_count: u64, taken_at: VirtualTime) -> CacheStatus {
        CacheStatus {
            entry_count,
            initial_reads: self.initial_reads.load(Ordering::Relaxed),
            resync_reads: self.resync_reads.load(Ordering::Relaxed),
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expiries: self.expiries.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            taken_at,
        }
    }
}

/// Caches a [`CacheStatus`] snapshot for up to `max_age` before recomputing
/// it, matching `getStatus(maxAgeMs)`'s caller-tunable staleness budget.
pub struct StatusCache {
    last: Mutex<Option<CacheStatus>>,
    last_taken_real: AtomicI64,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
            last_taken_real: AtomicI64::new(i64::MIN),
        }
    }

    pub fn get<C: Clock>(
        &self,
        clock: &C,
        counters: &StatsCounters,
        entry_count: u64,
        max_age: std::time::Duration,
    ) -> CacheStatus {
        let now = clock.now();
        let max_age_ms = max_age.as_millis() as i64;
        let mut last = self.last.lock();
        if let Some(status) = *last {
            if now.saturating_sub(status.taken_at) <= max_age_ms {
                return status;
            }
        }
        let fresh = counters.snapshot(entry_count, now);
        *last = Some(fresh);
        self.last_taken_real.store(now, Ordering::Relaxed);
        fresh
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[test]
    fn snapshot_is_reused_within_max_age() {
        let clock = ManualClock::new();
        let counters = StatsCounters::new();
        let cache = StatusCache::new();

        let first = cache.get(&clock, &counters, 5, Duration::from_millis(100));
        counters.evictions.fetch_add(1, Ordering::Relaxed);
        clock.advance(Duration::from_millis(10));
        let second = cache.get(&clock, &counters, 5, Duration::from_millis(100));
        assert_eq!(first, second);
        assert_eq!(second.evictions, 0);
    }

    #[test]
    fn snapshot_refreshes_past_max_age() {
        let clock = ManualClock::new();
        let counters = StatsCounters::new();
        let cache = StatusCache::new();

        let _ = cache.get(&clock, &counters, 5, Duration::from_millis(10));
        counters.evictions.fetch_add(1, Ordering::Relaxed);
        clock.advance(Duration::from_millis(20));
        let refreshed = cache.get(&clock, &counters, 5, Duration::from_millis(10));
        assert_eq!(refreshed.evictions, 1);
    }
}
