//! Cache instrumentation: one small function per named measurement,
//! mirroring the shape of this workspace's `async_lru::metrics` module.
//! Not the out-of-scope "stats/status snapshot builder" — just the
//! counters/gauges/histograms the `metrics` crate facade forwards to
//! whatever recorder the binary installs.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub fn log_cache_hit(queue: &'static str) {
    counter!("rscache_access_total", "result" => "hit", "queue" => queue).increment(1);
}

pub fn log_cache_miss(queue: &'static str) {
    counter!("rscache_access_total", "result" => "miss", "queue" => queue).increment(1);
}

pub fn log_queue_depth(queue: &'static str, depth: usize) {
    gauge!("rscache_queue_depth", "queue" => queue).set(depth as f64);
}

pub fn log_entry_count(count: usize) {
    gauge!("rscache_entry_count").set(count as f64);
}

pub fn log_eviction(reason: &'static str) {
    counter!("rscache_evictions_total", "reason" => reason).increment(1);
}

pub fn log_expiry(reason: &'static str) {
    counter!("rscache_expiries_total", "reason" => reason).increment(1);
}

pub fn log_retry_exhausted(queue: &'static str) {
    counter!("rscache_retry_exhausted_total", "queue" => queue).increment(1);
}

pub fn log_full_cycle_completed() {
    counter!("rscache_full_cycles_completed_total").increment(1);
}

pub fn log_resync_too_late() {
    counter!("rscache_resync_too_late_total").increment(1);
}

pub fn log_update_collect_exception() {
    counter!("rscache_update_collect_exceptions_total").increment(1);
}

pub fn log_storage_call_duration(op: &'static str, duration: Duration) {
    histogram!("rscache_storage_call_seconds", "op" => op).record(duration.as_secs_f64());
}

pub fn log_cache_full_rejection() {
    counter!("rscache_admission_rejected_total").increment(1);
}
