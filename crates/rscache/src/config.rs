//! Cache tuning knobs.
//!
//! `CacheConfig` is a plain, directly-constructible struct — there is no
//! parser here. Parsing a config file or environment into one of these is
//! the caller's job (an external collaborator, per the engine's scope);
//! this module only defines the shape and its defaults.

use std::time::Duration;

/// What to do when the initial read for a brand new entry fails
/// permanently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialReadFailedFinalAction {
    /// Remove the entry from the cache; future accesses start fresh.
    RemoveFromCache,
    /// Keep the entry around in `READ_FAILED_FINAL`; every access observes
    /// the failure until something else removes it.
    KeepAndThrow,
}

/// What to do when a background resync read completes successfully but is
/// no longer mergeable (collected updates were already reset/dropped).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncTooLateAction {
    SetDirectly,
    MergeData,
    ClearReadPendingStatus,
    DoNothing,
    RemoveFromCache,
}

/// What to do when a background resync read fails permanently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncFailedFinalAction {
    RemoveFromCache,
    StopCollectingUpdates,
    KeepCollectingUpdates,
}

/// Ascending bucket boundaries used to classify a terminal outcome by a
/// counter (full cycles completed) or a duration (time since last access).
/// Exactly 5 elements, smallest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitoringThresholds<T> {
    pub boundaries: [T; 5],
}

impl<T: Ord + Copy> MonitoringThresholds<T> {
    /// Index of the first boundary this value does not exceed, or 5 if it
    /// exceeds all of them.
    pub fn bucket_of(&self, value: T) -> usize {
        self.boundaries
            .iter()
            .position(|boundary| value <= *boundary)
            .unwrap_or(self.boundaries.len())
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    // --- Sizes ---
    /// Soft target for the number of entries the cache tries to stay near.
    pub main_queue_max_target_size: usize,
    /// Hard admission limit; new entries are refused with `CacheFull` at
    /// or above this count. Defaults to `2 * main_queue_max_target_size`.
    pub max_cache_elements_hard_limit: usize,
    /// Maximum number of in-memory updates collected per entry while a
    /// resync is outstanding.
    pub max_updates_to_collect: usize,

    // --- Timings (virtual) ---
    /// How long a fresh entry is held in the main queue before it is
    /// eligible to be written out and moved to the return queue.
    pub main_queue_cache_time: Duration,
    /// The minimum time an entry must spend in the main queue before the
    /// worker will skip the rest of `main_queue_cache_time` under size
    /// pressure. Defaults to a tenth of `main_queue_cache_time`.
    pub main_queue_cache_time_min: Duration,
    /// The minimum time an entry must spend in the return queue before
    /// being reconsidered, outside of flush/shutdown.
    pub return_queue_cache_time_min: Duration,
    /// How long an untouched, successfully-written entry is kept around
    /// (and resynced) before it is expired for inactivity.
    pub untouched_item_cache_expiration_delay: Duration,
    /// Upper bound on any single wait a worker performs before
    /// re-examining its state (so flush/shutdown are observed promptly).
    pub max_sleep_time: Duration,
    /// How long the read queue worker waits to batch additional entries
    /// before invoking the batch-delay-expired hook.
    pub read_queue_batching_delay: Duration,
    /// Same as `read_queue_batching_delay` for the write queue.
    pub write_queue_batching_delay: Duration,

    // --- Retries ---
    pub read_failure_max_retry_count: u32,
    pub write_failure_max_retry_count: u32,
    pub full_cache_cycle_failure_max_retry_count: u32,
    pub return_queue_max_requeue_count: u32,
    /// Retry budget for the access API when it repeatedly observes an
    /// entry transition to `REMOVED_FROM_CACHE` out from under it.
    pub max_cache_removed_retries: u32,

    // --- Policy flags/enums ---
    pub can_merge_writes: bool,
    pub initial_read_failed_final_action: InitialReadFailedFinalAction,
    pub resync_too_late_action: ResyncTooLateAction,
    pub resync_failed_final_action: ResyncFailedFinalAction,
    pub allow_data_writing_after_resync_failed_final: bool,
    pub allow_data_reading_after_resync_failed_final: bool,
    pub allow_updates_collection_for_multiple_full_cycles: bool,
    pub accept_out_of_order_reads: bool,

    // --- Monitoring thresholds ---
    pub full_cycle_count_thresholds: MonitoringThresholds<u64>,
    pub time_since_access_thresholds_ms: MonitoringThresholds<i64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let main_queue_max_target_size = 10_000;
        let main_queue_cache_time = Duration::from_secs(60);
        Self {
            main_queue_max_target_size,
            max_cache_elements_hard_limit: main_queue_max_target_size * 2,
            max_updates_to_collect: 100,

            main_queue_cache_time,
            main_queue_cache_time_min: main_queue_cache_time / 10,
            return_queue_cache_time_min: Duration::from_secs(1),
            untouched_item_cache_expiration_delay: Duration::from_secs(3600),
            max_sleep_time: Duration::from_millis(500),
            read_queue_batching_delay: Duration::ZERO,
            write_queue_batching_delay: Duration::ZERO,

            read_failure_max_retry_count: 3,
            write_failure_max_retry_count: 3,
            full_cache_cycle_failure_max_retry_count: 3,
            return_queue_max_requeue_count: 3,
            max_cache_removed_retries: 3,

            can_merge_writes: false,
            initial_read_failed_final_action: InitialReadFailedFinalAction::RemoveFromCache,
            resync_too_late_action: ResyncTooLateAction::SetDirectly,
            resync_failed_final_action: ResyncFailedFinalAction::RemoveFromCache,
            allow_data_writing_after_resync_failed_final: false,
            allow_data_reading_after_resync_failed_final: false,
            allow_updates_collection_for_multiple_full_cycles: false,
            accept_out_of_order_reads: false,

            full_cycle_count_thresholds: MonitoringThresholds {
                boundaries: [1, 2, 5, 10, 25],
            },
            time_since_access_thresholds_ms: MonitoringThresholds {
                boundaries: [1_000, 10_000, 60_000, 600_000, 3_600_000],
            },
        }
    }
}
