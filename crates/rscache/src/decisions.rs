//! The decision SPI surface: every branch point a worker or the access API
//! consults is named here as a method on [`CachePolicy`], with a default
//! implementation matching the engine's documented default behaviour.
//! Adapters that need non-default eviction/retry behaviour implement this
//! trait themselves instead of overriding individual hooks piecemeal.

use std::time::Duration;

use rscache_errors::CacheError;

use crate::{
    adapter::StorageAdapter,
    config::{CacheConfig, ResyncTooLateAction},
    entry::{Payload, ReadStatus, WriteStatus},
    updates,
};

/// What the read-queue success handler should do with a freshly read
/// storage value relative to whatever updates were collected meanwhile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeDecision {
    SetDirectly,
    MergeData,
    ClearReadPendingStatus,
    DoNothing,
    RemoveFromCache,
}

/// Shared shape of the read and write failure-handler retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetrySetFinalFailedStatus,
    DoNothing,
    RemoveFromCache,
}

/// What the read-queue worker should do with a pulled entry before any
/// I/O happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadQueueAction {
    DoNothing,
    InitialRead,
    RefreshRead,
    SetFinalFailedReadStatus,
}

/// What the write-queue worker should do with a pulled write task before
/// any I/O happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteQueueDecision {
    Write,
    DoNothing,
    SetFinalFailedWriteStatus,
}

/// The main-queue worker's per-cycle outcome, ordered by "worst failure
/// rating" — declaration order is the rating order, ascending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MainQueueOutcome {
    ReturnQueue,
    ReturnQueueKeepFullCycleFailureCount,
    ReturnQueueNoWrite,
    MainQueue,
    ExpireFromCache,
    RemoveFromCache,
}

impl MainQueueOutcome {
    /// Combines a read-status outcome and a write-status outcome into the
    /// single decision the worker acts on: whichever carries the worse
    /// rating wins.
    pub fn worst_of(a: MainQueueOutcome, b: MainQueueOutcome) -> MainQueueOutcome {
        a.max(b)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnQueueOutcome {
    MainQueuePlusResync,
    MainQueueNoResync,
    ExpireFromCache,
    ReturnQueue,
    RemoveFromCache,
    DoNothing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReturnQueueDecision {
    pub outcome: ReturnQueueOutcome,
    pub stop_collecting_updates: bool,
}

/// The access API's per-call decision once the appropriate lock is held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    WaitForLatch,
    RetryOuterLoop,
    ReturnException(CacheError),
    ValueReturned,
}

/// Whether a payload's read status currently reflects a failure budget
/// that has been exceeded for the full-cycle counter.
fn full_cycles_exhausted<A: StorageAdapter>(payload: &Payload<A>, config: &CacheConfig) -> bool {
    payload.full_cycle_failures >= config.full_cache_cycle_failure_max_retry_count
        || !updates::is_merge_possible(payload)
}

pub trait CachePolicy<A: StorageAdapter>: Send + Sync + 'static {
    /// §4.2 read-queue success handler merge decision.
    fn merge_decision(&self, payload: &Payload<A>, config: &CacheConfig) -> MergeDecision {
        if payload.read_status == ReadStatus::NotReadYet {
            return MergeDecision::SetDirectly;
        }
        if payload.collect_updates && updates::is_merge_possible(payload) {
            return MergeDecision::MergeData;
        }
        match config.resync_too_late_action {
            ResyncTooLateAction::SetDirectly => MergeDecision::SetDirectly,
            ResyncTooLateAction::MergeData => MergeDecision::MergeData,
            ResyncTooLateAction::ClearReadPendingStatus => MergeDecision::ClearReadPendingStatus,
            ResyncTooLateAction::DoNothing => MergeDecision::DoNothing,
            ResyncTooLateAction::RemoveFromCache => MergeDecision::RemoveFromCache,
        }
    }

    /// §4.2 read-queue failure handler retry decision.
    fn read_retry_decision(&self, payload: &Payload<A>, config: &CacheConfig) -> RetryDecision {
        if payload.consecutive_read_failures > config.read_failure_max_retry_count {
            RetryDecision::NoRetrySetFinalFailedStatus
        } else {
            RetryDecision::Retry
        }
    }

    /// §4.4 write-queue failure handler retry decision.
    fn write_retry_decision(&self, payload: &Payload<A>, config: &CacheConfig) -> RetryDecision {
        if payload.consecutive_write_failures > config.write_failure_max_retry_count {
            RetryDecision::NoRetrySetFinalFailedStatus
        } else {
            RetryDecision::Retry
        }
    }

    /// §4.2 pre-I/O read-queue action.
    fn read_queue_action(&self, payload: &Payload<A>) -> ReadQueueAction {
        match payload.read_status {
            ReadStatus::NotReadYet => ReadQueueAction::InitialRead,
            ReadStatus::DataReadyResyncPending => ReadQueueAction::RefreshRead,
            _ => ReadQueueAction::DoNothing,
        }
    }

    /// §4.4 pre-I/O write-queue decision.
    fn write_queue_decision(&self, _payload: &Payload<A>) -> WriteQueueDecision {
        WriteQueueDecision::Write
    }

    /// §4.3 read-status half of the main-queue processing decision.
    fn main_queue_read_outcome(&self, payload: &Payload<A>, config: &CacheConfig) -> MainQueueOutcome {
        match payload.read_status {
            ReadStatus::ReadFailedFinal | ReadStatus::NotReadYet => MainQueueOutcome::RemoveFromCache,
            ReadStatus::RemovedFromCache => MainQueueOutcome::ExpireFromCache,
            ReadStatus::DataReady => MainQueueOutcome::ReturnQueue,
            ReadStatus::DataReadyResyncPending => {
                if full_cycles_exhausted(payload, config) {
                    if config.allow_data_writing_after_resync_failed_final {
                        MainQueueOutcome::ReturnQueue
                    } else {
                        MainQueueOutcome::RemoveFromCache
                    }
                } else {
                    MainQueueOutcome::MainQueue
                }
            }
            ReadStatus::DataReadyResyncFailedFinal => {
                if full_cycles_exhausted(payload, config) {
                    if config.allow_data_writing_after_resync_failed_final {
                        MainQueueOutcome::ReturnQueue
                    } else {
                        MainQueueOutcome::RemoveFromCache
                    }
                } else {
                    MainQueueOutcome::ReturnQueueNoWrite
                }
            }
        }
    }

    /// §4.3 write-status half of the main-queue processing decision.
    fn main_queue_write_outcome(&self, payload: &Payload<A>, config: &CacheConfig) -> MainQueueOutcome {
        match payload.write_status {
            WriteStatus::WritePending => {
                if payload.full_cycle_failures >= config.full_cache_cycle_failure_max_retry_count {
                    MainQueueOutcome::RemoveFromCache
                } else {
                    MainQueueOutcome::ReturnQueueNoWrite
                }
            }
            WriteStatus::WriteFailedFinal => {
                if payload.full_cycle_failures >= config.full_cache_cycle_failure_max_retry_count {
                    MainQueueOutcome::RemoveFromCache
                } else {
                    MainQueueOutcome::ReturnQueueKeepFullCycleFailureCount
                }
            }
            WriteStatus::WriteSuccess | WriteStatus::NoWriteRequestedYet => MainQueueOutcome::ReturnQueue,
            WriteStatus::RemovedFromCache => MainQueueOutcome::ExpireFromCache,
        }
    }

    /// §4.5 return-queue decision. `touched_since_main_queue` is
    /// `lastRead > 0 OR lastWrite > 0`; `untouched` is the gap since the
    /// more recent of the two magnitudes.
    fn return_queue_decision(
        &self,
        payload: &Payload<A>,
        config: &CacheConfig,
        touched_since_main_queue: bool,
        untouched: Duration,
        main_queue_within_target: bool,
        flushing: bool,
    ) -> ReturnQueueDecision {
        use ReturnQueueOutcome::*;
        match payload.write_status {
            WriteStatus::WritePending => {
                if payload.return_queue_requeues > config.return_queue_max_requeue_count {
                    return ReturnQueueDecision {
                        outcome: MainQueueNoResync,
                        stop_collecting_updates: true,
                    };
                }
                ReturnQueueDecision {
                    outcome: ReturnQueue,
                    stop_collecting_updates: false,
                }
            }
            WriteStatus::WriteFailedFinal => ReturnQueueDecision {
                outcome: MainQueueNoResync,
                stop_collecting_updates: true,
            },
            WriteStatus::NoWriteRequestedYet | WriteStatus::WriteSuccess => {
                let may_attempt_resync = !touched_since_main_queue
                    && !flushing
                    && untouched < config.untouched_item_cache_expiration_delay
                    && main_queue_within_target;
                if !may_attempt_resync {
                    return ReturnQueueDecision {
                        outcome: ExpireFromCache,
                        stop_collecting_updates: true,
                    };
                }
                let merge_possible = updates::is_merge_possible(payload);
                match payload.read_status {
                    ReadStatus::NotReadYet | ReadStatus::DataReadyResyncPending => ReturnQueueDecision {
                        outcome: MainQueueNoResync,
                        stop_collecting_updates: !merge_possible,
                    },
                    _ => ReturnQueueDecision {
                        outcome: MainQueuePlusResync,
                        stop_collecting_updates: !merge_possible,
                    },
                }
            }
            WriteStatus::RemovedFromCache => ReturnQueueDecision {
                outcome: DoNothing,
                stop_collecting_updates: false,
            },
        }
    }

    /// §4.7 access-API read decision.
    fn read_access_decision(&self, payload: &Payload<A>, config: &CacheConfig) -> AccessDecision {
        match payload.read_status {
            ReadStatus::NotReadYet => AccessDecision::WaitForLatch,
            ReadStatus::RemovedFromCache => AccessDecision::RetryOuterLoop,
            ReadStatus::ReadFailedFinal => AccessDecision::ReturnException(
                CacheError::element_failed_loading(payload.consecutive_read_failures, payload.last_read_error.clone()),
            ),
            ReadStatus::DataReadyResyncFailedFinal => {
                if config.allow_data_reading_after_resync_failed_final {
                    AccessDecision::ValueReturned
                } else {
                    AccessDecision::ReturnException(CacheError::element_failed_resync(
                        payload.consecutive_read_failures,
                        payload.last_read_error.clone(),
                    ))
                }
            }
            ReadStatus::DataReady | ReadStatus::DataReadyResyncPending => AccessDecision::ValueReturned,
        }
    }

    /// §4.7 access-API write decision: read-status gating first, then the
    /// write-status-specific `allowDataWritingAfterResyncFailedFinal` gate.
    fn write_access_decision(&self, payload: &Payload<A>, config: &CacheConfig) -> AccessDecision {
        match self.read_access_decision(payload, config) {
            AccessDecision::ValueReturned => {}
            other => return other,
        }
        if payload.write_status == WriteStatus::WriteFailedFinal
            && !config.allow_data_writing_after_resync_failed_final
        {
            return AccessDecision::ReturnException(CacheError::element_failed_resync(
                payload.consecutive_write_failures,
                payload.last_write_error.clone(),
            ));
        }
        AccessDecision::ValueReturned
    }
}

/// The engine's built-in policy: every hook uses its documented default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCachePolicy;

impl<A: StorageAdapter> CachePolicy<A> for DefaultCachePolicy {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    struct Dummy;
    impl StorageAdapter for Dummy {
        type Key = u64;
        type CacheValue = String;
        type StorageRead = String;
        type StorageWrite = String;
        type InternalUpdate = String;
        type ExternalUpdate = String;
        type ReturnValue = String;

        fn read(&self, _key: &u64) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok(String::new())
        }
        fn write(
            &self,
            _key: &u64,
            _value: &String,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
        fn to_cache_value(&self, read: String) -> String {
            read
        }
        fn to_storage_write(&self, value: &String) -> String {
            value.clone()
        }
        fn apply_internal_update(&self, current: &String, update: &String) -> (String, String) {
            (format!("{current}{update}"), update.clone())
        }
        fn apply_external_update(&self, current: &String, update: &String) -> String {
            format!("{current}{update}")
        }
        fn split_for_write(
            &self,
            _key: &u64,
            value: &String,
            previous_failed_write: Option<&String>,
        ) -> (String, Option<String>) {
            match previous_failed_write {
                Some(prior) => (value.clone(), Some(prior.clone())),
                None => (value.clone(), Some(value.clone())),
            }
        }
    }

    fn payload_with(read: ReadStatus, write: WriteStatus) -> Payload<Dummy> {
        Payload {
            value: None,
            read_status: read,
            write_status: write,
            last_write_timestamp: 0,
            in_queue_since: 0,
            last_synced_with_storage: 0,
            consecutive_read_failures: 0,
            consecutive_write_failures: 0,
            full_cycle_failures: 0,
            return_queue_requeues: 0,
            full_cycles_completed: 0,
            collect_updates: true,
            collected_updates: None,
            previous_failed_write_data: None,
            last_read_error: None,
            last_write_error: None,
        }
    }

    #[test]
    fn main_queue_outcome_ordering_is_worst_wins() {
        assert_eq!(
            MainQueueOutcome::worst_of(MainQueueOutcome::ReturnQueue, MainQueueOutcome::RemoveFromCache),
            MainQueueOutcome::RemoveFromCache
        );
        assert_eq!(
            MainQueueOutcome::worst_of(MainQueueOutcome::MainQueue, MainQueueOutcome::ReturnQueue),
            MainQueueOutcome::MainQueue
        );
    }

    #[test]
    fn merge_decision_set_directly_for_fresh_entry() {
        let policy = DefaultCachePolicy;
        let payload = payload_with(ReadStatus::NotReadYet, WriteStatus::NoWriteRequestedYet);
        let config = CacheConfig::default();
        assert_eq!(policy.merge_decision(&payload, &config), MergeDecision::SetDirectly);
    }

    #[test]
    fn merge_decision_merges_when_collecting() {
        let policy = DefaultCachePolicy;
        let mut payload = payload_with(ReadStatus::DataReadyResyncPending, WriteStatus::NoWriteRequestedYet);
        payload.collect_updates = true;
        let config = CacheConfig::default();
        assert_eq!(policy.merge_decision(&payload, &config), MergeDecision::MergeData);
    }

    #[test]
    fn read_retry_decision_exhausts_after_limit() {
        let policy = DefaultCachePolicy;
        let mut config = CacheConfig::default();
        config.read_failure_max_retry_count = 2;
        let mut payload = payload_with(ReadStatus::NotReadYet, WriteStatus::NoWriteRequestedYet);
        payload.consecutive_read_failures = 2;
        assert_eq!(policy.read_retry_decision(&payload, &config), RetryDecision::Retry);
        payload.consecutive_read_failures = 3;
        assert_eq!(
            policy.read_retry_decision(&payload, &config),
            RetryDecision::NoRetrySetFinalFailedStatus
        );
    }

    #[test]
    fn main_queue_read_outcome_removes_on_failed_final() {
        let policy = DefaultCachePolicy;
        let config = CacheConfig::default();
        let payload = payload_with(ReadStatus::ReadFailedFinal, WriteStatus::NoWriteRequestedYet);
        assert_eq!(
            policy.main_queue_read_outcome(&payload, &config),
            MainQueueOutcome::RemoveFromCache
        );
    }

    #[test]
    fn write_access_decision_blocks_on_failed_final_by_default() {
        let policy = DefaultCachePolicy;
        let config = CacheConfig::default();
        let payload = payload_with(ReadStatus::DataReady, WriteStatus::WriteFailedFinal);
        assert!(matches!(
            policy.write_access_decision(&payload, &config),
            AccessDecision::ReturnException(_)
        ));
    }

    #[test]
    fn read_access_decision_waits_on_not_read_yet() {
        let policy = DefaultCachePolicy;
        let config = CacheConfig::default();
        let payload = payload_with(ReadStatus::NotReadYet, WriteStatus::NoWriteRequestedYet);
        assert_eq!(policy.read_access_decision(&payload, &config), AccessDecision::WaitForLatch);
    }
}
