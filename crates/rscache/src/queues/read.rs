//! The read-queue worker (§4.2): initial loads and background resync
//! reads share one queue and one decision tree keyed off read status.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::RecvTimeoutError;
use rscache_errors::capture_source;

use crate::{
    adapter::StorageAdapter,
    clock::Clock,
    config::{InitialReadFailedFinalAction, ResyncFailedFinalAction},
    core::CacheCore,
    decisions::{CachePolicy, MergeDecision, ReadQueueAction, RetryDecision},
    entry::{Entry, ReadStatus},
    executor,
    updates::{self, ResetReason},
};
use std::sync::atomic::Ordering;

pub fn run<A, P>(core: Arc<CacheCore<A, P>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    loop {
        let entry = match core.queues.read_rx.recv_timeout(core.config.max_sleep_time) {
            Ok(entry) => entry,
            Err(RecvTimeoutError::Timeout) => {
                if core.stopping.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if core.config.read_queue_batching_delay > Duration::ZERO {
            let deadline = core.clock.add(core.clock.now(), core.config.read_queue_batching_delay);
            let mut batch = vec![entry];
            while core.clock.now() < deadline {
                match core.queues.read_rx.try_recv() {
                    Ok(more) => batch.push(more),
                    Err(_) => break,
                }
            }
            tracing::debug!(batch_len = batch.len(), "read batch delay expired");
            for entry in batch {
                process_one(&core, entry);
            }
        } else {
            process_one(&core, entry);
        }

        if core.stopping.load(Ordering::Acquire) && core.queues.read_rx.is_empty() {
            break;
        }
    }
}

fn process_one<A, P>(core: &Arc<CacheCore<A, P>>, entry: Arc<Entry<A>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let action = {
        let payload = entry.read();
        core.policy.read_queue_action(&payload)
    };

    let is_refresh = match action {
        ReadQueueAction::DoNothing => {
            tracing::warn!("read queue encountered entry in unexpected state");
            return;
        }
        ReadQueueAction::SetFinalFailedReadStatus => {
            handle_failure(core, &entry, "policy forced final failed status".into());
            return;
        }
        ReadQueueAction::InitialRead => false,
        ReadQueueAction::RefreshRead => true,
    };

    let key = entry.key.clone();
    let core_for_job = core.clone();
    let result = executor::run(core.read_executor.as_ref(), move || core_for_job.adapter.read(&key));

    match result {
        Ok(raw) => handle_success(core, &entry, raw, is_refresh),
        Err(err) => handle_failure(core, &entry, capture_source(err.as_ref())),
    }
}

fn handle_success<A, P>(core: &Arc<CacheCore<A, P>>, entry: &Arc<Entry<A>>, raw: A::StorageRead, is_refresh: bool)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    if is_refresh {
        core.stats.resync_reads.fetch_add(1, Ordering::Relaxed);
    } else {
        core.stats.initial_reads.fetch_add(1, Ordering::Relaxed);
    }

    let now = core.clock.now();
    let mut payload = entry.write();
    let decision = core.policy.merge_decision(&payload, &core.config);
    match decision {
        MergeDecision::SetDirectly => {
            payload.value = Some(core.adapter.to_cache_value(raw));
            updates::reset(&mut payload, ResetReason::StorageDataMerged, None);
            payload.read_status = ReadStatus::DataReady;
            payload.consecutive_read_failures = 0;
            payload.last_read_error = None;
            payload.last_synced_with_storage = now;
            drop(payload);
            entry.latch.open();
        }
        MergeDecision::MergeData => {
            let base = core.adapter.to_cache_value(raw);
            let merged = match payload.collected_updates.take() {
                Some(list) => updates::replay_updates(&core.adapter, base, &list),
                None => base,
            };
            payload.value = Some(merged);
            updates::reset(&mut payload, ResetReason::StorageDataMerged, None);
            payload.read_status = ReadStatus::DataReady;
            payload.consecutive_read_failures = 0;
            payload.last_read_error = None;
            payload.last_synced_with_storage = now;
            drop(payload);
            entry.latch.open();
        }
        MergeDecision::ClearReadPendingStatus => {
            crate::metrics::log_resync_too_late();
            match payload.read_status {
                ReadStatus::NotReadYet => payload.read_status = ReadStatus::ReadFailedFinal,
                ReadStatus::DataReadyResyncPending => payload.read_status = ReadStatus::DataReadyResyncFailedFinal,
                _ => {}
            }
            drop(payload);
            entry.latch.open();
        }
        MergeDecision::DoNothing => {
            tracing::warn!("read success merge decision was DoNothing; latch left closed");
        }
        MergeDecision::RemoveFromCache => {
            drop(payload);
            core.store.remove_and_finalize(&entry.key, entry);
        }
    }
}

fn handle_failure<A, P>(core: &Arc<CacheCore<A, P>>, entry: &Arc<Entry<A>>, error_text: String)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let mut payload = entry.write();
    payload.consecutive_read_failures += 1;
    payload.last_read_error = Some(error_text);
    let decision = core.policy.read_retry_decision(&payload, &core.config);
    match decision {
        RetryDecision::Retry => {
            drop(payload);
            core.queues.enqueue_read(entry.clone());
        }
        RetryDecision::NoRetrySetFinalFailedStatus => {
            crate::metrics::log_retry_exhausted("read");
            match payload.read_status {
                ReadStatus::NotReadYet => match core.config.initial_read_failed_final_action {
                    InitialReadFailedFinalAction::RemoveFromCache => {
                        drop(payload);
                        core.store.remove_and_finalize(&entry.key, entry);
                        return;
                    }
                    InitialReadFailedFinalAction::KeepAndThrow => {
                        payload.read_status = ReadStatus::ReadFailedFinal;
                    }
                },
                ReadStatus::DataReadyResyncPending => match core.config.resync_failed_final_action {
                    ResyncFailedFinalAction::RemoveFromCache => {
                        drop(payload);
                        core.store.remove_and_finalize(&entry.key, entry);
                        return;
                    }
                    ResyncFailedFinalAction::StopCollectingUpdates => {
                        payload.read_status = ReadStatus::DataReadyResyncFailedFinal;
                        updates::reset(&mut payload, ResetReason::ReadFailedFinalDecision, Some(false));
                    }
                    ResyncFailedFinalAction::KeepCollectingUpdates => {
                        payload.read_status = ReadStatus::DataReadyResyncFailedFinal;
                    }
                },
                _ => {}
            }
            drop(payload);
            entry.latch.open();
        }
        RetryDecision::DoNothing => {
            tracing::warn!("read failure decision was DoNothing");
        }
        RetryDecision::RemoveFromCache => {
            drop(payload);
            core.store.remove_and_finalize(&entry.key, entry);
        }
    }
}
