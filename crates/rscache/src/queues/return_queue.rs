//! The return-queue worker (§4.5): the long-dwell holding queue an entry
//! sits in between full cycles, deciding whether it goes back to the
//! front (main + maybe read) or expires out of the cache entirely.

use std::{sync::atomic::Ordering, sync::Arc};

use crossbeam_channel::RecvTimeoutError;

use crate::{
    adapter::StorageAdapter,
    clock::Clock,
    core::CacheCore,
    decisions::{CachePolicy, ReturnQueueOutcome},
    entry::{Entry, ReadStatus},
    updates::{self, ResetReason},
};

pub fn run<A, P>(core: Arc<CacheCore<A, P>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    loop {
        let entry = match core.queues.return_rx.recv_timeout(core.config.max_sleep_time) {
            Ok(entry) => entry,
            Err(RecvTimeoutError::Timeout) => {
                if core.stopping.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        process_one(&core, entry);
        if core.stopping.load(Ordering::Acquire) && core.queues.return_rx.is_empty() {
            break;
        }
    }
}

fn process_one<A, P>(core: &Arc<CacheCore<A, P>>, entry: Arc<Entry<A>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    loop {
        let now = core.clock.now();
        let cache_until = {
            let payload = entry.read();
            if payload.read_status == ReadStatus::RemovedFromCache {
                return;
            }
            core.clock.add(payload.in_queue_since, core.config.return_queue_cache_time_min)
        };

        let flushing = core.is_flushing_or_shutting_down();
        if !flushing && cache_until > now {
            let wait = core.clock.gap(now, cache_until).min(core.config.max_sleep_time);
            core.clock.sleep(wait);
            if core.stopping.load(Ordering::Acquire) {
                return;
            }
            continue;
        }
        break;
    }

    process_decision(core, entry);
}

fn process_decision<A, P>(core: &Arc<CacheCore<A, P>>, entry: Arc<Entry<A>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let now = core.clock.now();
    let last_read = entry.last_read_timestamp();
    let main_queue_within_target = core.store.mapping_count() <= core.config.main_queue_max_target_size;
    let flushing = core.is_flushing_or_shutting_down();

    let (decision, untouched) = {
        let payload = entry.read();
        let last_write = payload.last_write_timestamp;
        let touched_since_main_queue = last_read > 0 || last_write > 0;
        // A positive magnitude means "touched at this virtual time"; a
        // negative one means "known clean as of this magnitude". Either
        // way the gap to `now` is measured from whichever magnitude is
        // more recent.
        let untouched = core.clock.gap(last_read.abs().max(last_write.abs()), now);
        let decision = core.policy.return_queue_decision(
            &payload,
            &core.config,
            touched_since_main_queue,
            untouched,
            main_queue_within_target,
            flushing,
        );
        (decision, untouched)
    };

    bucket_for_monitoring(core, &entry, untouched);

    match decision.outcome {
        ReturnQueueOutcome::DoNothing => {}
        ReturnQueueOutcome::RemoveFromCache => {
            core.store.remove_and_finalize(&entry.key, &entry);
            crate::metrics::log_eviction("return_queue_remove");
        }
        ReturnQueueOutcome::ExpireFromCache => {
            core.store.remove_and_finalize(&entry.key, &entry);
            crate::metrics::log_expiry("return_queue_expire");
        }
        ReturnQueueOutcome::ReturnQueue => {
            requeue_return(core, &entry, decision.stop_collecting_updates, now);
        }
        ReturnQueueOutcome::MainQueueNoResync => {
            requeue_main(core, &entry, decision.stop_collecting_updates, now, false);
        }
        ReturnQueueOutcome::MainQueuePlusResync => {
            requeue_main(core, &entry, decision.stop_collecting_updates, now, true);
        }
    }
}

fn requeue_return<A, P>(core: &Arc<CacheCore<A, P>>, entry: &Arc<Entry<A>>, stop_collecting: bool, now: i64)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let mut payload = entry.write();
    payload.return_queue_requeues += 1;
    payload.in_queue_since = now;
    if stop_collecting {
        updates::reset(&mut payload, ResetReason::ReturnQueueDecision, Some(false));
    }
    drop(payload);
    core.queues.enqueue_return(entry.clone());
}

fn requeue_main<A, P>(
    core: &Arc<CacheCore<A, P>>,
    entry: &Arc<Entry<A>>,
    stop_collecting: bool,
    now: i64,
    resync: bool,
)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let mut payload = entry.write();
    payload.in_queue_since = now;
    payload.return_queue_requeues = 0;
    if stop_collecting {
        updates::reset(&mut payload, ResetReason::ReturnQueueDecision, Some(false));
    }
    if resync {
        payload.read_status = ReadStatus::DataReadyResyncPending;
    }
    drop(payload);
    core.queues.enqueue_main(entry.clone());
    if resync {
        core.queues.enqueue_read(entry.clone());
    }
}

fn bucket_for_monitoring<A, P>(core: &Arc<CacheCore<A, P>>, entry: &Arc<Entry<A>>, untouched: std::time::Duration)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let payload = entry.read();
    let cycle_bucket = core.config.full_cycle_count_thresholds.bucket_of(payload.full_cycles_completed);
    let time_bucket = core
        .config
        .time_since_access_thresholds_ms
        .bucket_of(untouched.as_millis() as i64);
    drop(payload);
    tracing::trace!(cycle_bucket, time_bucket, "return queue monitoring buckets");
}
