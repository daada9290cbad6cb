//! The main-queue worker (§4.3): the central pacing loop. Holds each
//! entry for a target duration, emits at most one write per cycle, and
//! moves the entry on to the return queue.

use std::sync::{atomic::Ordering, Arc};

use crossbeam_channel::RecvTimeoutError;

use crate::{
    adapter::StorageAdapter,
    clock::Clock,
    config::CacheConfig,
    core::CacheCore,
    decisions::{CachePolicy, MainQueueOutcome},
    entry::{Entry, Payload},
    queues::WriteTask,
    updates::{self, ResetReason},
};

pub fn run<A, P>(core: Arc<CacheCore<A, P>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    loop {
        let entry = match core.queues.main_rx.recv_timeout(core.config.max_sleep_time) {
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
        if core.stopping.load(Ordering::Acquire) && core.queues.main_rx.is_empty() {
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
        let (cache_until, in_flight, in_queue_since) = {
            let payload = entry.read();
            let cache_until = core.clock.add(payload.in_queue_since, core.config.main_queue_cache_time);
            let in_flight = matches!(
                payload.read_status,
                crate::entry::ReadStatus::NotReadYet | crate::entry::ReadStatus::DataReadyResyncPending
            ) || payload.write_status == crate::entry::WriteStatus::WritePending;
            (cache_until, in_flight, payload.in_queue_since)
        };

        let bypass = core.is_flushing_or_shutting_down() && !in_flight;
        let over_target = core.store.mapping_count() > core.config.main_queue_max_target_size;
        let past_min_dwell = core.clock.gap(in_queue_since, now) > core.config.main_queue_cache_time_min;
        let skip_remaining_wait = over_target && past_min_dwell;

        if !bypass && cache_until > now && !skip_remaining_wait {
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
    let outcome = {
        let payload = entry.read();
        let read_outcome = core.policy.main_queue_read_outcome(&payload, &core.config);
        let write_outcome = core.policy.main_queue_write_outcome(&payload, &core.config);
        MainQueueOutcome::worst_of(read_outcome, write_outcome)
    };

    match outcome {
        MainQueueOutcome::RemoveFromCache => {
            tracing::info!("main queue removing entry after exhausted retries");
            core.store.remove_and_finalize(&entry.key, &entry);
            crate::metrics::log_eviction("main_queue_remove");
        }
        MainQueueOutcome::ExpireFromCache => {
            core.store.remove_and_finalize(&entry.key, &entry);
            crate::metrics::log_expiry("main_queue_expire");
        }
        MainQueueOutcome::MainQueue => {
            let mut payload = entry.write();
            payload.in_queue_since = core.clock.now();
            drop(payload);
            core.queues.enqueue_main(entry);
        }
        MainQueueOutcome::ReturnQueue
        | MainQueueOutcome::ReturnQueueNoWrite
        | MainQueueOutcome::ReturnQueueKeepFullCycleFailureCount => {
            process_return_family(core, entry, outcome);
        }
    }
}

fn process_return_family<A, P>(core: &Arc<CacheCore<A, P>>, entry: Arc<Entry<A>>, outcome: MainQueueOutcome)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let mut payload = entry.write();

    if outcome != MainQueueOutcome::ReturnQueueNoWrite {
        if let Some((new_value, write_data, contains_all_updates)) =
            compute_write(&core.adapter, &core.config, &entry.key, &mut payload)
        {
            payload.value = Some(new_value);
            payload.write_status = crate::entry::WriteStatus::WritePending;
            if contains_all_updates {
                let lw = payload.last_write_timestamp;
                payload.last_write_timestamp = -lw.abs();
                // The first full cycle always reopens collection; beyond
                // that, `allow_updates_collection_for_multiple_full_cycles`
                // decides whether it keeps reopening on every later cycle.
                let collect_after =
                    payload.full_cycles_completed == 0 || core.config.allow_updates_collection_for_multiple_full_cycles;
                updates::reset(&mut payload, ResetReason::FullWriteSent, Some(collect_after));
            }
            core.queues.enqueue_write(WriteTask {
                key: entry.key.clone(),
                entry: entry.clone(),
                write_data,
            });
        }
    }

    let all_ok = outcome == MainQueueOutcome::ReturnQueue;
    if all_ok {
        payload.full_cycle_failures = 0;
        payload.full_cycles_completed += 1;
        crate::metrics::log_full_cycle_completed();
    }
    // ReturnQueueNoWrite / ReturnQueueKeepFullCycleFailureCount: leave
    // full_cycle_failures untouched, it was already accounted for by
    // whichever status produced this outcome.
    payload.in_queue_since = core.clock.now();
    drop(payload);
    if all_ok {
        entry.mark_read_clean();
    }
    core.queues.enqueue_return(entry);
}

/// §4.3's `spiProcessSplitForWrite`: decides whether there is a write to
/// emit this cycle and produces it via the adapter's `split_for_write`.
fn compute_write<A: StorageAdapter>(
    adapter: &A,
    config: &CacheConfig,
    key: &A::Key,
    payload: &mut Payload<A>,
) -> Option<(A::CacheValue, A::StorageWrite, bool)> {
    let has_prior_failed = payload.previous_failed_write_data.is_some();

    if !has_prior_failed {
        if payload.last_write_timestamp <= 0 {
            return None;
        }
        let value = payload.value.clone()?;
        let (new_value, write_opt) = adapter.split_for_write(key, &value, None);
        return write_opt.map(|w| (new_value, w, true));
    }

    if config.can_merge_writes {
        let value = payload.value.clone()?;
        let prior = payload.previous_failed_write_data.take();
        let (new_value, write_opt) = adapter.split_for_write(key, &value, prior.as_ref());
        write_opt.map(|w| (new_value, w, true))
    } else {
        let prior = payload.previous_failed_write_data.take()?;
        let contains_all = payload.last_write_timestamp <= 0;
        let value = payload.value.clone()?;
        Some((value, prior, contains_all))
    }
}
