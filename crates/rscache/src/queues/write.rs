//! The write-queue worker (§4.4): consumes write-out tasks produced by
//! the main-queue worker.

use std::{sync::atomic::Ordering, sync::Arc, time::Duration};

use crossbeam_channel::RecvTimeoutError;
use rscache_errors::capture_source;

use crate::{
    adapter::StorageAdapter,
    clock::Clock,
    core::CacheCore,
    decisions::{CachePolicy, RetryDecision, WriteQueueDecision},
    entry::{Entry, WriteStatus},
    executor,
    queues::WriteTask,
};

pub fn run<A, P>(core: Arc<CacheCore<A, P>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    loop {
        let task = match core.queues.write_rx.recv_timeout(core.config.max_sleep_time) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => {
                if core.stopping.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if core.config.write_queue_batching_delay > Duration::ZERO {
            let deadline = core.clock.add(core.clock.now(), core.config.write_queue_batching_delay);
            let mut batch = vec![task];
            while core.clock.now() < deadline {
                match core.queues.write_rx.try_recv() {
                    Ok(more) => batch.push(more),
                    Err(_) => break,
                }
            }
            tracing::debug!(batch_len = batch.len(), "write batch delay expired");
            for task in batch {
                process_one(&core, task);
            }
        } else {
            process_one(&core, task);
        }

        if core.stopping.load(Ordering::Acquire) && core.queues.write_rx.is_empty() {
            break;
        }
    }
}

fn process_one<A, P>(core: &Arc<CacheCore<A, P>>, task: WriteTask<A>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let WriteTask { key, entry, write_data } = task;

    let decision = {
        let payload = entry.read();
        core.policy.write_queue_decision(&payload)
    };

    match decision {
        WriteQueueDecision::DoNothing => {
            tracing::warn!("write queue task skipped by policy");
            return;
        }
        WriteQueueDecision::SetFinalFailedWriteStatus => {
            handle_failure(core, &entry, write_data, "policy forced final failed status".into());
            return;
        }
        WriteQueueDecision::Write => {}
    }

    let core_for_job = core.clone();
    let key_for_job = key.clone();
    // The job hands ownership of `write_data` back out alongside the
    // result so the failure path can retry or stash it without requiring
    // `StorageWrite: Clone`.
    let (result, write_data) = executor::run(core.write_executor.as_ref(), move || {
        let outcome = core_for_job.adapter.write(&key_for_job, &write_data);
        (outcome, write_data)
    });

    match result {
        Ok(()) => handle_success(core, &entry),
        Err(err) => {
            let error_text = capture_source(err.as_ref());
            handle_failure(core, &entry, write_data, error_text);
        }
    }
}

fn handle_success<A, P>(core: &Arc<CacheCore<A, P>>, entry: &Arc<Entry<A>>)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let mut payload = entry.write();
    match payload.write_status {
        WriteStatus::WritePending => {
            payload.write_status = WriteStatus::WriteSuccess;
            payload.consecutive_write_failures = 0;
            payload.last_write_error = None;
            core.stats.writes_succeeded.fetch_add(1, Ordering::Relaxed);
        }
        WriteStatus::RemovedFromCache => {
            // Too late: the entry was removed while this write was in
            // flight. Silently ignored per §4.4.
        }
        other => {
            tracing::warn!(?other, "write success observed unexpected write status");
        }
    }
}

fn handle_failure<A, P>(
    core: &Arc<CacheCore<A, P>>,
    entry: &Arc<Entry<A>>,
    write_data: A::StorageWrite,
    error_text: String,
)
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    let mut payload = entry.write();
    payload.consecutive_write_failures += 1;
    payload.last_write_error = Some(error_text);
    let decision = core.policy.write_retry_decision(&payload, &core.config);
    match decision {
        RetryDecision::Retry => {
            drop(payload);
            core.queues.enqueue_write(WriteTask {
                key: entry.key.clone(),
                entry: entry.clone(),
                write_data,
            });
        }
        RetryDecision::NoRetrySetFinalFailedStatus => {
            crate::metrics::log_retry_exhausted("write");
            payload.previous_failed_write_data = Some(write_data);
            payload.write_status = WriteStatus::WriteFailedFinal;
            core.stats.writes_failed.fetch_add(1, Ordering::Relaxed);
        }
        RetryDecision::DoNothing => {
            tracing::warn!("write failure decision was DoNothing");
        }
        RetryDecision::RemoveFromCache => {
            drop(payload);
            core.store.remove_and_finalize(&entry.key, entry);
        }
    }
}
