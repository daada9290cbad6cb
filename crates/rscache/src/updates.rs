//! The update-collection protocol: preserving in-memory writes issued
//! while a background resync is outstanding, so they can be replayed on
//! top of the freshly read storage value.

use crate::{
    adapter::StorageAdapter,
    entry::Payload,
};
use rscache_errors::{CacheError, CacheResult};

/// Why a payload's collected-update list was just reset. Each variant maps
/// to one branch in the worker/access-API logic that clears the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetReason {
    NoWriteLockNewCacheEntryCreated,
    RemovedFromCache,
    StorageDataMerged,
    ReadFailedFinalDecision,
    IsMergePossibleException,
    FullWriteSent,
    ReturnQueueDecision,
    UpdateCollectException,
}

impl ResetReason {
    fn collect_after_default(self) -> bool {
        !matches!(
            self,
            ResetReason::RemovedFromCache | ResetReason::UpdateCollectException
        )
    }
}

/// Appends `update` to the collected list, under the caller's write lock.
///
/// No-op if collection is currently disabled. Returns
/// [`CacheError::TooManyUpdates`] without mutating anything when the list
/// is already at `max_updates_to_collect`; the caller is expected to
/// respond by calling [`reset`] with [`ResetReason::UpdateCollectException`].
pub fn collect<A: StorageAdapter>(
    payload: &mut Payload<A>,
    update: A::InternalUpdate,
    max_updates_to_collect: usize,
) -> CacheResult<()> {
    if !payload.collect_updates {
        return Ok(());
    }
    let list = payload.collected_updates.get_or_insert_with(Vec::new);
    if list.len() >= max_updates_to_collect {
        return Err(CacheError::too_many_updates(max_updates_to_collect));
    }
    list.push(update);
    Ok(())
}

/// Whether a just-completed resync read may still be merged with whatever
/// updates have been collected since it started. Default: simply whether
/// collection was on. A storage adapter error surfaces as `Ok(false)` to
/// the caller along with an [`ResetReason::IsMergePossibleException`]
/// reset, matching the "treat as false and reset" default policy.
pub fn is_merge_possible<A: StorageAdapter>(payload: &Payload<A>) -> bool {
    payload.collect_updates
}

/// Clears the collected-update list and sets whether collection continues
/// afterward. `collect_after` overrides the reason's default when `Some`.
pub fn reset<A: StorageAdapter>(
    payload: &mut Payload<A>,
    reason: ResetReason,
    collect_after: Option<bool>,
) {
    payload.collected_updates = None;
    payload.collect_updates = collect_after.unwrap_or_else(|| reason.collect_after_default());
}

/// Replays every collected update, in collection order, on top of
/// `base`, returning the final cache value. Used by the read-queue
/// success handler's MERGE_DATA branch.
pub fn replay_updates<A: StorageAdapter>(
    adapter: &A,
    base: A::CacheValue,
    updates: &[A::InternalUpdate],
) -> A::CacheValue {
    updates.iter().fold(base, |value, update| {
        adapter.apply_internal_update(&value, update).0
    })
}
