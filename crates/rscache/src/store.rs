//! The concurrent entry map, size accounting, and the admission/removal
//! ordering from §4.1.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry as DashEntry, DashMap};
use rscache_errors::{CacheError, CacheResult};

use crate::{
    adapter::StorageAdapter,
    clock::VirtualTime,
    config::CacheConfig,
    entry::Entry,
    queues::Queues,
};

pub struct EntryStore<A: StorageAdapter> {
    map: DashMap<A::Key, Arc<Entry<A>>>,
}

impl<A: StorageAdapter> EntryStore<A> {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    pub fn mapping_count(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, key: &A::Key) -> Option<Arc<Entry<A>>> {
        self.map.get(key).map(|r| r.clone())
    }

    /// Fetches the existing entry for `key`, or constructs and admits a
    /// new one, enqueuing it on the main and read queues per §4.1's
    /// ordering. Returns the entry and whether it was newly added.
    pub fn get_or_add(
        &self,
        key: &A::Key,
        now: VirtualTime,
        config: &CacheConfig,
        queues: &Queues<A>,
    ) -> CacheResult<(Arc<Entry<A>>, bool)> {
        if let Some(existing) = self.get(key) {
            return Ok((existing, false));
        }

        let count = self.map.len();
        if count >= config.max_cache_elements_hard_limit {
            crate::metrics::log_cache_full_rejection();
            return Err(CacheError::cache_full(count, config.max_cache_elements_hard_limit));
        }
        if count > config.main_queue_max_target_size {
            tracing::warn!(count, target = config.main_queue_max_target_size, "cache above soft target size");
        }

        let fresh = Arc::new(Entry::new(key.clone(), now));
        match self.map.entry(key.clone()) {
            DashEntry::Occupied(occupied) => Ok((occupied.get().clone(), false)),
            DashEntry::Vacant(vacant) => {
                vacant.insert(fresh.clone());
                queues.enqueue_main(fresh.clone());
                queues.enqueue_read(fresh.clone());
                Ok((fresh, true))
            }
        }
    }

    /// The two-step removal (§3): removes `entry` from the store if it is
    /// still the mapping for `key` (a `remove(k,v)`-style compare), then
    /// finalizes its payload. No-op (returns `false`) if the entry was
    /// already removed by someone else.
    pub fn remove_and_finalize(&self, key: &A::Key, entry: &Arc<Entry<A>>) -> bool {
        let removed = self
            .map
            .remove_if(key, |_, v| Arc::ptr_eq(v, entry))
            .is_some();
        if removed {
            entry.finalize_removal();
        }
        removed
    }
}

impl<A: StorageAdapter> Default for EntryStore<A> {
    fn default() -> Self {
        Self::new()
    }
}
