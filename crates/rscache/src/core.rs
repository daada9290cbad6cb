//! Shared engine state. One `CacheCore` is wrapped in an `Arc` and handed
//! to the access API and to every worker thread; nothing here is
//! cache-instance-global in the static sense (§9's "global mutable state"
//! note) — it is all instance-scoped and passed explicitly.

use std::sync::{atomic::AtomicBool, Arc};

use crate::{
    adapter::StorageAdapter,
    clock::Clock,
    config::CacheConfig,
    control::ControlStateCell,
    decisions::CachePolicy,
    executor::Executor,
    queues::Queues,
    stats::{StatsCounters, StatusCache},
    store::EntryStore,
};

pub struct CacheCore<A: StorageAdapter, P: CachePolicy<A>> {
    pub adapter: A,
    pub policy: P,
    pub clock: Arc<dyn Clock>,
    pub config: CacheConfig,
    pub store: EntryStore<A>,
    pub queues: Queues<A>,
    pub control: ControlStateCell,
    pub stats: StatsCounters,
    pub status_cache: StatusCache,
    pub read_executor: Option<Arc<dyn Executor>>,
    pub write_executor: Option<Arc<dyn Executor>>,
    /// Flipped once during shutdown so worker loops exit their poll loop
    /// instead of blocking on the queues forever.
    pub stopping: AtomicBool,
}

impl<A: StorageAdapter, P: CachePolicy<A>> CacheCore<A, P> {
    pub fn is_flushing_or_shutting_down(&self) -> bool {
        use crate::control::ControlState::*;
        matches!(
            self.control.get(),
            Flushing | ShutdownInProgress
        )
    }
}
