//! A write-behind, resync-in-background keyed cache.
//!
//! An in-memory cache interposed between callers and a slower external
//! store. Callers issue reads and small incremental updates against cached
//! values with low latency; the cache absorbs updates in memory, flushes
//! them asynchronously to storage, and periodically re-reads storage to
//! reconcile concurrent external modifications. Every entry cycles through
//! four internal queues (read → main → write → return) on a bounded
//! schedule: it is periodically written out if dirty and re-read, then
//! either evicted or recycled.
//!
//! Storage semantics are supplied by implementing [`StorageAdapter`];
//! retry/eviction/merge policy can be customized by implementing
//! [`CachePolicy`] (the [`DefaultCachePolicy`] covers the documented
//! defaults). The engine itself never talks to storage except through that
//! trait, and never blocks a caller's thread except inside the access API
//! while waiting on an entry's latch.

pub mod access;
pub mod adapter;
pub mod clock;
pub mod config;
pub mod control;
pub mod core;
pub mod decisions;
pub mod entry;
pub mod executor;
pub mod metrics;
pub mod queues;
pub mod stats;
pub mod store;
pub mod updates;

use std::{
    sync::{atomic::Ordering, Arc},
    thread::JoinHandle,
    time::Duration,
};

pub use access::Access;
pub use adapter::StorageAdapter;
pub use clock::{Clock, ManualClock, SystemClock, VirtualTime};
pub use config::CacheConfig;
pub use control::ControlState;
pub use decisions::{CachePolicy, DefaultCachePolicy};
pub use executor::{Executor, InlineExecutor};
pub use rscache_errors::{CacheError, CacheResult};
pub use stats::CacheStatus;

use core::CacheCore;
use control::ControlStateCell;
use queues::Queues;
use stats::{StatsCounters, StatusCache};
use store::EntryStore;

/// A running cache instance: the shared engine state plus the four worker
/// threads that drive it. Dropping a `Cache` without calling
/// [`Cache::shutdown_for`] first leaves the workers running in the
/// background until the process exits; it does not panic or leak memory,
/// but callers that want a clean stop should shut down explicitly.
pub struct Cache<A: StorageAdapter, P: CachePolicy<A> = DefaultCachePolicy> {
    access: Access<A, P>,
    workers: Vec<JoinHandle<()>>,
}

/// Everything needed to construct a [`Cache`] beyond the adapter and
/// policy: the clock, config, and optional I/O executors.
pub struct CacheBuilder<A: StorageAdapter, P: CachePolicy<A> = DefaultCachePolicy> {
    adapter: A,
    policy: P,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    read_executor: Option<Arc<dyn Executor>>,
    write_executor: Option<Arc<dyn Executor>>,
}

impl<A: StorageAdapter> CacheBuilder<A, DefaultCachePolicy> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            policy: DefaultCachePolicy,
            clock: Arc::new(SystemClock::new()),
            config: CacheConfig::default(),
            read_executor: None,
            write_executor: None,
        }
    }
}

impl<A: StorageAdapter, P: CachePolicy<A>> CacheBuilder<A, P> {
    pub fn policy<P2: CachePolicy<A>>(self, policy: P2) -> CacheBuilder<A, P2> {
        CacheBuilder {
            adapter: self.adapter,
            policy,
            clock: self.clock,
            config: self.config,
            read_executor: self.read_executor,
            write_executor: self.write_executor,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn read_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.read_executor = Some(executor);
        self
    }

    pub fn write_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.write_executor = Some(executor);
        self
    }

    /// Builds the cache and spawns its four worker threads. The cache
    /// starts in `NOT_STARTED`; call [`Cache::start`] before issuing
    /// access calls.
    pub fn build(self) -> Cache<A, P> {
        let core = Arc::new(CacheCore {
            adapter: self.adapter,
            policy: self.policy,
            clock: self.clock,
            config: self.config,
            store: EntryStore::new(),
            queues: Queues::new(),
            control: ControlStateCell::new(),
            stats: StatsCounters::new(),
            status_cache: StatusCache::new(),
            read_executor: self.read_executor,
            write_executor: self.write_executor,
            stopping: std::sync::atomic::AtomicBool::new(false),
        });

        let workers = vec![
            spawn_worker("rscache-read", core.clone(), queues::read::run),
            spawn_worker("rscache-write", core.clone(), queues::write::run),
            spawn_worker("rscache-main", core.clone(), queues::main_queue::run),
            spawn_worker("rscache-return", core.clone(), queues::return_queue::run),
        ];

        Cache {
            access: Access::new(core),
            workers,
        }
    }
}

fn spawn_worker<A, P>(
    name: &'static str,
    core: Arc<CacheCore<A, P>>,
    run: fn(Arc<CacheCore<A, P>>),
) -> JoinHandle<()>
where
    A: StorageAdapter,
    P: CachePolicy<A>,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run(core))
        .expect("failed to spawn cache worker thread")
}

impl<A: StorageAdapter, P: CachePolicy<A>> Cache<A, P> {
    pub fn builder(adapter: A) -> CacheBuilder<A, DefaultCachePolicy> {
        CacheBuilder::new(adapter)
    }

    /// `NotStarted -> Running`. Idempotent.
    pub fn start(&self) -> CacheResult<()> {
        self.access.start()
    }

    pub fn preload(&self, key: &A::Key) -> CacheResult<()> {
        self.access.preload(key)
    }

    pub fn read_if_cached(&self, key: &A::Key) -> CacheResult<Option<A::CacheValue>> {
        self.access.read_if_cached(key)
    }

    pub fn read_for(&self, key: &A::Key, max_wait: Duration) -> CacheResult<Option<A::CacheValue>> {
        self.access.read_for(key, max_wait)
    }

    pub fn read_until(&self, key: &A::Key, deadline: VirtualTime) -> CacheResult<Option<A::CacheValue>> {
        self.access.read_until(key, deadline)
    }

    pub fn read_for_or_exception(&self, key: &A::Key, max_wait: Duration) -> CacheResult<A::CacheValue> {
        self.access.read_for_or_exception(key, max_wait)
    }

    pub fn read_if_cached_or_exception(&self, key: &A::Key) -> CacheResult<A::CacheValue> {
        self.access.read_if_cached_or_exception(key)
    }

    pub fn write_if_cached(&self, key: &A::Key, update: A::InternalUpdate) -> CacheResult<bool> {
        self.access.write_if_cached(key, update)
    }

    pub fn write_if_cached_and_read(
        &self,
        key: &A::Key,
        update: A::InternalUpdate,
    ) -> CacheResult<Option<A::ReturnValue>> {
        self.access.write_if_cached_and_read(key, update)
    }

    pub fn write_if_cached_or_exception(&self, key: &A::Key, update: A::InternalUpdate) -> CacheResult<A::ReturnValue> {
        self.access.write_if_cached_or_exception(key, update)
    }

    pub fn notify_external_update(&self, key: &A::Key, update: A::ExternalUpdate) -> CacheResult<bool> {
        self.access.notify_external_update(key, update)
    }

    pub fn flush_for(&self, deadline: Duration) -> CacheResult<bool> {
        self.access.flush_for(deadline)
    }

    pub fn flush_until(&self, deadline: VirtualTime) -> CacheResult<bool> {
        self.access.flush_until(deadline)
    }

    /// Transitions to `SHUTDOWN_IN_PROGRESS`, waits (up to `deadline`) for
    /// the entry store to drain, then joins all four worker threads
    /// regardless of whether the store fully drained.
    pub fn shutdown_for(mut self, deadline: Duration) -> CacheResult<bool> {
        let drained = self.access.shutdown_for(deadline)?;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        Ok(drained)
    }

    pub fn shutdown_until(self, deadline: VirtualTime) -> CacheResult<bool> {
        let now = self.access.core.clock.now();
        let wait = self.access.core.clock.gap(now, deadline);
        self.shutdown_for(wait)
    }

    pub fn is_alive(&self) -> bool {
        self.access.is_alive()
    }

    pub fn is_usable(&self) -> bool {
        self.access.is_usable()
    }

    pub fn control_state(&self) -> ControlState {
        self.access.control_state()
    }

    pub fn get_status(&self, max_age: Duration) -> CacheStatus {
        self.access.get_status(max_age)
    }

    /// Direct access to the underlying [`Access`] API, e.g. to share it
    /// across threads independently of the worker-owning [`Cache`] handle.
    pub fn access(&self) -> &Access<A, P> {
        &self.access
    }
}

impl<A: StorageAdapter, P: CachePolicy<A>> Drop for Cache<A, P> {
    fn drop(&mut self) {
        if self.access.is_alive() {
            self.access.core.stopping.store(true, Ordering::Release);
        }
    }
}
