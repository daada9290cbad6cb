//! Per-entry data model: the two independent status state machines, the
//! mutable payload they gate, and the latch readers wait on.

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
    time::Duration,
};

use event_listener::Event;
use parking_lot::RwLock;

use crate::{adapter::StorageAdapter, clock::VirtualTime};

/// Read-side lifecycle of an entry's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    NotReadYet,
    DataReady,
    DataReadyResyncPending,
    DataReadyResyncFailedFinal,
    ReadFailedFinal,
    RemovedFromCache,
}

impl ReadStatus {
    /// True once the status has left `NotReadYet`; mirrors the access
    /// latch's open condition exactly.
    pub fn latch_should_be_open(self) -> bool {
        !matches!(self, ReadStatus::NotReadYet)
    }
}

/// Write-side lifecycle of an entry's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    NoWriteRequestedYet,
    WritePending,
    WriteSuccess,
    WriteFailedFinal,
    RemovedFromCache,
}

/// Mutable per-entry state. Read under the entry's read lock for plain
/// reads, write lock for any status/value/update-list mutation.
pub struct Payload<A: StorageAdapter> {
    pub value: Option<A::CacheValue>,
    pub read_status: ReadStatus,
    pub write_status: WriteStatus,
    /// Mutated only under the write lock, unlike `Entry::last_read_timestamp`
    /// which is touched under the read lock via an atomic.
    pub last_write_timestamp: VirtualTime,
    pub in_queue_since: VirtualTime,
    pub last_synced_with_storage: VirtualTime,

    pub consecutive_read_failures: u32,
    pub consecutive_write_failures: u32,
    pub full_cycle_failures: u32,
    pub return_queue_requeues: u32,
    pub full_cycles_completed: u64,

    pub collect_updates: bool,
    pub collected_updates: Option<Vec<A::InternalUpdate>>,

    /// Populated only while `write_status == WriteFailedFinal`.
    pub previous_failed_write_data: Option<A::StorageWrite>,

    /// Captured text of the most recent terminal read/write failure, used
    /// to fill in `CacheError::ElementFailed{Loading,Resync}`'s source
    /// when the access API later reports it.
    pub last_read_error: Option<String>,
    pub last_write_error: Option<String>,
}

impl<A: StorageAdapter> Payload<A> {
    fn new(now: VirtualTime) -> Self {
        Self {
            value: None,
            read_status: ReadStatus::NotReadYet,
            write_status: WriteStatus::NoWriteRequestedYet,
            last_write_timestamp: -now,
            in_queue_since: now,
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
}

impl<A: StorageAdapter> fmt::Debug for Payload<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("read_status", &self.read_status)
            .field("write_status", &self.write_status)
            .field("in_queue_since", &self.in_queue_since)
            .field("last_write_timestamp", &self.last_write_timestamp)
            .finish()
    }
}

/// A one-shot gate, initially closed, that opens exactly once and never
/// closes again. Readers block on it between `NotReadYet` and the first
/// terminal read outcome.
pub struct AccessLatch {
    opened: AtomicBool,
    event: Event,
}

impl AccessLatch {
    pub fn new() -> Self {
        Self {
            opened: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Idempotent: opening an already-open latch is a no-op.
    pub fn open(&self) {
        if self.opened.swap(true, Ordering::AcqRel) {
            return;
        }
        self.event.notify(usize::MAX);
    }

    /// Blocks the calling thread up to `timeout` for the latch to open.
    /// Returns whether it is open when this call returns.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_open() {
            return true;
        }
        let listener = self.event.listen();
        if self.is_open() {
            return true;
        }
        listener.wait_timeout(timeout);
        self.is_open()
    }
}

impl Default for AccessLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// A single cached element: an immutable key, the lock-guarded payload,
/// and the latch/timestamp fields that must be touchable without taking
/// the write lock.
pub struct Entry<A: StorageAdapter> {
    pub key: A::Key,
    payload: RwLock<Payload<A>>,
    /// Volatile: updated under the read lock by the access API without
    /// promoting to a write lock.
    last_read_timestamp: AtomicI64,
    pub latch: AccessLatch,
}

impl<A: StorageAdapter> Entry<A> {
    pub fn new(key: A::Key, now: VirtualTime) -> Self {
        Self {
            key,
            payload: RwLock::new(Payload::new(now)),
            last_read_timestamp: AtomicI64::new(-now),
            latch: AccessLatch::new(),
        }
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Payload<A>> {
        self.payload.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Payload<A>> {
        self.payload.write()
    }

    pub fn last_read_timestamp(&self) -> VirtualTime {
        self.last_read_timestamp.load(Ordering::Acquire)
    }

    /// Touches the read timestamp to `now` (positive: touched since last
    /// main-queue snapshot). Valid under either lock mode.
    pub fn touch_read(&self, now: VirtualTime) {
        self.last_read_timestamp.store(now, Ordering::Release);
    }

    /// Marks the read timestamp clean (negative magnitude) without
    /// changing its magnitude, mirroring the main-queue worker's snapshot
    /// step.
    pub fn mark_read_clean(&self) {
        let current = self.last_read_timestamp.load(Ordering::Acquire);
        self.last_read_timestamp
            .store(-current.abs(), Ordering::Release);
    }

    /// The two-step removal's second half: under the write lock, marks
    /// both statuses terminal, drops the update list, and opens the latch.
    /// The caller is responsible for having already removed the entry from
    /// the store (the first, atomically-visible step).
    pub fn finalize_removal(&self) {
        let mut payload = self.payload.write();
        payload.read_status = ReadStatus::RemovedFromCache;
        payload.write_status = WriteStatus::RemovedFromCache;
        payload.collected_updates = None;
        payload.collect_updates = false;
        drop(payload);
        self.latch.open();
    }
}

impl<A: StorageAdapter> fmt::Debug for Entry<A>
where
    A::Key: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("key", &self.key).finish()
    }
}
