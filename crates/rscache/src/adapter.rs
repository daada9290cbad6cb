//! The storage-facing SPI.
//!
//! `StorageAdapter` is the single seam between the engine and whatever
//! backs it (a database, a remote service, a file). The engine only ever
//! calls through this trait from its own worker threads; it never assumes
//! anything about how a call is implemented beyond the types it produces
//! and consumes.

use std::error::Error;

/// A value produced or required by a storage adapter.
pub trait AdapterValue: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> AdapterValue for T {}

/// The pluggable storage contract for a single cache instance.
///
/// All associated types travel through the engine as owned values guarded
/// by per-entry locks; they must be `Send + Sync` to cross worker threads.
pub trait StorageAdapter: Send + Sync + 'static {
    /// The key type identifying a cached element.
    type Key: std::hash::Hash + Eq + Clone + Send + Sync + 'static;
    /// The in-memory representation the cache stores and serves to readers.
    type CacheValue: Clone + Send + Sync + 'static;
    /// What a read from storage returns.
    type StorageRead: Send + Sync + 'static;
    /// What is handed to storage on a write.
    type StorageWrite: Send + Sync + 'static;
    /// A write the cache itself produced in-memory (via the access API)
    /// and must eventually reconcile with storage.
    type InternalUpdate: Send + Sync + 'static;
    /// A write coming from outside the cache (e.g. observed via a change
    /// feed) that should be merged into an entry's in-memory value.
    type ExternalUpdate: Send + Sync + 'static;
    /// What an access-API write call returns to its caller.
    type ReturnValue: Send + Sync + 'static;

    /// Reads the current value for `key` from storage. Called both for an
    /// entry's initial load and for background resync reads.
    fn read(&self, key: &Self::Key) -> Result<Self::StorageRead, Box<dyn Error + Send + Sync>>;

    /// Writes `value` for `key` to storage.
    fn write(
        &self,
        key: &Self::Key,
        value: &Self::StorageWrite,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Converts a freshly read storage value into the in-memory cache
    /// value served to readers.
    fn to_cache_value(&self, read: Self::StorageRead) -> Self::CacheValue;

    /// Converts the current in-memory cache value into what should be
    /// handed to [`StorageAdapter::write`].
    fn to_storage_write(&self, value: &Self::CacheValue) -> Self::StorageWrite;

    /// Applies an internal (in-memory, collected) update on top of the
    /// current cache value, producing the new cache value and whatever the
    /// access-API write call should return to its caller.
    fn apply_internal_update(
        &self,
        current: &Self::CacheValue,
        update: &Self::InternalUpdate,
    ) -> (Self::CacheValue, Self::ReturnValue);

    /// Applies an external update on top of the current cache value,
    /// producing the new cache value.
    fn apply_external_update(
        &self,
        current: &Self::CacheValue,
        update: &Self::ExternalUpdate,
    ) -> Self::CacheValue;

    /// Whether two internal updates may be merged into a single applied
    /// update, preserving `can_merge_writes`'s semantics from the config.
    /// Default: adjacent updates are never merged (the common, safe case).
    fn can_merge_internal_updates(
        &self,
        _a: &Self::InternalUpdate,
        _b: &Self::InternalUpdate,
    ) -> bool {
        false
    }

    /// Merges `b` into `a`, only called when
    /// [`StorageAdapter::can_merge_internal_updates`] returned `true`.
    fn merge_internal_updates(
        &self,
        a: Self::InternalUpdate,
        _b: Self::InternalUpdate,
    ) -> Self::InternalUpdate {
        a
    }

    /// Splits the current in-memory value into (a) the value the entry
    /// should hold going forward and (b) the optional write to send to
    /// storage. `previous_failed_write` is `Some` when the main-queue
    /// worker is retrying or merging a write that previously failed;
    /// `None` write data in the return means there is nothing dirty to
    /// write this cycle.
    fn split_for_write(
        &self,
        key: &Self::Key,
        value: &Self::CacheValue,
        previous_failed_write: Option<&Self::StorageWrite>,
    ) -> (Self::CacheValue, Option<Self::StorageWrite>);
}
