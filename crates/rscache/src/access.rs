//! The public access API (§4.7): the only surface callers touch directly.
//! Everything here runs on the caller's thread; it only ever touches an
//! entry's lock and latch, never storage directly.

use std::{sync::Arc, time::Duration};

use rscache_errors::{CacheError, CacheResult};

use crate::{
    adapter::StorageAdapter,
    clock::{Clock, VirtualTime},
    control::ControlState,
    core::CacheCore,
    decisions::{AccessDecision, CachePolicy},
    entry::Entry,
    stats::CacheStatus,
};

/// Wraps a [`CacheCore`] with the access-facing methods. Worker threads are
/// spawned and owned separately (see `lib.rs`'s `Cache`); this struct only
/// needs the shared core to serve calls.
pub struct Access<A: StorageAdapter, P: CachePolicy<A>> {
    pub(crate) core: Arc<CacheCore<A, P>>,
}

impl<A: StorageAdapter, P: CachePolicy<A>> Access<A, P> {
    pub fn new(core: Arc<CacheCore<A, P>>) -> Self {
        Self { core }
    }

    /// Adds `key` to the cache if absent. Does not wait for the initial
    /// read; returns immediately either way.
    pub fn preload(&self, key: &A::Key) -> CacheResult<()> {
        self.core.control.require_access()?;
        self.core
            .store
            .get_or_add(key, self.core.clock.now(), &self.core.config, &self.core.queues)
            .map(|_| ())
    }

    /// `readIfCached`: no wait at all. Returns `Ok(None)` if the entry isn't
    /// present or hasn't completed its initial read yet.
    pub fn read_if_cached(&self, key: &A::Key) -> CacheResult<Option<A::CacheValue>> {
        self.read_with_wait(key, Duration::ZERO, false)
    }

    /// `readFor`: waits up to `max_wait` of virtual time for the initial
    /// read to complete, adding the entry if missing.
    pub fn read_for(&self, key: &A::Key, max_wait: Duration) -> CacheResult<Option<A::CacheValue>> {
        self.read_with_wait(key, max_wait, true)
    }

    /// `readUntil`: waits until `deadline` (a virtual timestamp) rather
    /// than a relative duration.
    pub fn read_until(&self, key: &A::Key, deadline: VirtualTime) -> CacheResult<Option<A::CacheValue>> {
        let now = self.core.clock.now();
        let wait = self.core.clock.gap(now, deadline);
        self.read_with_wait(key, wait, true)
    }

    /// `readIfCachedOrException`/`readForOrException`-style surfacing:
    /// converts an absent result into [`CacheError::ElementNotYetLoaded`].
    pub fn read_for_or_exception(&self, key: &A::Key, max_wait: Duration) -> CacheResult<A::CacheValue> {
        self.read_for(key, max_wait)?.ok_or(CacheError::ElementNotYetLoaded)
    }

    pub fn read_if_cached_or_exception(&self, key: &A::Key) -> CacheResult<A::CacheValue> {
        self.read_if_cached(key)?.ok_or(CacheError::ElementNotYetLoaded)
    }

    fn read_with_wait(
        &self,
        key: &A::Key,
        max_wait: Duration,
        may_add: bool,
    ) -> CacheResult<Option<A::CacheValue>> {
        self.core.control.require_access()?;

        let real_budget = self.core.clock.real_interval(max_wait);
        let deadline = std::time::Instant::now() + real_budget;

        for _ in 0..=self.core.config.max_cache_removed_retries {
            let entry = if may_add {
                let (entry, added) = self.core.store.get_or_add(
                    key,
                    self.core.clock.now(),
                    &self.core.config,
                    &self.core.queues,
                )?;
                if added && max_wait.is_zero() {
                    return Ok(None);
                }
                entry
            } else {
                match self.core.store.get(key) {
                    Some(entry) => entry,
                    None => return Ok(None),
                }
            };

            match self.try_read_entry(&entry, deadline)? {
                ReadOutcome::Value(value) => return Ok(value),
                ReadOutcome::RetryOuterLoop => continue,
            }
        }

        Err(CacheError::illegal_state("too many REMOVED_FROM_CACHE retries"))
    }

    fn try_read_entry(
        &self,
        entry: &Arc<Entry<A>>,
        deadline: std::time::Instant,
    ) -> CacheResult<ReadOutcome<A::CacheValue>> {
        loop {
            entry.touch_read(self.core.clock.now());
            let decision = {
                let payload = entry.read();
                self.core.policy.read_access_decision(&payload, &self.core.config)
            };

            match decision {
                AccessDecision::WaitForLatch => {
                    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                    if remaining.is_zero() {
                        return Ok(ReadOutcome::Value(None));
                    }
                    let chunk = remaining.min(self.core.config.max_sleep_time);
                    let opened = entry.latch.wait(chunk);
                    if !opened && std::time::Instant::now() >= deadline {
                        return Ok(ReadOutcome::Value(None));
                    }
                    continue;
                }
                AccessDecision::RetryOuterLoop => return Ok(ReadOutcome::RetryOuterLoop),
                AccessDecision::ReturnException(err) => return Err(err),
                AccessDecision::ValueReturned => {
                    let payload = entry.read();
                    return Ok(ReadOutcome::Value(payload.value.clone()));
                }
            }
        }
    }

    /// `writeIfCached`: applies `update` in place if the entry exists and
    /// is writable, without reading back the result.
    pub fn write_if_cached(&self, key: &A::Key, update: A::InternalUpdate) -> CacheResult<bool> {
        Ok(self.write_if_cached_impl(key, update, false)?.is_some())
    }

    /// `writeIfCachedAndRead`: same, but returns the return-value SPI's
    /// conversion of the post-update value.
    pub fn write_if_cached_and_read(
        &self,
        key: &A::Key,
        update: A::InternalUpdate,
    ) -> CacheResult<Option<A::ReturnValue>> {
        self.write_if_cached_impl(key, update, true)
    }

    pub fn write_if_cached_or_exception(
        &self,
        key: &A::Key,
        update: A::InternalUpdate,
    ) -> CacheResult<A::ReturnValue> {
        self.write_if_cached_and_read(key, update)?
            .ok_or(CacheError::ElementNotYetLoaded)
    }

    /// Reconciles `update`, observed from outside the cache (e.g. a change
    /// feed), into the in-memory value. Unlike [`Access::write_if_cached`]
    /// this never marks the entry dirty or collects the update for resync
    /// replay: the adapter's conversion already reflects external state
    /// directly, so there is nothing for the cache to write back. Returns
    /// `false` if the entry isn't present or isn't currently writable.
    pub fn notify_external_update(&self, key: &A::Key, update: A::ExternalUpdate) -> CacheResult<bool> {
        self.core.control.require_access()?;

        let entry = match self.core.store.get(key) {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let mut payload = entry.write();
        match self.core.policy.read_access_decision(&payload, &self.core.config) {
            AccessDecision::ValueReturned => {}
            AccessDecision::ReturnException(err) => return Err(err),
            AccessDecision::WaitForLatch | AccessDecision::RetryOuterLoop => return Ok(false),
        }

        let current = payload.value.clone().ok_or_else(|| {
            CacheError::illegal_state("notify_external_update observed VALUE_RETURNED with no value present")
        })?;
        payload.value = Some(self.core.adapter.apply_external_update(&current, &update));
        Ok(true)
    }

    fn write_if_cached_impl(
        &self,
        key: &A::Key,
        update: A::InternalUpdate,
        produce_read_result: bool,
    ) -> CacheResult<Option<A::ReturnValue>> {
        self.core.control.require_access()?;

        let entry = match self.core.store.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let mut payload = entry.write();
        let decision = self.core.policy.write_access_decision(&payload, &self.core.config);
        match decision {
            AccessDecision::WaitForLatch | AccessDecision::RetryOuterLoop => return Ok(None),
            AccessDecision::ReturnException(err) => return Err(err),
            AccessDecision::ValueReturned => {}
        }

        let now = self.core.clock.now();
        payload.last_write_timestamp = now;

        let current = payload.value.clone().ok_or_else(|| {
            CacheError::illegal_state("write_if_cached observed VALUE_RETURNED with no value present")
        })?;
        let (new_value, return_value) = self.core.adapter.apply_internal_update(&current, &update);
        payload.value = Some(new_value);

        // A collect-capacity exception only stops further collection for
        // this entry; the update itself was already applied above and the
        // write call to the caller still succeeds.
        if crate::updates::collect(&mut payload, update, self.core.config.max_updates_to_collect).is_err() {
            crate::updates::reset(&mut payload, crate::updates::ResetReason::UpdateCollectException, Some(false));
            crate::metrics::log_update_collect_exception();
            tracing::warn!("too many pending updates collected; disabling further collection for entry");
        }

        Ok(if produce_read_result {
            Some(return_value)
        } else {
            None
        })
    }

    /// Atomically transitions `RUNNING -> FLUSHING`, waits (chunked) for
    /// the entry store to drain or `deadline` to pass, then transitions
    /// back to `RUNNING`. Returns whether the store fully drained.
    pub fn flush_for(&self, deadline: Duration) -> CacheResult<bool> {
        self.core.control.begin_flush()?;
        let drained = self.wait_for_drain(deadline);
        self.core.control.end_flush();
        Ok(drained)
    }

    pub fn flush_until(&self, deadline: VirtualTime) -> CacheResult<bool> {
        let now = self.core.clock.now();
        self.flush_for(self.core.clock.gap(now, deadline))
    }

    /// Transitions to `SHUTDOWN_IN_PROGRESS`, waits for drain the same way
    /// as flush, then always leaves `SHUTDOWN_COMPLETED` regardless of
    /// whether the store fully drained.
    pub fn shutdown_for(&self, deadline: Duration) -> CacheResult<bool> {
        self.core.control.begin_shutdown()?;
        self.core
            .stopping
            .store(true, std::sync::atomic::Ordering::Release);
        let drained = self.wait_for_drain(deadline);
        self.core.control.complete_shutdown();
        Ok(drained)
    }

    pub fn shutdown_until(&self, deadline: VirtualTime) -> CacheResult<bool> {
        let now = self.core.clock.now();
        self.shutdown_for(self.core.clock.gap(now, deadline))
    }

    fn wait_for_drain(&self, deadline: Duration) -> bool {
        let real_deadline = std::time::Instant::now() + self.core.clock.real_interval(deadline);
        loop {
            if self.core.store.mapping_count() == 0 {
                return true;
            }
            let remaining = real_deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            std::thread::sleep(remaining.min(self.core.config.max_sleep_time));
        }
    }

    pub fn start(&self) -> CacheResult<()> {
        self.core.control.start()
    }

    pub fn is_alive(&self) -> bool {
        self.core.control.is_alive()
    }

    pub fn is_usable(&self) -> bool {
        self.core.control.get().allows_access()
    }

    pub fn control_state(&self) -> ControlState {
        self.core.control.get()
    }

    pub fn get_status(&self, max_age: Duration) -> CacheStatus {
        self.core.status_cache.get(
            &self.core.clock,
            &self.core.stats,
            self.core.store.mapping_count() as u64,
            max_age,
        )
    }
}

enum ReadOutcome<T> {
    Value(Option<T>),
    RetryOuterLoop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::CacheConfig,
        control::ControlStateCell,
        decisions::DefaultCachePolicy,
        entry::{ReadStatus, WriteStatus},
        queues::Queues,
        stats::{StatsCounters, StatusCache},
        store::EntryStore,
    };
    use std::sync::atomic::AtomicBool;

    struct Echo;
    impl StorageAdapter for Echo {
        type Key = u64;
        type CacheValue = String;
        type StorageRead = String;
        type StorageWrite = String;
        type InternalUpdate = String;
        type ExternalUpdate = String;
        type ReturnValue = String;

        fn read(&self, _key: &u64) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok(String::new())
        }
        fn write(&self, _key: &u64, _value: &String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
        fn to_cache_value(&self, read: String) -> String {
            read
        }
        fn to_storage_write(&self, value: &String) -> String {
            value.clone()
        }
        fn apply_internal_update(&self, current: &String, update: &String) -> (String, String) {
            (format!("{current}{update}"), update.clone())
        }
        fn apply_external_update(&self, current: &String, update: &String) -> String {
            format!("{current}{update}")
        }
        fn split_for_write(
            &self,
            _key: &u64,
            value: &String,
            previous_failed_write: Option<&String>,
        ) -> (String, Option<String>) {
            match previous_failed_write {
                Some(prior) => (value.clone(), Some(prior.clone())),
                None => (value.clone(), Some(value.clone())),
            }
        }
    }

    fn test_access(manual: &ManualClock) -> Access<Echo, DefaultCachePolicy> {
        let core = CacheCore {
            adapter: Echo,
            policy: DefaultCachePolicy,
            clock: Arc::new(manual.clone()),
            config: CacheConfig::default(),
            store: EntryStore::new(),
            queues: Queues::new(),
            control: ControlStateCell::new(),
            stats: StatsCounters::new(),
            status_cache: StatusCache::new(),
            read_executor: None,
            write_executor: None,
            stopping: AtomicBool::new(false),
        };
        core.control.start().unwrap();
        Access::new(Arc::new(core))
    }

    #[test]
    fn preload_adds_and_enqueues_without_waiting() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        access.preload(&1).unwrap();
        assert_eq!(access.core.store.mapping_count(), 1);
        assert!(access.core.queues.read_rx.try_recv().is_ok());
        assert!(access.core.queues.main_rx.try_recv().is_ok());
    }

    #[test]
    fn read_if_cached_returns_none_for_missing_entry() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        assert_eq!(access.read_if_cached(&1).unwrap(), None);
        assert_eq!(access.core.store.mapping_count(), 0);
    }

    #[test]
    fn read_for_returns_immediately_once_data_ready() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        let (entry, _) = access
            .core
            .store
            .get_or_add(&1, manual.now(), &access.core.config, &access.core.queues)
            .unwrap();
        {
            let mut payload = entry.write();
            payload.value = Some("hello".to_string());
            payload.read_status = ReadStatus::DataReady;
        }
        entry.latch.open();

        let value = access.read_for(&1, Duration::from_millis(50)).unwrap();
        assert_eq!(value, Some("hello".to_string()));
    }

    #[test]
    fn read_for_times_out_when_never_loaded() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        access
            .core
            .store
            .get_or_add(&1, manual.now(), &access.core.config, &access.core.queues)
            .unwrap();

        let value = access.read_for(&1, Duration::from_millis(20)).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn write_if_cached_applies_update_and_collects() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        let (entry, _) = access
            .core
            .store
            .get_or_add(&1, manual.now(), &access.core.config, &access.core.queues)
            .unwrap();
        {
            let mut payload = entry.write();
            payload.value = Some("v0".to_string());
            payload.read_status = ReadStatus::DataReady;
        }

        let applied = access.write_if_cached(&1, "u1".to_string()).unwrap();
        assert!(applied);
        let payload = entry.read();
        assert_eq!(payload.value.as_deref(), Some("v0u1"));
        assert_eq!(payload.collected_updates.as_deref(), Some(["u1".to_string()].as_slice()));
    }

    #[test]
    fn write_if_cached_and_read_returns_converted_value() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        let (entry, _) = access
            .core
            .store
            .get_or_add(&1, manual.now(), &access.core.config, &access.core.queues)
            .unwrap();
        {
            let mut payload = entry.write();
            payload.value = Some("v0".to_string());
            payload.read_status = ReadStatus::DataReady;
        }

        let result = access.write_if_cached_and_read(&1, "u1".to_string()).unwrap();
        assert_eq!(result, Some("u1".to_string()));
    }

    #[test]
    fn notify_external_update_applies_without_marking_dirty() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        let (entry, _) = access
            .core
            .store
            .get_or_add(&1, manual.now(), &access.core.config, &access.core.queues)
            .unwrap();
        {
            let mut payload = entry.write();
            payload.value = Some("v0".to_string());
            payload.read_status = ReadStatus::DataReady;
            payload.last_write_timestamp = -1;
        }

        let applied = access.notify_external_update(&1, "ext".to_string()).unwrap();
        assert!(applied);
        let payload = entry.read();
        assert_eq!(payload.value.as_deref(), Some("v0ext"));
        assert!(payload.collected_updates.is_none());
        assert_eq!(payload.last_write_timestamp, -1);
    }

    #[test]
    fn notify_external_update_returns_false_for_missing_entry() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        assert!(!access.notify_external_update(&1, "ext".to_string()).unwrap());
    }

    #[test]
    fn write_if_cached_blocked_on_failed_resync_by_default() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        let (entry, _) = access
            .core
            .store
            .get_or_add(&1, manual.now(), &access.core.config, &access.core.queues)
            .unwrap();
        {
            let mut payload = entry.write();
            payload.value = Some("v0".to_string());
            payload.read_status = ReadStatus::DataReady;
            payload.write_status = WriteStatus::WriteFailedFinal;
        }

        let err = access.write_if_cached(&1, "u1".to_string()).unwrap_err();
        assert!(matches!(err, CacheError::ElementFailedResync { .. }));
    }

    #[test]
    fn flush_for_returns_true_when_store_is_empty() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        assert!(access.flush_for(Duration::from_millis(10)).unwrap());
        assert_eq!(access.control_state(), ControlState::Running);
    }

    #[test]
    fn shutdown_for_always_ends_completed() {
        let manual = ManualClock::new();
        let access = test_access(&manual);
        access.preload(&1).unwrap();
        let drained = access.shutdown_for(Duration::from_millis(5)).unwrap();
        assert!(!drained);
        assert_eq!(access.control_state(), ControlState::ShutdownCompleted);
        assert!(!access.is_alive());
    }
}
