//! Integration tests driving a real [`Cache`] with its four worker threads
//! spawned, exercising the concrete scenarios and universal invariants
//! rather than calling the per-worker `process_*` functions directly.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use rscache::{Cache, CacheConfig, CacheError, StorageAdapter};

/// Backed by a mutex-guarded map; optionally fails the first `fail_reads`
/// read attempts per key (used for the initial-read-failure scenario) and
/// records every read/write it serves so tests can assert call counts and
/// ordering.
struct TestAdapter {
    storage: Mutex<HashMap<u64, String>>,
    reads_seen: AtomicUsize,
    writes_seen: AtomicUsize,
    write_log: Mutex<Vec<(u64, String)>>,
    fail_reads_remaining: AtomicU32,
}

impl TestAdapter {
    fn new() -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            reads_seen: AtomicUsize::new(0),
            writes_seen: AtomicUsize::new(0),
            write_log: Mutex::new(Vec::new()),
            fail_reads_remaining: AtomicU32::new(0),
        }
    }

    fn with_seed(key: u64, value: &str) -> Self {
        let adapter = Self::new();
        adapter.storage.lock().unwrap().insert(key, value.to_string());
        adapter
    }

    fn failing_reads(count: u32) -> Self {
        let adapter = Self::new();
        adapter.fail_reads_remaining.store(count, Ordering::SeqCst);
        adapter
    }
}

impl StorageAdapter for TestAdapter {
    type Key = u64;
    type CacheValue = String;
    type StorageRead = String;
    type StorageWrite = String;
    type InternalUpdate = String;
    type ExternalUpdate = String;
    type ReturnValue = String;

    fn read(&self, key: &u64) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        self.reads_seen.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_reads_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err("simulated storage read failure".into());
        }
        Ok(self.storage.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    fn write(&self, key: &u64, value: &String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.writes_seen.fetch_add(1, Ordering::SeqCst);
        self.write_log.lock().unwrap().push((*key, value.clone()));
        self.storage.lock().unwrap().insert(*key, value.clone());
        Ok(())
    }

    fn to_cache_value(&self, read: String) -> String {
        read
    }

    fn to_storage_write(&self, value: &String) -> String {
        value.clone()
    }

    fn apply_internal_update(&self, current: &String, update: &String) -> (String, String) {
        let new_value = format!("{current}{update}");
        (new_value.clone(), new_value)
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

/// Config scaled so virtual-ms timings in the scenarios below complete in
/// a handful of real milliseconds: a high `time_factor` on `SystemClock`
/// makes virtual time elapse faster than real time without touching any
/// engine timing logic.
fn fast_config() -> CacheConfig {
    CacheConfig {
        main_queue_cache_time: Duration::from_millis(100),
        main_queue_cache_time_min: Duration::from_millis(10),
        return_queue_cache_time_min: Duration::from_millis(50),
        max_sleep_time: Duration::from_millis(5),
        ..CacheConfig::default()
    }
}

fn fast_clock() -> Arc<dyn rscache::Clock> {
    Arc::new(rscache::SystemClock::with_time_factor(50.0))
}

#[test]
fn initial_load_happy_path() {
    let adapter = Arc::new(TestAdapter::with_seed(1, "v1"));
    let cache = Cache::builder(SharedAdapter(adapter.clone()))
        .clock(fast_clock())
        .config(fast_config())
        .build();
    cache.start().unwrap();

    let value = cache.read_for(&1, Duration::from_secs(2)).unwrap();
    assert_eq!(value, Some("v1".to_string()));
    assert_eq!(adapter.reads_seen.load(Ordering::SeqCst), 1);

    cache.shutdown_for(Duration::from_millis(500)).unwrap();
}

#[test]
fn initial_read_failure_removes_entry_with_remove_policy() {
    let adapter = Arc::new(TestAdapter::failing_reads(2));
    let cache = Cache::builder(SharedAdapter(adapter.clone()))
        .clock(fast_clock())
        .config(CacheConfig {
            read_failure_max_retry_count: 1,
            initial_read_failed_final_action: rscache::config::InitialReadFailedFinalAction::RemoveFromCache,
            ..fast_config()
        })
        .build();
    cache.start().unwrap();

    let result = cache.read_for_or_exception(&1, Duration::from_secs(2));
    assert!(matches!(result, Err(CacheError::ElementFailedLoading { .. })));
    assert_eq!(adapter.reads_seen.load(Ordering::SeqCst), 2);

    assert!(cache.shutdown_for(Duration::from_millis(500)).unwrap());
}

#[test]
fn bounded_update_capacity_disables_collection_but_completes_the_call() {
    let adapter = Arc::new(TestAdapter::with_seed(1, "v0"));
    let cache = Cache::builder(SharedAdapter(adapter.clone()))
        .clock(fast_clock())
        .config(CacheConfig {
            max_updates_to_collect: 2,
            main_queue_cache_time: Duration::from_secs(3600),
            ..fast_config()
        })
        .build();
    cache.start().unwrap();
    cache.read_for(&1, Duration::from_secs(2)).unwrap();

    assert!(cache.write_if_cached(&1, "u1".to_string()).unwrap());
    assert!(cache.write_if_cached(&1, "u2".to_string()).unwrap());
    assert!(cache.write_if_cached(&1, "u3".to_string()).unwrap());

    let value = cache.read_if_cached(&1).unwrap();
    assert_eq!(value, Some("v0u1u2u3".to_string()));

    cache.shutdown_for(Duration::from_millis(500)).unwrap();
}

#[test]
fn flush_spooldown_drains_every_pending_write() {
    let adapter = Arc::new(TestAdapter::new());
    let cache = Cache::builder(SharedAdapter(adapter.clone()))
        .clock(fast_clock())
        .config(fast_config())
        .build();
    cache.start().unwrap();

    for key in 0..50u64 {
        cache.preload(&key).unwrap();
        cache.read_for(&key, Duration::from_secs(2)).unwrap();
        cache.write_if_cached(&key, "x".to_string()).unwrap();
    }

    let drained = cache.flush_for(Duration::from_secs(5)).unwrap();
    assert!(drained);
    assert_eq!(cache.control_state(), rscache::ControlState::Running);

    cache.shutdown_for(Duration::from_millis(500)).unwrap();
}

#[test]
fn hard_size_limit_rejects_admission_past_the_limit() {
    let adapter = Arc::new(TestAdapter::new());
    let cache = Cache::builder(SharedAdapter(adapter.clone()))
        .clock(fast_clock())
        .config(CacheConfig {
            max_cache_elements_hard_limit: 3,
            main_queue_max_target_size: 100,
            ..fast_config()
        })
        .build();
    cache.start().unwrap();

    for key in 0..3u64 {
        cache.preload(&key).unwrap();
    }
    let err = cache.preload(&3).unwrap_err();
    assert!(matches!(err, CacheError::CacheFull { .. }));

    let value = cache.read_for(&0, Duration::from_secs(2)).unwrap();
    assert_eq!(value, Some(String::new()));

    cache.shutdown_for(Duration::from_millis(500)).unwrap();
}

#[test]
fn removed_from_cache_read_status_never_transitions_elsewhere() {
    let adapter = Arc::new(TestAdapter::failing_reads(u32::MAX));
    let cache = Cache::builder(SharedAdapter(adapter.clone()))
        .clock(fast_clock())
        .config(CacheConfig {
            read_failure_max_retry_count: 0,
            initial_read_failed_final_action: rscache::config::InitialReadFailedFinalAction::RemoveFromCache,
            ..fast_config()
        })
        .build();
    cache.start().unwrap();

    let result = cache.read_for_or_exception(&1, Duration::from_secs(2));
    assert!(result.is_err());

    std::thread::sleep(Duration::from_millis(20));
    let reread = cache.read_if_cached(&1).unwrap();
    assert_eq!(reread, None);

    cache.shutdown_for(Duration::from_millis(500)).unwrap();
}

#[test]
fn read_if_cached_is_idempotent_once_data_ready() {
    let adapter = Arc::new(TestAdapter::with_seed(1, "v1"));
    let cache = Cache::builder(SharedAdapter(adapter.clone()))
        .clock(fast_clock())
        .config(fast_config())
        .build();
    cache.start().unwrap();

    cache.read_for(&1, Duration::from_secs(2)).unwrap();
    let a = cache.read_if_cached(&1).unwrap();
    let b = cache.read_if_cached(&1).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, Some("v1".to_string()));

    cache.shutdown_for(Duration::from_millis(500)).unwrap();
}

/// Newtype so the same `Arc<TestAdapter>` can be shared between the test
/// body (to inspect counters) and the cache (which needs an owned
/// `StorageAdapter`), forwarding every SPI method to the shared adapter.
struct SharedAdapter(Arc<TestAdapter>);

impl StorageAdapter for SharedAdapter {
    type Key = u64;
    type CacheValue = String;
    type StorageRead = String;
    type StorageWrite = String;
    type InternalUpdate = String;
    type ExternalUpdate = String;
    type ReturnValue = String;

    fn read(&self, key: &u64) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        self.0.read(key)
    }

    fn write(&self, key: &u64, value: &String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.write(key, value)
    }

    fn to_cache_value(&self, read: String) -> String {
        self.0.to_cache_value(read)
    }

    fn to_storage_write(&self, value: &String) -> String {
        self.0.to_storage_write(value)
    }

    fn apply_internal_update(&self, current: &String, update: &String) -> (String, String) {
        self.0.apply_internal_update(current, update)
    }

    fn apply_external_update(&self, current: &String, update: &String) -> String {
        self.0.apply_external_update(current, update)
    }

    fn split_for_write(
        &self,
        key: &u64,
        value: &String,
        previous_failed_write: Option<&String>,
    ) -> (String, Option<String>) {
        self.0.split_for_write(key, value, previous_failed_write)
    }
}
