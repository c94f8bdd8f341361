use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{InMemoryStore, KeyValueStore, ScanPage};
use crate::errors::{CacheError, Result};

/// Mock store for testing - wraps an [`InMemoryStore`] and adds fault
/// injection plus per-operation call counters.
#[derive(Clone, Default)]
pub struct MockKeyValueStore {
    inner: Arc<InMemoryStore>,
    fail_get: Arc<AtomicBool>,
    fail_set: Arc<AtomicBool>,
    fail_scan: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
    fail_delete_matching: Arc<Mutex<Option<String>>>,
    scan_delay: Arc<Mutex<Option<Duration>>>,
    endless_scan: Arc<AtomicBool>,
    get_calls: Arc<AtomicUsize>,
    set_calls: Arc<AtomicUsize>,
    scan_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
}

impl MockKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for direct inspection.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Fails any delete call whose key list contains a key with `needle` in it.
    pub fn fail_deletes_matching(&self, needle: Option<&str>) {
        *self.fail_delete_matching.lock().unwrap() = needle.map(str::to_string);
    }

    /// Sleeps this long inside every scan call.
    pub fn set_scan_delay(&self, delay: Option<Duration>) {
        *self.scan_delay.lock().unwrap() = delay;
    }

    /// Makes scan never report completion (cursor always advances).
    pub fn set_endless_scan(&self, endless: bool) {
        self.endless_scan.store(endless, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        for counter in [
            &self.get_calls,
            &self.set_calls,
            &self.scan_calls,
            &self.delete_calls,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl KeyValueStore for MockKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("Intentional get failure"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("Intentional set failure"));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("Intentional delete failure"));
        }
        let needle = self.fail_delete_matching.lock().unwrap().clone();
        if let Some(needle) = needle {
            if keys.iter().any(|k| k.contains(&needle)) {
                return Err(CacheError::unavailable("Intentional chunk delete failure"));
            }
        }
        self.inner.delete(keys).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.scan_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("Intentional scan failure"));
        }
        if self.endless_scan.load(Ordering::SeqCst) {
            return Ok(ScanPage {
                cursor: cursor + 1,
                keys: Vec::new(),
            });
        }
        self.inner.scan(cursor, pattern, count).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire(key, ttl).await
    }
}
