use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::warn;

use super::{glob_match, KeyValueStore, ScanPage};
use crate::errors::Result;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process, TTL-aware store.
///
/// Keys are kept sorted so a scan cursor is simply an offset into the key
/// order. Used by the worker binary and by tests; it is owned by whoever
/// creates it.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, StoredValue>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredValue>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("In-memory store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredValue>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("In-memory store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Live keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.read()
            .iter()
            .filter(|(_, v)| v.is_live(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.read().get(key).is_some_and(|v| v.is_live(now))
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, v| v.is_live(now));
        before - entries.len()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let expired = {
            let entries = self.read();
            match entries.get(key) {
                Some(v) if v.is_live(now) => return Ok(Some(v.value.clone())),
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.write().remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.write().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.write();
        let mut removed = 0u64;
        for key in keys {
            if let Some(v) = entries.remove(key) {
                if v.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let now = Instant::now();
        let entries = self.read();
        let start = cursor as usize;
        let count = count.max(1);

        let keys = entries
            .iter()
            .skip(start)
            .take(count)
            .filter(|(k, v)| v.is_live(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();

        let next = start + count;
        let cursor = if next >= entries.len() { 0 } else { next as u64 };
        Ok(ScanPage { cursor, keys })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.write();
        match entries.get_mut(key) {
            Some(v) if v.is_live(now) => {
                v.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
