//! The three cache tiers.
//!
//! Each tier owns one key namespace and never reads another tier's keys.
//! Reads degrade to a miss on any store or decode failure, and writes are
//! best-effort: a failed write is logged and reported as `false`.

mod batch_cache;
mod rule_cache;
mod symbol_cache;

pub use batch_cache::BatchResultCache;
pub use rule_cache::RuleCache;
pub use symbol_cache::SymbolCache;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::metrics::{CacheOutcome, MetricsRecorder};
use crate::models::CacheTier;
use crate::store::KeyValueStore;

/// Store handle plus metrics shared by the tier implementations.
#[derive(Clone)]
pub(crate) struct TierStore {
    tier: CacheTier,
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<MetricsRecorder>,
}

impl TierStore {
    pub(crate) fn new(
        tier: CacheTier,
        store: Arc<dyn KeyValueStore>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            tier,
            store,
            metrics,
        }
    }

    /// Reads and decodes `key`, recording one sample for the tier.
    pub(crate) async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = Instant::now();
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{} read of '{}' failed, treating as miss: {}", self.tier, key, e);
                self.metrics
                    .record(self.tier, CacheOutcome::Error, started.elapsed());
                return None;
            }
        };

        let Some(raw) = raw else {
            self.metrics
                .record(self.tier, CacheOutcome::Miss, started.elapsed());
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("{} hit for '{}'", self.tier, key);
                self.metrics
                    .record(self.tier, CacheOutcome::Hit, started.elapsed());
                Some(value)
            }
            Err(e) => {
                warn!("{} entry '{}' is undecodable, treating as miss: {}", self.tier, key, e);
                self.metrics
                    .record(self.tier, CacheOutcome::Error, started.elapsed());
                None
            }
        }
    }

    /// Encodes and writes `value`. Returns whether the write landed.
    pub(crate) async fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{} entry '{}' could not be encoded: {}", self.tier, key, e);
                return false;
            }
        };

        match self.store.set(key, &raw, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{} write of '{}' failed: {}", self.tier, key, e);
                false
            }
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}
