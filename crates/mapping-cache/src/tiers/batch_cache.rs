//! L3: whole batch results.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::TierStore;
use crate::errors::Result;
use crate::keys::KeyCodec;
use crate::metrics::MetricsRecorder;
use crate::models::{BatchMappingResult, CacheTier, MappingDirection, StoredBatchResult};
use crate::store::KeyValueStore;

/// Caches complete [`BatchMappingResult`]s keyed by the order-independent
/// digest of the requested symbols.
///
/// Stored records carry an involved-symbols index (mapping keys, mapping
/// values and failed symbols) so invalidation can match them without
/// re-deriving it. That index never leaves this type: reads hand back a
/// freshly built [`BatchMappingResult`].
pub struct BatchResultCache {
    inner: TierStore,
    codec: Arc<KeyCodec>,
    ttl: Duration,
}

impl BatchResultCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<KeyCodec>,
        metrics: Arc<MetricsRecorder>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: TierStore::new(CacheTier::L3, store, metrics),
            codec,
            ttl,
        }
    }

    /// Returns the cached result with `cache_hits` set to every processed
    /// symbol and `processing_time_ms` left at zero for the caller to fill.
    pub async fn get(
        &self,
        provider: &str,
        direction: MappingDirection,
        symbols: &[String],
    ) -> Option<BatchMappingResult> {
        let key = self.codec.batch(provider, direction, symbols).ok()?;
        let stored: StoredBatchResult = self.inner.read(&key).await?;
        if stored.provider != provider || stored.direction != direction {
            warn!("L3 entry '{}' belongs to another request, ignoring", key);
            return None;
        }
        Some(stored.to_public(stored.total_processed, 0))
    }

    pub async fn set(
        &self,
        provider: &str,
        direction: MappingDirection,
        symbols: &[String],
        result: &BatchMappingResult,
    ) -> bool {
        match self.codec.batch(provider, direction, symbols) {
            Ok(key) => {
                let stored = StoredBatchResult::from_result(result);
                self.inner.write(&key, &stored, self.ttl).await
            }
            Err(e) => {
                debug!("Batch result not cached: {}", e);
                false
            }
        }
    }

    /// Involved-symbols index of the record at `key`, for invalidation.
    ///
    /// Unlike [`get`](Self::get), store errors propagate and nothing is
    /// recorded as a cache sample.
    pub async fn involved_symbols(&self, key: &str) -> Result<Option<BTreeSet<String>>> {
        let Some(raw) = self.inner.store().get(key).await? else {
            return Ok(None);
        };
        let stored: StoredBatchResult = serde_json::from_str(&raw)?;
        Ok(Some(stored.involved_symbols))
    }
}
