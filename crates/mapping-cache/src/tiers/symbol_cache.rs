//! L2: single symbol mappings, keyed by direction.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::TierStore;
use crate::keys::KeyCodec;
use crate::metrics::MetricsRecorder;
use crate::models::{CacheTier, MappingDirection};
use crate::store::KeyValueStore;

/// Caches `symbol -> mapped symbol` per provider and direction.
///
/// There is no default direction; every call names one. Symbols that cannot
/// form a valid key are neither read nor written.
pub struct SymbolCache {
    inner: TierStore,
    codec: Arc<KeyCodec>,
    ttl: Duration,
}

impl SymbolCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<KeyCodec>,
        metrics: Arc<MetricsRecorder>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: TierStore::new(CacheTier::L2, store, metrics),
            codec,
            ttl,
        }
    }

    /// Whether `symbol` can be cached at all for this provider and direction.
    pub fn is_cacheable(&self, provider: &str, direction: MappingDirection, symbol: &str) -> bool {
        self.codec.symbol(provider, direction, symbol).is_ok()
    }

    pub async fn get(
        &self,
        provider: &str,
        direction: MappingDirection,
        symbol: &str,
    ) -> Option<String> {
        let key = match self.codec.symbol(provider, direction, symbol) {
            Ok(key) => key,
            Err(e) => {
                debug!("Symbol '{}' bypasses L2: {}", symbol, e);
                return None;
            }
        };
        self.inner.read(&key).await
    }

    pub async fn set(
        &self,
        provider: &str,
        direction: MappingDirection,
        symbol: &str,
        mapped: &str,
    ) -> bool {
        match self.codec.symbol(provider, direction, symbol) {
            Ok(key) => self.inner.write(&key, mapped, self.ttl).await,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CacheOutcome, CollectingMetricsSink};
    use crate::store::MockKeyValueStore;

    fn setup() -> (SymbolCache, MockKeyValueStore, CollectingMetricsSink) {
        let store = MockKeyValueStore::new();
        let sink = CollectingMetricsSink::new();
        let cache = SymbolCache::new(
            Arc::new(store.clone()),
            Arc::new(KeyCodec::new(250, 16)),
            Arc::new(MetricsRecorder::new(Arc::new(sink.clone()))),
            Duration::from_secs(60),
        );
        (cache, store, sink)
    }

    #[tokio::test]
    async fn test_directions_are_separate_entries() {
        let (cache, store, _sink) = setup();
        assert!(cache.set("acme", MappingDirection::FromStandard, "AAPL", "AAPL.US").await);

        assert_eq!(
            cache
                .get("acme", MappingDirection::FromStandard, "AAPL")
                .await
                .as_deref(),
            Some("AAPL.US")
        );
        assert!(cache
            .get("acme", MappingDirection::ToStandard, "AAPL")
            .await
            .is_none());
        assert!(store.inner().contains_key("l2:acme:from_standard:AAPL"));
    }

    #[tokio::test]
    async fn test_uncacheable_symbol_skips_store() {
        let (cache, store, sink) = setup();
        assert!(!cache.is_cacheable("acme", MappingDirection::ToStandard, "AAPL.US"));
        assert!(!cache.set("acme", MappingDirection::ToStandard, "AAPL.US", "AAPL").await);
        assert!(cache
            .get("acme", MappingDirection::ToStandard, "AAPL.US")
            .await
            .is_none());

        assert_eq!(store.get_calls(), 0);
        assert_eq!(store.set_calls(), 0);
        assert!(sink.samples().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_is_recorded_as_error() {
        let (cache, store, sink) = setup();
        store.set_fail_get(true);
        assert!(cache
            .get("acme", MappingDirection::ToStandard, "AAPL")
            .await
            .is_none());
        assert_eq!(sink.count(CacheTier::L2, CacheOutcome::Error), 1);
    }
}
