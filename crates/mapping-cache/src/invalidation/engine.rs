//! Executes invalidation plans against the backing store.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;

use super::diff::{plan_invalidation, RuleDiff};
use crate::config::CacheConfig;
use crate::errors::{CacheError, Result};
use crate::keys::{KeyCodec, KeyNamespace};
use crate::models::RuleChange;
use crate::resilience::{BatchDeleter, CircuitBreaker, KeyScanner};
use crate::store::KeyValueStore;
use crate::tiers::BatchResultCache;

/// What one invalidation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    pub provider: String,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub affected_symbols: usize,
    pub l1_keys_deleted: u64,
    pub l2_keys_deleted: u64,
    pub l3_keys_deleted: u64,
    /// L3 was cleared for the whole provider rather than matched per entry.
    pub bulk_l3_clear: bool,
    /// A scan hit its round or key cap, so some entries may remain.
    pub truncated: bool,
}

impl InvalidationReport {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            ..Default::default()
        }
    }
}

/// Upper bound on scan-and-delete passes over one namespace.
const MAX_CLEAR_PASSES: u32 = 8;

/// Evicts cache entries made stale by rule changes.
pub struct InvalidationEngine {
    codec: Arc<KeyCodec>,
    scanner: KeyScanner,
    deleter: BatchDeleter,
    batch_cache: Arc<BatchResultCache>,
    bulk_threshold: usize,
    read_concurrency: usize,
}

impl InvalidationEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<KeyCodec>,
        batch_cache: Arc<BatchResultCache>,
        breaker: Arc<CircuitBreaker>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            codec,
            scanner: KeyScanner::new(store.clone(), breaker, config.scan.clone()),
            deleter: BatchDeleter::new(store, config.batch_delete.clone()),
            batch_cache,
            bulk_threshold: config.invalidation.affected_symbol_threshold,
            read_concurrency: config.batch_delete.max_concurrency.max(1),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.scanner.breaker()
    }

    /// Diffs the old and new rule versions and evicts what changed.
    pub async fn handle_rule_change(&self, change: &RuleChange) -> Result<InvalidationReport> {
        self.codec.validate_provider(&change.provider)?;
        let diff = RuleDiff::compute(&change.old_rules, &change.new_rules);
        self.invalidate_diff(&change.provider, &diff).await
    }

    /// Evicts the L1, L2 and L3 entries touched by `diff`.
    ///
    /// Every stage runs even if an earlier one fails; the first error is
    /// returned afterwards. An empty diff makes no store calls.
    pub async fn invalidate_diff(&self, provider: &str, diff: &RuleDiff) -> Result<InvalidationReport> {
        let mut report = InvalidationReport::new(provider);
        report.added = diff.added.len();
        report.removed = diff.removed.len();
        report.modified = diff.modified.len();

        let plan = plan_invalidation(&self.codec, provider, diff, self.bulk_threshold);
        if plan.is_empty() {
            debug!("No material rule changes for provider '{}'", provider);
            return Ok(report);
        }
        report.affected_symbols = plan.affected_symbols.len();
        report.bulk_l3_clear = plan.bulk_l3;

        let mut first_error: Option<CacheError> = None;

        match self.deleter.delete(plan.l1_keys).await {
            Ok(deleted) => report.l1_keys_deleted = deleted.deleted,
            Err(e) => record_error(&mut first_error, "L1", provider, e),
        }
        match self.deleter.delete(plan.l2_keys).await {
            Ok(deleted) => report.l2_keys_deleted = deleted.deleted,
            Err(e) => record_error(&mut first_error, "L2", provider, e),
        }

        let l3 = if plan.bulk_l3 {
            info!(
                "{} affected symbols for '{}' exceed threshold {}, clearing L3",
                report.affected_symbols, provider, self.bulk_threshold
            );
            self.clear_namespace(KeyNamespace::Batch, provider).await
        } else {
            self.invalidate_matching_batches(provider, &plan.affected_symbols)
                .await
        };
        match l3 {
            Ok(cleared) => {
                report.l3_keys_deleted = cleared.deleted;
                report.truncated = cleared.truncated;
                report.bulk_l3_clear |= cleared.bulk;
            }
            Err(e) => record_error(&mut first_error, "L3", provider, e),
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        info!(
            "Invalidated provider '{}': +{} -{} ~{} rules, L1 {} / L2 {} / L3 {} keys",
            provider,
            report.added,
            report.removed,
            report.modified,
            report.l1_keys_deleted,
            report.l2_keys_deleted,
            report.l3_keys_deleted
        );
        Ok(report)
    }

    /// Clears every L1 best/list, L2 and L3 entry of a provider.
    ///
    /// Stops at the first failing namespace so a struggling store is not
    /// hit with further scans.
    pub async fn invalidate_provider(&self, provider: &str) -> Result<InvalidationReport> {
        self.codec.validate_provider(provider)?;
        let mut report = InvalidationReport::new(provider);
        report.bulk_l3_clear = true;

        for namespace in KeyNamespace::PROVIDER_SCOPED {
            let Cleared {
                deleted, truncated, ..
            } = self.clear_namespace(namespace, provider).await?;
            report.truncated |= truncated;
            match namespace {
                KeyNamespace::BestRule | KeyNamespace::ProviderRules => {
                    report.l1_keys_deleted += deleted
                }
                KeyNamespace::Symbol => report.l2_keys_deleted += deleted,
                KeyNamespace::Batch => report.l3_keys_deleted += deleted,
            }
        }

        info!(
            "Cleared provider '{}': L1 {} / L2 {} / L3 {} keys",
            provider, report.l1_keys_deleted, report.l2_keys_deleted, report.l3_keys_deleted
        );
        Ok(report)
    }

    /// Deletes the `l1_id` entry of one rule.
    pub async fn evict_rule_by_id(&self, rule_id: &str) -> Result<u64> {
        let key = self.codec.rule_by_id(rule_id)?;
        Ok(self.deleter.delete(vec![key]).await?.deleted)
    }

    /// Scans and deletes until a pass is no longer truncated by the scan caps.
    ///
    /// Deleted keys drop out of the next scan, so each pass reaches further
    /// into the namespace.
    async fn clear_namespace(&self, namespace: KeyNamespace, provider: &str) -> Result<Cleared> {
        let pattern = self.codec.scan_pattern(namespace, provider)?;
        let mut cleared = Cleared::default();
        let mut passes = 0;

        while passes < MAX_CLEAR_PASSES {
            passes += 1;
            let outcome = self.scanner.scan(&pattern).await?;
            let scanned = outcome.keys.len();
            cleared.deleted += self.deleter.delete(outcome.keys).await?.deleted;
            if !outcome.truncated {
                return Ok(cleared);
            }
            cleared.truncated = true;
            if scanned == 0 {
                break;
            }
            debug!(
                "Scan of '{}' truncated on pass {}, {} keys deleted so far",
                pattern, passes, cleared.deleted
            );
        }

        warn!("Keys of '{}' may remain after {} passes", pattern, passes);
        Err(CacheError::ScanIncomplete { pattern, passes })
    }

    async fn invalidate_matching_batches(
        &self,
        provider: &str,
        affected: &HashSet<String>,
    ) -> Result<Cleared> {
        let pattern = self.codec.scan_pattern(KeyNamespace::Batch, provider)?;
        let outcome = self.scanner.scan(&pattern).await?;
        let truncated = outcome.truncated;

        let batch_cache = &self.batch_cache;
        let stale: Vec<String> = stream::iter(outcome.keys)
            .map(|key| async move {
                let stale = match batch_cache.involved_symbols(&key).await {
                    Ok(Some(involved)) => involved.iter().any(|s| affected.contains(s)),
                    Ok(None) => false,
                    Err(e) => {
                        // Unreadable index: evict rather than risk serving a stale entry.
                        debug!("Cannot read index of '{}', evicting: {}", key, e);
                        true
                    }
                };
                stale.then_some(key)
            })
            .buffer_unordered(self.read_concurrency)
            .filter_map(|key| async move { key })
            .collect()
            .await;

        debug!(
            "{} L3 entries of '{}' intersect {} affected symbols",
            stale.len(),
            provider,
            affected.len()
        );
        let deleted = self.deleter.delete(stale).await?.deleted;
        if !truncated {
            return Ok(Cleared {
                deleted,
                truncated: false,
                bulk: false,
            });
        }

        // Entries past the scan cap were never checked; only a full clear covers them.
        warn!(
            "L3 scan of '{}' hit its cap, clearing the namespace instead",
            provider
        );
        let mut cleared = self.clear_namespace(KeyNamespace::Batch, provider).await?;
        cleared.deleted += deleted;
        cleared.truncated = true;
        cleared.bulk = true;
        Ok(cleared)
    }
}

/// Result of clearing keys in one namespace.
#[derive(Debug, Default)]
struct Cleared {
    deleted: u64,
    /// At least one scan hit its cap.
    truncated: bool,
    /// The whole namespace was cleared.
    bulk: bool,
}

fn record_error(slot: &mut Option<CacheError>, tier: &str, provider: &str, error: CacheError) {
    warn!("{} invalidation for '{}' failed: {}", tier, provider, error);
    if slot.is_none() {
        *slot = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::metrics::MetricsRecorder;
    use crate::models::{ApiType, BatchMappingResult, MappingDirection, MappingRule};
    use crate::store::MockKeyValueStore;

    const TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        store: MockKeyValueStore,
        batch_cache: Arc<BatchResultCache>,
        engine: InvalidationEngine,
    }

    fn fixture(threshold: usize) -> Fixture {
        let mut config = CacheConfig::default();
        config.invalidation.affected_symbol_threshold = threshold;
        fixture_with(config)
    }

    fn fixture_with(config: CacheConfig) -> Fixture {
        let store = MockKeyValueStore::new();
        let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
        let codec = Arc::new(KeyCodec::new(250, 64));
        let batch_cache = Arc::new(BatchResultCache::new(
            shared.clone(),
            codec.clone(),
            Arc::new(MetricsRecorder::default()),
            TTL,
        ));
        let engine = InvalidationEngine::new(
            shared,
            codec,
            batch_cache.clone(),
            Arc::new(CircuitBreaker::new()),
            &config,
        );
        Fixture {
            store,
            batch_cache,
            engine,
        }
    }

    fn rule(id: &str, standard: &str, sdk: &str) -> MappingRule {
        MappingRule {
            id: id.to_string(),
            provider: "acme".to_string(),
            api_type: ApiType::Rest,
            rule_list_type: "symbol_mapping".to_string(),
            standard_symbol: standard.to_string(),
            sdk_symbol: sdk.to_string(),
            market: "US".to_string(),
            symbol_type: "stock".to_string(),
            is_active: true,
            description: None,
        }
    }

    async fn cache_batch(fx: &Fixture, mapped: &[(&str, &str)], failed: &[&str]) -> String {
        let result = BatchMappingResult {
            mapping_details: mapped
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect::<BTreeMap<_, _>>(),
            failed_symbols: failed.iter().map(|s| s.to_string()).collect(),
            provider: "acme".to_string(),
            direction: MappingDirection::FromStandard,
            total_processed: mapped.len() + failed.len(),
            cache_hits: 0,
            processing_time_ms: 0,
        };
        let symbols: Vec<String> = mapped
            .iter()
            .map(|(a, _)| a.to_string())
            .chain(failed.iter().map(|s| s.to_string()))
            .collect();
        assert!(fx
            .batch_cache
            .set("acme", MappingDirection::FromStandard, &symbols, &result)
            .await);
        fx.store
            .inner()
            .keys()
            .into_iter()
            .find(|k| k.ends_with(&crate::keys::symbols_digest(&symbols)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_added_rule_evicts_batch_via_failed_symbols() {
        let fx = fixture(100);
        let stale = cache_batch(&fx, &[("AAPL", "AAPL_US")], &["INVALID"]).await;
        let unrelated = cache_batch(&fx, &[("MSFT", "MSFT_US")], &[]).await;
        fx.store
            .inner()
            .set("l1_best:acme:rest:symbol_mapping", "{}", TTL)
            .await
            .unwrap();
        fx.store
            .inner()
            .set("l2:acme:from_standard:INVALID", "\"X\"", TTL)
            .await
            .unwrap();

        let change = RuleChange {
            provider: "acme".to_string(),
            old_rules: vec![rule("1", "AAPL", "AAPL_US")],
            new_rules: vec![rule("1", "AAPL", "AAPL_US"), rule("2", "INVALID", "INVALID_US")],
        };
        let report = fx.engine.handle_rule_change(&change).await.unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.affected_symbols, 2);
        assert_eq!(report.l1_keys_deleted, 1);
        assert_eq!(report.l2_keys_deleted, 1);
        assert_eq!(report.l3_keys_deleted, 1);
        assert!(!report.bulk_l3_clear);
        assert!(!fx.store.inner().contains_key(&stale));
        assert!(fx.store.inner().contains_key(&unrelated));
    }

    #[tokio::test]
    async fn test_match_on_mapped_value() {
        let fx = fixture(100);
        let stale = cache_batch(&fx, &[("SAP", "SAP_DE")], &[]).await;

        let mut moved = rule("3", "OTHER", "SAP_DE");
        let old = vec![moved.clone()];
        moved.symbol_type = "adr".to_string();
        let change = RuleChange {
            provider: "acme".to_string(),
            old_rules: old,
            new_rules: vec![moved],
        };
        fx.engine.handle_rule_change(&change).await.unwrap();
        assert!(!fx.store.inner().contains_key(&stale));
    }

    #[tokio::test]
    async fn test_empty_diff_makes_no_store_calls() {
        let fx = fixture(100);
        let mut edited = rule("1", "AAPL", "AAPL_US");
        let old = vec![edited.clone()];
        edited.description = Some("note".to_string());
        fx.store.reset_counters();

        let report = fx
            .engine
            .handle_rule_change(&RuleChange {
                provider: "acme".to_string(),
                old_rules: old,
                new_rules: vec![edited],
            })
            .await
            .unwrap();

        assert_eq!(report.affected_symbols, 0);
        assert_eq!(fx.store.scan_calls(), 0);
        assert_eq!(fx.store.delete_calls(), 0);
        assert_eq!(fx.store.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_bulk_clear_above_threshold() {
        let fx = fixture(1);
        let a = cache_batch(&fx, &[("AAPL", "AAPL_US")], &[]).await;
        let b = cache_batch(&fx, &[("MSFT", "MSFT_US")], &[]).await;

        let change = RuleChange {
            provider: "acme".to_string(),
            old_rules: vec![],
            new_rules: vec![rule("9", "NEW", "NEW_US")],
        };
        fx.store.reset_counters();
        let report = fx.engine.handle_rule_change(&change).await.unwrap();

        assert!(report.bulk_l3_clear);
        assert_eq!(report.l3_keys_deleted, 2);
        assert_eq!(fx.store.get_calls(), 0);
        assert!(!fx.store.inner().contains_key(&a));
        assert!(!fx.store.inner().contains_key(&b));
    }

    #[tokio::test]
    async fn test_invalidate_provider_clears_all_namespaces() {
        let fx = fixture(100);
        for key in [
            "l1_best:acme:rest:symbol_mapping",
            "l1_list:acme:rest",
            "l2:acme:to_standard:AAPL_US",
            "l3:acme:from_standard:abc",
            "l3:other:from_standard:abc",
            "l1_id:1",
        ] {
            fx.store.inner().set(key, "{}", TTL).await.unwrap();
        }

        let report = fx.engine.invalidate_provider("acme").await.unwrap();
        assert_eq!(report.l1_keys_deleted, 2);
        assert_eq!(report.l2_keys_deleted, 1);
        assert_eq!(report.l3_keys_deleted, 1);
        assert_eq!(
            fx.store.inner().keys(),
            vec!["l1_id:1".to_string(), "l3:other:from_standard:abc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_l3_failure_surfaces_after_l1_and_l2() {
        let fx = fixture(100);
        fx.store
            .inner()
            .set("l2:acme:from_standard:NEW", "\"NEW_US\"", TTL)
            .await
            .unwrap();
        fx.store.set_fail_scan(true);

        let change = RuleChange {
            provider: "acme".to_string(),
            old_rules: vec![],
            new_rules: vec![rule("9", "NEW", "NEW_US")],
        };
        let err = fx.engine.handle_rule_change(&change).await.unwrap_err();
        assert!(err.retry_class().is_retryable());
        assert!(!fx.store.inner().contains_key("l2:acme:from_standard:NEW"));
    }

    #[tokio::test]
    async fn test_unreadable_index_is_evicted() {
        let fx = fixture(100);
        fx.store
            .inner()
            .set("l3:acme:from_standard:corrupt", "not json", TTL)
            .await
            .unwrap();

        let change = RuleChange {
            provider: "acme".to_string(),
            old_rules: vec![],
            new_rules: vec![rule("9", "NEW", "NEW_US")],
        };
        let report = fx.engine.handle_rule_change(&change).await.unwrap();
        assert_eq!(report.l3_keys_deleted, 1);
    }

    #[tokio::test]
    async fn test_invalid_provider_is_rejected() {
        let fx = fixture(100);
        let err = fx.engine.invalidate_provider("ac:me").await.unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }

    #[tokio::test]
    async fn test_capped_scan_still_evicts_every_stale_batch() {
        let mut config = CacheConfig::default();
        config.scan.max_keys = 2;
        let fx = fixture_with(config);
        for mapped in ["AAPL", "MSFT", "TSLA", "NVDA"] {
            cache_batch(&fx, &[(mapped, "X_US")], &["INVALID"]).await;
        }

        let change = RuleChange {
            provider: "acme".to_string(),
            old_rules: vec![],
            new_rules: vec![rule("9", "INVALID", "INVALID_US")],
        };
        let report = fx.engine.handle_rule_change(&change).await.unwrap();

        assert!(report.truncated);
        assert!(report.bulk_l3_clear);
        assert_eq!(report.l3_keys_deleted, 4);
        assert!(fx
            .store
            .inner()
            .keys()
            .iter()
            .all(|k| !k.starts_with("l3:acme:")));
    }

    #[tokio::test]
    async fn test_provider_clear_repeats_capped_scans() {
        let mut config = CacheConfig::default();
        config.scan.max_keys = 2;
        let fx = fixture_with(config);
        for symbol in ["A", "B", "C", "D", "E"] {
            fx.store
                .inner()
                .set(&format!("l2:acme:from_standard:{}", symbol), "\"X\"", TTL)
                .await
                .unwrap();
        }

        let report = fx.engine.invalidate_provider("acme").await.unwrap();
        assert!(report.truncated);
        assert_eq!(report.l2_keys_deleted, 5);
        assert!(fx.store.inner().is_empty());
    }

    #[tokio::test]
    async fn test_clear_gives_up_after_bounded_passes() {
        let mut config = CacheConfig::default();
        config.scan.max_rounds = 2;
        let fx = fixture_with(config);
        fx.store.set_endless_scan(true);

        let err = fx.engine.invalidate_provider("acme").await.unwrap_err();
        assert!(matches!(err, CacheError::ScanIncomplete { .. }));
        assert!(err.retry_class().is_retryable());
    }
}
