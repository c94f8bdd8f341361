//! `MappingService`: the read path and the public invalidation operations.
//!
//! A mapping call probes L3 for the whole request, then L2 per symbol, and
//! resolves what is left from the L1 rule cache or the rule store. Results
//! are written back to L2 and L3 on a best-effort basis; callers only ever
//! see validation errors or rule-source errors.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::CacheConfig;
use crate::errors::{CacheError, Result};
use crate::invalidation::{
    start_invalidation_worker, InvalidationEngine, InvalidationQueue, InvalidationReport, RuleDiff,
};
use crate::keys::KeyCodec;
use crate::metrics::{MetricsRecorder, MetricsSink, StatsSnapshot};
use crate::models::{
    ApiType, BatchMappingResult, MappingDirection, MappingRule, MappingRuleSet, RuleChange,
};
use crate::resilience::{CircuitBreaker, CircuitMetrics};
use crate::rules::RuleStore;
use crate::scheduler::{start_stats_reporter, BackgroundTask};
use crate::store::KeyValueStore;
use crate::tiers::{BatchResultCache, RuleCache, SymbolCache};

/// Outcome of [`MappingService::warmup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    pub rules: usize,
    pub skipped_rules: usize,
    /// Rule lists the rule store failed to return; their L1 entries stay cold.
    pub unloaded_lists: usize,
    pub attempted_writes: usize,
    pub written: usize,
}

/// Facade over the three cache tiers, the rule store and invalidation.
pub struct MappingService {
    config: CacheConfig,
    codec: Arc<KeyCodec>,
    rule_store: Arc<dyn RuleStore>,
    rule_cache: RuleCache,
    symbol_cache: SymbolCache,
    batch_cache: Arc<BatchResultCache>,
    engine: Arc<InvalidationEngine>,
    metrics: Arc<MetricsRecorder>,
    queue: InvalidationQueue,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<RuleChange>>>,
}

impl MappingService {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn KeyValueStore>,
        rule_store: Arc<dyn RuleStore>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let codec = Arc::new(KeyCodec::new(
            config.max_key_length,
            config.key_memo_capacity,
        ));
        let metrics = Arc::new(MetricsRecorder::new(sink));
        let breaker = Arc::new(CircuitBreaker::with_config(config.breaker.clone()));

        let rule_cache = RuleCache::new(
            store.clone(),
            codec.clone(),
            metrics.clone(),
            config.ttl.clone(),
        );
        let symbol_cache = SymbolCache::new(
            store.clone(),
            codec.clone(),
            metrics.clone(),
            config.ttl.symbol,
        );
        let batch_cache = Arc::new(BatchResultCache::new(
            store.clone(),
            codec.clone(),
            metrics.clone(),
            config.ttl.batch_result,
        ));
        let engine = Arc::new(InvalidationEngine::new(
            store,
            codec.clone(),
            batch_cache.clone(),
            breaker,
            &config,
        ));
        let (queue, rx) = InvalidationQueue::channel();

        Self {
            config,
            codec,
            rule_store,
            rule_cache,
            symbol_cache,
            batch_cache,
            engine,
            metrics,
            queue,
            queue_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.metrics.snapshot()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.engine.breaker()
    }

    pub fn breaker_metrics(&self) -> CircuitMetrics {
        self.engine.breaker().metrics()
    }

    /// Spawns the invalidation worker and the stats reporter.
    ///
    /// The worker is only started once; later calls just add a reporter.
    pub fn start_background(&self) -> Vec<BackgroundTask> {
        let mut tasks = Vec::with_capacity(2);
        let rx = self
            .queue_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match rx {
            Some(rx) => tasks.push(start_invalidation_worker(
                self.engine.clone(),
                rx,
                self.config.invalidation.clone(),
            )),
            None => warn!("Invalidation worker already started"),
        }
        tasks.push(start_stats_reporter(
            self.metrics.clone(),
            self.config.stats_interval,
        ));
        tasks
    }

    /// Maps `symbols` for `provider` in the given direction.
    ///
    /// Symbols are trimmed, blanks dropped and duplicates removed (first
    /// occurrence wins) before lookup. Every remaining symbol ends up either
    /// in `mapping_details` or in `failed_symbols`.
    pub async fn map_symbols(
        &self,
        provider: &str,
        symbols: &[String],
        direction: MappingDirection,
        request_id: &str,
    ) -> Result<BatchMappingResult> {
        let started = Instant::now();
        self.codec.validate_provider(provider)?;
        let symbols = self.normalize(symbols)?;

        let mut result = BatchMappingResult::empty(provider, direction);
        if symbols.is_empty() {
            return Ok(result);
        }
        result.total_processed = symbols.len();

        if !self.config.enabled {
            self.metrics.record_cache_disabled("cache feature flag off");
            let (mapped, failed) = self
                .resolve_from_rules(provider, direction, &symbols, false)
                .await?;
            result.mapping_details = mapped;
            result.failed_symbols = failed;
            result.processing_time_ms = elapsed_ms(started);
            return Ok(result);
        }

        if let Some(mut cached) = self.batch_cache.get(provider, direction, &symbols).await {
            cached.processing_time_ms = elapsed_ms(started);
            debug!(
                "[{}] L3 hit for {} {} symbol(s) of '{}'",
                request_id,
                symbols.len(),
                direction,
                provider
            );
            return Ok(cached);
        }

        let lookups = join_all(
            symbols
                .iter()
                .map(|s| self.symbol_cache.get(provider, direction, s)),
        )
        .await;

        let mut misses = Vec::new();
        for (symbol, cached) in symbols.iter().zip(lookups) {
            match cached {
                Some(mapped) => {
                    result.mapping_details.insert(symbol.clone(), mapped);
                    result.cache_hits += 1;
                }
                None => misses.push(symbol.clone()),
            }
        }

        if !misses.is_empty() {
            let (mapped, failed) = self
                .resolve_from_rules(provider, direction, &misses, true)
                .await?;

            join_all(
                mapped
                    .iter()
                    .map(|(from, to)| self.symbol_cache.set(provider, direction, from, to)),
            )
            .await;

            result.mapping_details.extend(mapped);
            result.failed_symbols = failed;
        }

        self.batch_cache
            .set(provider, direction, &symbols, &result)
            .await;

        result.processing_time_ms = elapsed_ms(started);
        debug!(
            "[{}] Mapped {}/{} symbol(s) for '{}' {} ({} from L2) in {}ms",
            request_id,
            result.mapping_details.len(),
            result.total_processed,
            provider,
            direction,
            result.cache_hits,
            result.processing_time_ms
        );
        Ok(result)
    }

    /// Clears every cached entry of `provider` across all tiers.
    pub async fn invalidate_provider(&self, provider: &str) -> Result<InvalidationReport> {
        self.engine.invalidate_provider(provider).await
    }

    /// Evicts `l1_id:{rule_id}` and everything the rule's symbols touch.
    ///
    /// The rule body comes from `rule` when given, else from the L1 copy,
    /// else from the rule store.
    pub async fn invalidate_rule(
        &self,
        rule_id: &str,
        rule: Option<MappingRule>,
    ) -> Result<InvalidationReport> {
        self.codec.rule_by_id(rule_id)?;

        let mut body = rule;
        if body.is_none() {
            body = self.rule_cache.get_rule_by_id(rule_id).await;
        }
        self.engine.evict_rule_by_id(rule_id).await?;
        if body.is_none() {
            body = self
                .rule_store
                .rule_by_id(rule_id)
                .await
                .map_err(upstream)?;
        }

        let rule = body.ok_or_else(|| CacheError::RuleNotFound(rule_id.to_string()))?;
        if rule.id != rule_id {
            warn!(
                "Rule body for '{}' carries id '{}', invalidating its symbols anyway",
                rule_id, rule.id
            );
        }
        let provider = rule.provider.clone();
        self.engine
            .invalidate_diff(&provider, &RuleDiff::single(rule))
            .await
    }

    /// Preloads L1 and L2 for the given rules.
    ///
    /// Rules by id and L2 pairs come from `rules` directly. Best-rule sets and
    /// provider lists are always fetched whole from the rule store for each
    /// list the rules belong to, so warming a subset never caches a partial
    /// set.
    ///
    /// Fails with `CacheUnavailable` only when every attempted write failed.
    pub async fn warmup(&self, rules: &[MappingRule]) -> Result<WarmupReport> {
        let mut report = WarmupReport {
            rules: rules.len(),
            ..Default::default()
        };
        if !self.config.enabled {
            self.metrics.record_cache_disabled("warmup skipped");
            return Ok(report);
        }

        let mut rule_lists: BTreeSet<(String, ApiType, String)> = BTreeSet::new();
        let mut providers: BTreeSet<(String, ApiType)> = BTreeSet::new();
        for rule in rules {
            let cacheable = self
                .codec
                .best_rule(&rule.provider, rule.api_type, &rule.rule_list_type)
                .and_then(|_| self.codec.rule_by_id(&rule.id));
            if let Err(e) = cacheable {
                warn!("Warmup skipping rule '{}': {}", rule.id, e);
                report.skipped_rules += 1;
                continue;
            }
            rule_lists.insert((rule.provider.clone(), rule.api_type, rule.rule_list_type.clone()));
            providers.insert((rule.provider.clone(), rule.api_type));

            tally(&mut report, self.rule_cache.set_rule_by_id(rule).await);
            if !rule.is_active {
                continue;
            }
            for direction in MappingDirection::ALL {
                let source = rule.source_symbol(direction);
                if !self
                    .symbol_cache
                    .is_cacheable(&rule.provider, direction, source)
                {
                    continue;
                }
                let written = self
                    .symbol_cache
                    .set(&rule.provider, direction, source, rule.target_symbol(direction))
                    .await;
                tally(&mut report, written);
            }
        }

        for (provider, api_type, rule_list_type) in rule_lists {
            match self
                .rule_store
                .best_rule_set(&provider, api_type, &rule_list_type)
                .await
            {
                Ok(Some(rule_set)) => {
                    tally(&mut report, self.rule_cache.set_best_rule(&rule_set).await)
                }
                Ok(None) => debug!(
                    "No {} '{}' rule set for '{}' to warm",
                    api_type, rule_list_type, provider
                ),
                Err(e) => {
                    warn!(
                        "Warmup could not load {} '{}' rules for '{}': {}",
                        api_type, rule_list_type, provider, e
                    );
                    report.unloaded_lists += 1;
                }
            }
        }

        for (provider, api_type) in providers {
            match self.rule_store.provider_rules(&provider, api_type).await {
                Ok(rules) if rules.is_empty() => {}
                Ok(rules) => {
                    let written = self
                        .rule_cache
                        .set_provider_rules(&provider, api_type, &rules)
                        .await;
                    tally(&mut report, written);
                }
                Err(e) => {
                    warn!(
                        "Warmup could not load {} rules of '{}': {}",
                        api_type, provider, e
                    );
                    report.unloaded_lists += 1;
                }
            }
        }

        if report.attempted_writes > 0 && report.written == 0 {
            return Err(CacheError::unavailable(format!(
                "warmup failed: none of {} cache writes succeeded",
                report.attempted_writes
            )));
        }
        info!(
            "Warmup wrote {}/{} cache entries for {} rule(s)",
            report.written, report.attempted_writes, report.rules
        );
        Ok(report)
    }

    /// Queues a rule change for the background invalidation worker.
    pub fn notify_rule_change(&self, change: RuleChange) -> Result<()> {
        self.queue.notify(change)
    }

    /// Runs invalidation for a rule change on the caller's task.
    pub async fn apply_rule_change(&self, change: &RuleChange) -> Result<InvalidationReport> {
        self.engine.handle_rule_change(change).await
    }

    fn normalize(&self, symbols: &[String]) -> Result<Vec<String>> {
        let mut seen = HashSet::with_capacity(symbols.len());
        let mut normalized = Vec::with_capacity(symbols.len());
        for raw in symbols {
            let symbol = raw.trim();
            if symbol.is_empty() {
                continue;
            }
            if symbol.len() > self.config.max_key_length {
                return Err(CacheError::Validation(format!(
                    "symbol of {} bytes exceeds {} byte limit",
                    symbol.len(),
                    self.config.max_key_length
                )));
            }
            if symbol.chars().any(char::is_whitespace) {
                return Err(CacheError::Validation(format!(
                    "symbol '{}' contains whitespace",
                    symbol
                )));
            }
            if seen.insert(symbol.to_string()) {
                normalized.push(symbol.to_string());
            }
        }
        Ok(normalized)
    }

    /// Resolves `symbols` against the best rule set. Returns the mapped
    /// pairs and the failed symbols in request order.
    async fn resolve_from_rules(
        &self,
        provider: &str,
        direction: MappingDirection,
        symbols: &[String],
        use_cache: bool,
    ) -> Result<(BTreeMap<String, String>, Vec<String>)> {
        let api_type = self.config.default_api_type;
        let rule_list_type = self.config.default_rule_list_type.as_str();

        let cached = if use_cache {
            self.rule_cache
                .get_best_rule(provider, api_type, rule_list_type)
                .await
        } else {
            None
        };
        let rule_set = match cached {
            Some(set) => Some(set),
            None => {
                let fetched = self
                    .rule_store
                    .best_rule_set(provider, api_type, rule_list_type)
                    .await
                    .map_err(upstream)?;
                if use_cache {
                    if let Some(set) = &fetched {
                        self.rule_cache.set_best_rule(set).await;
                    }
                }
                fetched
            }
        };

        let Some(rule_set) = rule_set else {
            debug!(
                "No {} '{}' rules for provider '{}'",
                api_type, rule_list_type, provider
            );
            return Ok((BTreeMap::new(), symbols.to_vec()));
        };

        let lookup = rule_set.lookup(direction);
        let mut mapped = BTreeMap::new();
        let mut failed = Vec::new();
        for symbol in symbols {
            match lookup.get(symbol.as_str()) {
                Some(target) => {
                    mapped.insert(symbol.clone(), (*target).to_string());
                }
                None => failed.push(symbol.clone()),
            }
        }
        Ok((mapped, failed))
    }
}

fn tally(report: &mut WarmupReport, written: bool) {
    report.attempted_writes += 1;
    if written {
        report.written += 1;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Rule store failures reach callers as `RuleSource`.
fn upstream(error: CacheError) -> CacheError {
    match error {
        CacheError::RuleSource(_) => error,
        other => CacheError::RuleSource(other.to_string()),
    }
}
