//! L1: rule lookups.

use std::sync::Arc;

use log::debug;

use super::TierStore;
use crate::config::TtlConfig;
use crate::keys::KeyCodec;
use crate::metrics::MetricsRecorder;
use crate::models::{ApiType, CacheTier, MappingRule, MappingRuleSet};
use crate::store::KeyValueStore;

/// Caches the best-matching rule set, single rules by id, and provider
/// rule lists. Each kind has its own TTL.
pub struct RuleCache {
    inner: TierStore,
    codec: Arc<KeyCodec>,
    ttl: TtlConfig,
}

impl RuleCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<KeyCodec>,
        metrics: Arc<MetricsRecorder>,
        ttl: TtlConfig,
    ) -> Self {
        Self {
            inner: TierStore::new(CacheTier::L1, store, metrics),
            codec,
            ttl,
        }
    }

    pub async fn get_best_rule(
        &self,
        provider: &str,
        api_type: ApiType,
        rule_list_type: &str,
    ) -> Option<MappingRuleSet> {
        let key = self.codec.best_rule(provider, api_type, rule_list_type).ok()?;
        self.inner.read(&key).await
    }

    pub async fn set_best_rule(&self, rule_set: &MappingRuleSet) -> bool {
        match self.codec.best_rule(
            &rule_set.provider,
            rule_set.api_type,
            &rule_set.rule_list_type,
        ) {
            Ok(key) => self.inner.write(&key, rule_set, self.ttl.best_rule).await,
            Err(e) => {
                debug!("Best rule set not cached: {}", e);
                false
            }
        }
    }

    pub async fn get_rule_by_id(&self, rule_id: &str) -> Option<MappingRule> {
        let key = self.codec.rule_by_id(rule_id).ok()?;
        self.inner.read(&key).await
    }

    pub async fn set_rule_by_id(&self, rule: &MappingRule) -> bool {
        match self.codec.rule_by_id(&rule.id) {
            Ok(key) => self.inner.write(&key, rule, self.ttl.rule_by_id).await,
            Err(e) => {
                debug!("Rule {} not cached: {}", rule.id, e);
                false
            }
        }
    }

    pub async fn get_provider_rules(
        &self,
        provider: &str,
        api_type: ApiType,
    ) -> Option<Vec<MappingRule>> {
        let key = self.codec.provider_rules(provider, api_type).ok()?;
        self.inner.read(&key).await
    }

    pub async fn set_provider_rules(
        &self,
        provider: &str,
        api_type: ApiType,
        rules: &[MappingRule],
    ) -> bool {
        match self.codec.provider_rules(provider, api_type) {
            Ok(key) => self.inner.write(&key, rules, self.ttl.provider_rules).await,
            Err(e) => {
                debug!("Provider rules not cached: {}", e);
                false
            }
        }
    }
}
