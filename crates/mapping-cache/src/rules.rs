//! Authoritative rule source abstraction.
//!
//! The rule store owns every [`MappingRule`]. The cache only reads from it
//! on L1 misses and is told about edits through [`RuleChange`] notifications.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use log::{info, warn};

use crate::errors::{CacheError, Result};
use crate::models::{ApiType, MappingRule, MappingRuleSet, RuleChange};

/// Read interface to the rule source of truth.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// The rule list that best matches `(provider, api_type, rule_list_type)`,
    /// or `None` when the provider has no such list.
    async fn best_rule_set(
        &self,
        provider: &str,
        api_type: ApiType,
        rule_list_type: &str,
    ) -> Result<Option<MappingRuleSet>>;

    async fn rule_by_id(&self, rule_id: &str) -> Result<Option<MappingRule>>;

    /// Every rule of the provider for the given api type, across rule lists.
    async fn provider_rules(&self, provider: &str, api_type: ApiType) -> Result<Vec<MappingRule>>;
}

/// Rule store backed by an in-process list.
///
/// Mutations return the [`RuleChange`] that a real rule store would publish,
/// so callers can forward it to the invalidation queue.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<Vec<MappingRule>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryRuleStore {
    pub fn new(rules: Vec<MappingRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            ..Default::default()
        }
    }

    /// Loads a JSON array of rules.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::RuleSource(format!("cannot read {}: {}", path.display(), e))
        })?;
        let rules: Vec<MappingRule> = serde_json::from_str(&raw)?;
        info!("Loaded {} mapping rules from {}", rules.len(), path.display());
        Ok(Self::new(rules))
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<MappingRule>> {
        self.rules.read().unwrap_or_else(|poisoned| {
            warn!("Rule store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<MappingRule>> {
        self.rules.write().unwrap_or_else(|poisoned| {
            warn!("Rule store lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn all_rules(&self) -> Vec<MappingRule> {
        self.read().clone()
    }

    /// Number of read calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Makes every read fail, simulating an unreachable rule source.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Inserts or replaces a rule (matched by id).
    pub fn upsert(&self, rule: MappingRule) -> RuleChange {
        let provider = rule.provider.clone();
        self.mutate(&provider, |rules| {
            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => rules.push(rule),
            }
        })
    }

    pub fn remove(&self, rule_id: &str) -> Option<RuleChange> {
        let provider = self
            .read()
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.provider.clone())?;
        Some(self.mutate(&provider, |rules| rules.retain(|r| r.id != rule_id)))
    }

    /// Replaces every rule of a provider.
    pub fn replace_provider_rules(&self, provider: &str, new_rules: Vec<MappingRule>) -> RuleChange {
        self.mutate(provider, |rules| {
            rules.retain(|r| r.provider != provider);
            rules.extend(new_rules);
        })
    }

    fn mutate(&self, provider: &str, apply: impl FnOnce(&mut Vec<MappingRule>)) -> RuleChange {
        let mut rules = self.write();
        let old_rules = provider_slice(&rules, provider);
        apply(&mut rules);
        let new_rules = provider_slice(&rules, provider);
        RuleChange {
            provider: provider.to_string(),
            old_rules,
            new_rules,
        }
    }

    fn begin_lookup(&self) -> Result<()> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::RuleSource("rule store unavailable".to_string()));
        }
        Ok(())
    }
}

fn provider_slice(rules: &[MappingRule], provider: &str) -> Vec<MappingRule> {
    rules
        .iter()
        .filter(|r| r.provider == provider)
        .cloned()
        .collect()
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn best_rule_set(
        &self,
        provider: &str,
        api_type: ApiType,
        rule_list_type: &str,
    ) -> Result<Option<MappingRuleSet>> {
        self.begin_lookup()?;
        let rules: Vec<MappingRule> = self
            .read()
            .iter()
            .filter(|r| {
                r.provider == provider
                    && r.api_type == api_type
                    && r.rule_list_type == rule_list_type
            })
            .cloned()
            .collect();

        if rules.is_empty() {
            return Ok(None);
        }
        Ok(Some(MappingRuleSet {
            provider: provider.to_string(),
            api_type,
            rule_list_type: rule_list_type.to_string(),
            rules,
        }))
    }

    async fn rule_by_id(&self, rule_id: &str) -> Result<Option<MappingRule>> {
        self.begin_lookup()?;
        Ok(self.read().iter().find(|r| r.id == rule_id).cloned())
    }

    async fn provider_rules(&self, provider: &str, api_type: ApiType) -> Result<Vec<MappingRule>> {
        self.begin_lookup()?;
        Ok(self
            .read()
            .iter()
            .filter(|r| r.provider == provider && r.api_type == api_type)
            .cloned()
            .collect())
    }
}
