//! Rule version diffing and invalidation planning.
//!
//! Pure functions: nothing here touches the store.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::debug;

use crate::keys::KeyCodec;
use crate::models::{ApiType, MappingDirection, MappingRule};

/// Difference between two versions of a provider's rules, keyed by
/// `standardSymbol:sdkSymbol`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDiff {
    pub added: Vec<MappingRule>,
    pub removed: Vec<MappingRule>,
    /// `(old, new)` pairs whose market, symbol type or active flag changed.
    pub modified: Vec<(MappingRule, MappingRule)>,
}

impl RuleDiff {
    pub fn compute(old_rules: &[MappingRule], new_rules: &[MappingRule]) -> Self {
        let old: BTreeMap<String, &MappingRule> =
            old_rules.iter().map(|r| (r.diff_key(), r)).collect();
        let new: BTreeMap<String, &MappingRule> =
            new_rules.iter().map(|r| (r.diff_key(), r)).collect();

        let mut diff = RuleDiff::default();
        for (key, rule) in &new {
            match old.get(key) {
                None => diff.added.push((*rule).clone()),
                Some(previous) if previous.materially_differs(rule) => {
                    diff.modified.push(((*previous).clone(), (*rule).clone()))
                }
                Some(_) => {}
            }
        }
        for (key, rule) in &old {
            if !new.contains_key(key) {
                diff.removed.push((*rule).clone());
            }
        }
        diff
    }

    /// Diff that treats a single rule as modified in place.
    pub fn single(rule: MappingRule) -> Self {
        Self {
            modified: vec![(rule.clone(), rule)],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Every rule version touched by the diff, old and new.
    pub fn changed_rules(&self) -> impl Iterator<Item = &MappingRule> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.modified.iter().flat_map(|(old, new)| [old, new]))
    }

    /// Both symbols of every changed pair.
    pub fn affected_symbols(&self) -> HashSet<String> {
        self.changed_rules()
            .flat_map(|r| [r.standard_symbol.clone(), r.sdk_symbol.clone()])
            .collect()
    }
}

/// Store operations needed to invalidate one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub l1_keys: Vec<String>,
    pub l2_keys: Vec<String>,
    pub affected_symbols: HashSet<String>,
    /// Clear every L3 entry of the provider instead of matching indexes.
    pub bulk_l3: bool,
}

impl InvalidationPlan {
    pub fn is_empty(&self) -> bool {
        self.l1_keys.is_empty() && self.l2_keys.is_empty() && self.affected_symbols.is_empty()
    }
}

/// Works out which keys a diff invalidates.
///
/// Keys that fail validation are skipped: they can never have been written.
pub fn plan_invalidation(
    codec: &KeyCodec,
    provider: &str,
    diff: &RuleDiff,
    bulk_threshold: usize,
) -> InvalidationPlan {
    if diff.is_empty() {
        return InvalidationPlan::default();
    }

    let mut best_lists: BTreeSet<(ApiType, &str)> = BTreeSet::new();
    let mut api_types: BTreeSet<ApiType> = BTreeSet::new();
    let mut rule_ids: BTreeSet<&str> = BTreeSet::new();
    let mut pairs: BTreeSet<(&str, &str)> = BTreeSet::new();

    for rule in diff.changed_rules() {
        best_lists.insert((rule.api_type, rule.rule_list_type.as_str()));
        api_types.insert(rule.api_type);
        rule_ids.insert(rule.id.as_str());
        pairs.insert((rule.standard_symbol.as_str(), rule.sdk_symbol.as_str()));
    }

    let mut l1_keys = Vec::new();
    l1_keys.extend(
        best_lists
            .iter()
            .filter_map(|(api_type, list)| keep(codec.best_rule(provider, *api_type, list))),
    );
    l1_keys.extend(
        api_types
            .iter()
            .filter_map(|api_type| keep(codec.provider_rules(provider, *api_type))),
    );
    l1_keys.extend(rule_ids.iter().filter_map(|id| keep(codec.rule_by_id(id))));

    let l2_keys = pairs
        .iter()
        .flat_map(|(standard, sdk)| {
            [
                codec.symbol(provider, MappingDirection::FromStandard, standard),
                codec.symbol(provider, MappingDirection::ToStandard, sdk),
            ]
        })
        .filter_map(keep)
        .collect();

    let affected_symbols = diff.affected_symbols();
    let bulk_l3 = affected_symbols.len() > bulk_threshold;

    InvalidationPlan {
        l1_keys,
        l2_keys,
        affected_symbols,
        bulk_l3,
    }
}

fn keep(key: crate::errors::Result<String>) -> Option<String> {
    key.map_err(|e| debug!("Skipping uncacheable key: {}", e)).ok()
}
