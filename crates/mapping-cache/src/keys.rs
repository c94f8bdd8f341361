//! Canonical cache key construction and validation.
//!
//! Key shapes:
//!
//! ```text
//! l1_best:{provider}:{apiType}:{ruleListType}
//! l1_id:{ruleId}
//! l1_list:{provider}:{apiType}
//! l2:{provider}:{direction}:{symbol}
//! l3:{provider}:{direction}:{md5(sorted symbols)}
//! ```
//!
//! Keys longer than the configured bound, or containing characters outside
//! `[A-Za-z0-9:_-]`, are rejected with [`CacheError::Validation`]. Nothing is
//! rewritten to make it fit.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use log::warn;

use crate::errors::{CacheError, Result};
use crate::models::{ApiType, MappingDirection};

/// Key namespaces that can be enumerated per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyNamespace {
    BestRule,
    ProviderRules,
    Symbol,
    Batch,
}

impl KeyNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::BestRule => "l1_best",
            Self::ProviderRules => "l1_list",
            Self::Symbol => "l2",
            Self::Batch => "l3",
        }
    }

    pub const PROVIDER_SCOPED: [KeyNamespace; 4] = [
        Self::BestRule,
        Self::ProviderRules,
        Self::Symbol,
        Self::Batch,
    ];
}

/// Fixed-capacity record of keys that already passed validation.
///
/// Evicts the oldest entry once full.
#[derive(Debug)]
struct ValidationMemo {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ValidationMemo {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    fn insert(&mut self, key: &str) {
        if self.capacity == 0 || self.seen.contains(key) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.to_string());
        self.seen.insert(key.to_string());
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Builds and validates keys for every tier.
pub struct KeyCodec {
    max_key_length: usize,
    memo: Mutex<ValidationMemo>,
}

impl KeyCodec {
    pub fn new(max_key_length: usize, memo_capacity: usize) -> Self {
        Self {
            max_key_length,
            memo: Mutex::new(ValidationMemo::new(memo_capacity)),
        }
    }

    fn lock_memo(&self) -> MutexGuard<'_, ValidationMemo> {
        self.memo.lock().unwrap_or_else(|poisoned| {
            warn!("Key validation memo mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Validates a complete key.
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.lock_memo().contains(key) {
            return Ok(());
        }

        if key.is_empty() {
            return Err(CacheError::validation("cache key is empty"));
        }
        if key.len() > self.max_key_length {
            return Err(CacheError::validation(format!(
                "cache key exceeds {} bytes ({} bytes)",
                self.max_key_length,
                key.len()
            )));
        }
        if let Some(bad) = key.chars().find(|c| !is_key_char(*c)) {
            return Err(CacheError::validation(format!(
                "cache key '{}' contains invalid character '{}'",
                key, bad
            )));
        }

        self.lock_memo().insert(key);
        Ok(())
    }

    /// Checks a provider identifier before it is embedded in any key or pattern.
    pub fn validate_provider(&self, provider: &str) -> Result<()> {
        if provider.is_empty() {
            return Err(CacheError::validation("provider is empty"));
        }
        if provider.contains(':') {
            return Err(CacheError::validation(format!(
                "provider '{}' must not contain ':'",
                provider
            )));
        }
        if let Some(bad) = provider.chars().find(|c| !is_key_char(*c)) {
            return Err(CacheError::validation(format!(
                "provider '{}' contains invalid character '{}'",
                provider, bad
            )));
        }
        Ok(())
    }

    pub fn best_rule(
        &self,
        provider: &str,
        api_type: ApiType,
        rule_list_type: &str,
    ) -> Result<String> {
        self.validate_provider(provider)?;
        self.checked(format!(
            "l1_best:{}:{}:{}",
            provider, api_type, rule_list_type
        ))
    }

    pub fn rule_by_id(&self, rule_id: &str) -> Result<String> {
        self.checked(format!("l1_id:{}", rule_id))
    }

    pub fn provider_rules(&self, provider: &str, api_type: ApiType) -> Result<String> {
        self.validate_provider(provider)?;
        self.checked(format!("l1_list:{}:{}", provider, api_type))
    }

    pub fn symbol(
        &self,
        provider: &str,
        direction: MappingDirection,
        symbol: &str,
    ) -> Result<String> {
        self.validate_provider(provider)?;
        self.checked(format!("l2:{}:{}:{}", provider, direction, symbol))
    }

    pub fn batch(
        &self,
        provider: &str,
        direction: MappingDirection,
        symbols: &[String],
    ) -> Result<String> {
        self.validate_provider(provider)?;
        self.checked(format!(
            "l3:{}:{}:{}",
            provider,
            direction,
            symbols_digest(symbols)
        ))
    }

    /// Glob pattern matching every key of `namespace` for `provider`.
    pub fn scan_pattern(&self, namespace: KeyNamespace, provider: &str) -> Result<String> {
        self.validate_provider(provider)?;
        let prefix = format!("{}:{}:", namespace.prefix(), provider);
        self.validate(prefix.trim_end_matches(':'))?;
        Ok(format!("{}*", prefix))
    }

    /// Number of keys currently remembered as valid.
    pub fn memo_len(&self) -> usize {
        self.lock_memo().len()
    }

    fn checked(&self, key: String) -> Result<String> {
        self.validate(&key)?;
        Ok(key)
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-'
}

/// Order-independent digest of a symbol list: md5 over the sorted,
/// de-duplicated symbols joined with `,`.
pub fn symbols_digest(symbols: &[String]) -> String {
    let mut sorted: Vec<&str> = symbols.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    format!("{:x}", md5::compute(sorted.join(",")))
}
