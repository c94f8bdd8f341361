//! Runtime configuration.
//!
//! Every knob has a default and can be overridden through a `TM_*`
//! environment variable. Values that fail to parse fall back to the default.

use std::str::FromStr;
use std::time::Duration;

use crate::models::ApiType;
use crate::resilience::CircuitBreakerConfig;

/// Time-to-live per cache entry kind.
#[derive(Clone, Debug)]
pub struct TtlConfig {
    /// L1 best-matching rule set. Shortest of the L1 TTLs.
    pub best_rule: Duration,
    /// L1 provider rule list.
    pub provider_rules: Duration,
    /// L1 rule by id. Longest of the L1 TTLs.
    pub rule_by_id: Duration,
    /// L2 symbol mappings.
    pub symbol: Duration,
    /// L3 batch results.
    pub batch_result: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            best_rule: Duration::from_secs(300),
            provider_rules: Duration::from_secs(1800),
            rule_by_id: Duration::from_secs(7200),
            symbol: Duration::from_secs(3600),
            batch_result: Duration::from_secs(600),
        }
    }
}

/// Bounds for progressive key enumeration.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub initial_count: usize,
    pub min_count: usize,
    pub max_count: usize,
    pub max_rounds: u32,
    pub max_keys: usize,
    pub deadline: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            initial_count: 100,
            min_count: 10,
            max_count: 1000,
            max_rounds: 100,
            max_keys: 10_000,
            deadline: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchDeleteConfig {
    pub chunk_size: usize,
    pub max_concurrency: usize,
}

impl Default for BatchDeleteConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_concurrency: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InvalidationConfig {
    /// Above this many affected symbols, L3 is cleared for the provider in bulk.
    pub affected_symbol_threshold: usize,
    /// Attempts the background worker makes for a retryable failure.
    pub max_retries: u32,
    /// Base delay of the worker's exponential backoff.
    pub retry_base_delay: Duration,
    /// Window for collecting a burst of rule changes before processing.
    pub debounce: Duration,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            affected_symbol_threshold: 100,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            debounce: Duration::from_millis(250),
        }
    }
}

/// Top-level configuration for the mapping cache.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Feature flag. When false, every tier is bypassed.
    pub enabled: bool,
    pub ttl: TtlConfig,
    pub default_api_type: ApiType,
    pub default_rule_list_type: String,
    pub max_key_length: usize,
    pub key_memo_capacity: usize,
    pub breaker: CircuitBreakerConfig,
    pub scan: ScanConfig,
    pub batch_delete: BatchDeleteConfig,
    pub invalidation: InvalidationConfig,
    pub stats_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: TtlConfig::default(),
            default_api_type: ApiType::Rest,
            default_rule_list_type: "symbol_mapping".to_string(),
            max_key_length: 250,
            key_memo_capacity: 1024,
            breaker: CircuitBreakerConfig::default(),
            scan: ScanConfig::default(),
            batch_delete: BatchDeleteConfig::default(),
            invalidation: InvalidationConfig::default(),
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Builds the configuration from `TM_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let breaker = CircuitBreakerConfig {
            failure_threshold: env_or(
                "TM_BREAKER_FAILURE_THRESHOLD",
                defaults.breaker.failure_threshold,
            ),
            recovery_timeout: env_secs(
                "TM_BREAKER_RECOVERY_SECS",
                defaults.breaker.recovery_timeout,
            ),
        };

        Self {
            enabled: env_or("TM_CACHE_ENABLED", defaults.enabled),
            ttl: TtlConfig {
                best_rule: env_secs("TM_TTL_BEST_RULE_SECS", defaults.ttl.best_rule),
                provider_rules: env_secs(
                    "TM_TTL_PROVIDER_RULES_SECS",
                    defaults.ttl.provider_rules,
                ),
                rule_by_id: env_secs("TM_TTL_RULE_BY_ID_SECS", defaults.ttl.rule_by_id),
                symbol: env_secs("TM_TTL_SYMBOL_SECS", defaults.ttl.symbol),
                batch_result: env_secs("TM_TTL_BATCH_SECS", defaults.ttl.batch_result),
            },
            default_api_type: env_or("TM_DEFAULT_API_TYPE", defaults.default_api_type),
            default_rule_list_type: std::env::var("TM_DEFAULT_RULE_LIST_TYPE")
                .unwrap_or(defaults.default_rule_list_type),
            max_key_length: env_or("TM_MAX_KEY_LENGTH", defaults.max_key_length),
            key_memo_capacity: env_or("TM_KEY_MEMO_CAPACITY", defaults.key_memo_capacity),
            breaker,
            scan: ScanConfig {
                initial_count: env_or("TM_SCAN_INITIAL_COUNT", defaults.scan.initial_count),
                min_count: env_or("TM_SCAN_MIN_COUNT", defaults.scan.min_count),
                max_count: env_or("TM_SCAN_MAX_COUNT", defaults.scan.max_count),
                max_rounds: env_or("TM_SCAN_MAX_ROUNDS", defaults.scan.max_rounds),
                max_keys: env_or("TM_SCAN_MAX_KEYS", defaults.scan.max_keys),
                deadline: env_millis("TM_SCAN_DEADLINE_MS", defaults.scan.deadline),
            },
            batch_delete: BatchDeleteConfig {
                chunk_size: env_or("TM_DELETE_CHUNK_SIZE", defaults.batch_delete.chunk_size),
                max_concurrency: env_or(
                    "TM_DELETE_MAX_CONCURRENCY",
                    defaults.batch_delete.max_concurrency,
                ),
            },
            invalidation: InvalidationConfig {
                affected_symbol_threshold: env_or(
                    "TM_INVALIDATION_THRESHOLD",
                    defaults.invalidation.affected_symbol_threshold,
                ),
                max_retries: env_or(
                    "TM_INVALIDATION_MAX_RETRIES",
                    defaults.invalidation.max_retries,
                ),
                retry_base_delay: defaults.invalidation.retry_base_delay,
                debounce: env_millis(
                    "TM_INVALIDATION_DEBOUNCE_MS",
                    defaults.invalidation.debounce,
                ),
            },
            stats_interval: env_secs("TM_STATS_INTERVAL_SECS", defaults.stats_interval),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring unparsable value '{}' for {}", raw, name);
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(name, default.as_secs()))
}

fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(name, default.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl_ordering() {
        let ttl = TtlConfig::default();
        assert!(ttl.best_rule < ttl.provider_rules);
        assert!(ttl.provider_rules < ttl.rule_by_id);
    }

    #[test]
    fn test_env_overrides_and_fallbacks() {
        std::env::set_var("TM_TTL_SYMBOL_SECS", "42");
        std::env::set_var("TM_INVALIDATION_THRESHOLD", "not-a-number");
        std::env::set_var("TM_DEFAULT_API_TYPE", "stream");

        let config = CacheConfig::from_env();
        assert_eq!(config.ttl.symbol, Duration::from_secs(42));
        assert_eq!(config.invalidation.affected_symbol_threshold, 100);
        assert_eq!(config.default_api_type, ApiType::Stream);

        for key in [
            "TM_TTL_SYMBOL_SECS",
            "TM_INVALIDATION_THRESHOLD",
            "TM_DEFAULT_API_TYPE",
        ] {
            std::env::remove_var(key);
        }
    }
}
