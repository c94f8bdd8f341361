//! Tickermap Mapping Cache Crate
//!
//! Multi-tier cache for ticker symbol mapping between the standard form and
//! provider-specific (SDK) forms, kept consistent with a mutable rule store.
//!
//! # Overview
//!
//! The crate provides:
//! - Three cache tiers over one key-value store: rules (L1), single symbols
//!   (L2) and whole batch results (L3)
//! - Rule-change driven invalidation, targeted or bulk, run asynchronously
//! - Breaker-gated, bounded key scans and partial-failure tolerant bulk deletes
//! - Hit/miss/latency metrics over a closed tier label set
//!
//! # Architecture
//!
//! ```text
//!   map_symbols(provider, symbols, direction)
//!                  |
//!                  v
//!          +----------------+   hit
//!          | L3 BatchResult | ------> result
//!          +----------------+
//!                  | miss
//!                  v
//!          +----------------+   per-symbol hits
//!          |  L2 Symbol     | ----------------+
//!          +----------------+                 |
//!                  | misses                   |
//!                  v                          v
//!          +----------------+          +-------------+
//!          | L1 Rule / Rule | -------> |  assemble,  |
//!          |     Store      |          |  write back |
//!          +----------------+          +-------------+
//!
//!   RuleChange --> InvalidationQueue --> worker --> InvalidationEngine
//!                                                     |  diff, plan
//!                                                     v
//!                                   KeyScanner (CircuitBreaker) + BatchDeleter
//! ```
//!
//! # Core Types
//!
//! - [`MappingService`] - Entry point: mapping, invalidation, warmup
//! - [`MappingRule`] / [`MappingRuleSet`] - Rules as held by the rule store
//! - [`BatchMappingResult`] - Caller-facing mapping result
//! - [`MappingDirection`] - Required direction, no default
//! - [`KeyValueStore`] / [`RuleStore`] - External collaborators

pub mod config;
pub mod errors;
pub mod invalidation;
pub mod keys;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod rules;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tiers;

pub use config::CacheConfig;
pub use errors::{CacheError, Result, RetryClass};
pub use invalidation::{InvalidationEngine, InvalidationQueue, InvalidationReport, RuleDiff};
pub use keys::KeyCodec;
pub use metrics::{
    CacheOutcome, CacheSample, CollectingMetricsSink, MetricsRecorder, MetricsSink,
    NoopMetricsSink, StatsSnapshot,
};
pub use models::{
    ApiType, BatchMappingResult, CacheTier, MappingDirection, MappingRule, MappingRuleSet,
    RuleChange,
};
pub use resilience::{CircuitBreaker, CircuitState};
pub use rules::{InMemoryRuleStore, RuleStore};
pub use scheduler::{BackgroundTask, ShutdownOutcome};
pub use service::{MappingService, WarmupReport};
pub use store::{InMemoryStore, KeyValueStore, MockKeyValueStore};
