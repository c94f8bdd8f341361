//! Property and invariant tests across the public API.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{harness, l3_keys, rule, symbols};
use proptest::prelude::*;
use tickermap_cache::resilience::{CircuitBreakerConfig, KeyScanner};
use tickermap_cache::{
    CacheConfig, CacheError, CircuitBreaker, CircuitState, KeyValueStore, MappingDirection,
    MappingRule, MockKeyValueStore,
};

fn catalog() -> Vec<MappingRule> {
    ["AAPL", "MSFT", "GOOG", "SAP", "BRK-B", "TSLA"]
        .iter()
        .enumerate()
        .map(|(i, s)| rule(&format!("r{}", i), s, &format!("{}_X", s)))
        .collect()
}

fn symbol_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("AAPL".to_string()),
        Just("MSFT_X".to_string()),
        Just("GOOG".to_string()),
        Just("BRK-B".to_string()),
        Just(" TSLA ".to_string()),
        Just("BRK.A".to_string()),
        "[A-Z]{1,5}",
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Every normalized symbol lands in exactly one of mapped or failed,
    /// and a repeated call returns the same partition.
    #[test]
    fn mapping_partitions_request_and_is_idempotent(
        request in prop::collection::vec(symbol_strategy(), 0..12),
        from_standard in any::<bool>(),
    ) {
        let direction = if from_standard {
            MappingDirection::FromStandard
        } else {
            MappingDirection::ToStandard
        };
        let h = harness(catalog(), CacheConfig::default());
        let rt = runtime();

        let first = rt
            .block_on(h.service.map_symbols("acme", &request, direction, "p-1"))
            .unwrap();
        let second = rt
            .block_on(h.service.map_symbols("acme", &request, direction, "p-2"))
            .unwrap();

        let normalized: HashSet<String> = request
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        prop_assert_eq!(first.total_processed, normalized.len());

        let mapped: HashSet<&String> = first.mapping_details.keys().collect();
        let failed: HashSet<&String> = first.failed_symbols.iter().collect();
        prop_assert!(mapped.is_disjoint(&failed));
        prop_assert_eq!(mapped.len() + failed.len(), normalized.len());
        for symbol in &normalized {
            prop_assert!(mapped.contains(symbol) || failed.contains(symbol));
        }

        prop_assert_eq!(&first.mapping_details, &second.mapping_details);
        prop_assert_eq!(&first.failed_symbols, &second.failed_symbols);
    }
}

#[tokio::test]
async fn test_material_change_evicts_every_involved_batch() {
    let h = harness(catalog(), CacheConfig::default());
    // SAP appears as a mapped key, as a mapped value, and not at all.
    h.service
        .map_symbols("acme", &symbols(&["SAP", "AAPL"]), MappingDirection::FromStandard, "a")
        .await
        .unwrap();
    h.service
        .map_symbols("acme", &symbols(&["SAP_X", "GOOG_X"]), MappingDirection::ToStandard, "b")
        .await
        .unwrap();
    h.service
        .map_symbols("acme", &symbols(&["MSFT", "TSLA"]), MappingDirection::FromStandard, "c")
        .await
        .unwrap();
    assert_eq!(l3_keys(&h.store).len(), 3);

    let mut moved = catalog()[3].clone();
    moved.market = "DE".to_string();
    let change = h.rules.upsert(moved);
    let report = h.service.apply_rule_change(&change).await.unwrap();

    assert_eq!(report.modified, 1);
    assert_eq!(report.l3_keys_deleted, 2);
    assert_eq!(l3_keys(&h.store).len(), 1);
}

#[tokio::test]
async fn test_description_only_change_evicts_nothing() {
    let h = harness(catalog(), CacheConfig::default());
    h.service
        .map_symbols("acme", &symbols(&["SAP", "AAPL"]), MappingDirection::FromStandard, "a")
        .await
        .unwrap();
    let before = h.store.inner().keys();

    let mut edited = catalog()[3].clone();
    edited.description = Some("Walldorf listing".to_string());
    let change = h.rules.upsert(edited);
    let report = h.service.apply_rule_change(&change).await.unwrap();

    assert_eq!(report.affected_symbols, 0);
    assert_eq!(h.store.inner().keys(), before);
}

#[tokio::test]
async fn test_metadata_change_keeps_unrelated_batches() {
    let h = harness(catalog(), CacheConfig::default());
    h.service
        .map_symbols("acme", &symbols(&["MSFT", "GOOG"]), MappingDirection::FromStandard, "a")
        .await
        .unwrap();
    let unrelated = l3_keys(&h.store);

    let mut retyped = catalog()[0].clone();
    retyped.symbol_type = "adr".to_string();
    let change = h.rules.upsert(retyped);
    h.service.apply_rule_change(&change).await.unwrap();

    assert_eq!(l3_keys(&h.store), unrelated);
}

#[tokio::test]
async fn test_half_open_admits_a_single_trial() {
    let store = MockKeyValueStore::new();
    store
        .inner()
        .set("l3:acme:from_standard:k", "{}", Duration::from_secs(60))
        .await
        .unwrap();
    let breaker = std::sync::Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout: Duration::from_millis(50),
    }));
    let scanner = KeyScanner::new(
        std::sync::Arc::new(store.clone()),
        breaker.clone(),
        Default::default(),
    );

    store.set_fail_scan(true);
    for _ in 0..2 {
        assert!(scanner.scan("l3:acme:*").await.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(matches!(
        scanner.scan("l3:acme:*").await,
        Err(CacheError::CircuitOpen)
    ));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(breaker.try_acquire());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    // The trial slot is taken, so a concurrent scan is turned away.
    assert!(matches!(
        scanner.scan("l3:acme:*").await,
        Err(CacheError::CircuitOpen)
    ));
    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);

    store.set_fail_scan(false);
    let outcome = scanner.scan("l3:acme:*").await.unwrap();
    assert_eq!(outcome.keys, vec!["l3:acme:from_standard:k".to_string()]);
}
