//! End-to-end mapping and invalidation scenarios.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{harness, l3_keys, rule, symbols};
use tickermap_cache::{
    CacheConfig, CacheError, CacheOutcome, CacheTier, CircuitState, MappingDirection,
};

fn scenario_rules() -> Vec<tickermap_cache::MappingRule> {
    vec![rule("r-aapl", "AAPL", "AAPL.US")]
}

#[tokio::test]
async fn test_unmapped_symbol_is_reported_as_failed() {
    let h = harness(scenario_rules(), CacheConfig::default());

    let result = h
        .service
        .map_symbols(
            "acme",
            &symbols(&["AAPL", "INVALID"]),
            MappingDirection::FromStandard,
            "scenario-1",
        )
        .await
        .unwrap();

    assert_eq!(
        result.mapping_details,
        BTreeMap::from([("AAPL".to_string(), "AAPL.US".to_string())])
    );
    assert_eq!(result.failed_symbols, vec!["INVALID".to_string()]);
    assert_eq!(result.total_processed, 2);
    assert_eq!(result.cache_hits, 0);
}

#[tokio::test]
async fn test_repeat_call_is_served_from_l3() {
    let h = harness(scenario_rules(), CacheConfig::default());
    let request = symbols(&["AAPL", "INVALID"]);

    let first = h
        .service
        .map_symbols("acme", &request, MappingDirection::FromStandard, "first")
        .await
        .unwrap();
    let lookups = h.rules.lookup_count();

    let second = h
        .service
        .map_symbols("acme", &request, MappingDirection::FromStandard, "second")
        .await
        .unwrap();

    assert_eq!(second.cache_hits, 2);
    assert_eq!(second.mapping_details, first.mapping_details);
    assert_eq!(second.failed_symbols, first.failed_symbols);
    assert_eq!(h.rules.lookup_count(), lookups);
    assert_eq!(h.sink.count(CacheTier::L3, CacheOutcome::Hit), 1);
}

#[tokio::test]
async fn test_added_rule_evicts_cached_failure() {
    let h = harness(scenario_rules(), CacheConfig::default());
    let request = symbols(&["AAPL", "INVALID"]);
    h.service
        .map_symbols("acme", &request, MappingDirection::FromStandard, "before")
        .await
        .unwrap();
    assert_eq!(l3_keys(&h.store).len(), 1);

    let change = h.rules.upsert(rule("r-invalid", "INVALID", "INVALID.US"));
    let report = h.service.apply_rule_change(&change).await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.l3_keys_deleted, 1);
    assert!(l3_keys(&h.store).is_empty());

    let after = h
        .service
        .map_symbols("acme", &request, MappingDirection::FromStandard, "after")
        .await
        .unwrap();
    assert_eq!(
        after.mapping_details,
        BTreeMap::from([
            ("AAPL".to_string(), "AAPL.US".to_string()),
            ("INVALID".to_string(), "INVALID.US".to_string()),
        ])
    );
    assert!(after.failed_symbols.is_empty());
}

#[tokio::test]
async fn test_background_worker_converges() {
    let mut config = CacheConfig::default();
    config.invalidation.debounce = Duration::from_millis(10);
    let h = harness(scenario_rules(), config);
    let tasks = h.service.start_background();

    let request = symbols(&["AAPL", "INVALID"]);
    h.service
        .map_symbols("acme", &request, MappingDirection::FromStandard, "before")
        .await
        .unwrap();

    let change = h.rules.upsert(rule("r-invalid", "INVALID", "INVALID.US"));
    h.service.notify_rule_change(change).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = h
        .service
        .map_symbols("acme", &request, MappingDirection::FromStandard, "after")
        .await
        .unwrap();
    assert!(after.failed_symbols.is_empty());

    for task in tasks {
        task.shutdown(Duration::from_secs(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeouts_open_the_breaker() {
    let mut config = CacheConfig::default();
    config.scan.deadline = Duration::from_millis(100);
    let h = harness(scenario_rules(), config);
    h.store.set_scan_delay(Some(Duration::from_secs(1)));

    for _ in 0..5 {
        let err = h.service.invalidate_provider("acme").await.unwrap_err();
        assert!(matches!(err, CacheError::ScanTimeout { .. }));
        assert!(err.retry_class().is_retryable());
    }
    assert_eq!(h.service.breaker().state(), CircuitState::Open);
    assert_eq!(h.store.scan_calls(), 5);

    let err = h.service.invalidate_provider("acme").await.unwrap_err();
    assert!(matches!(err, CacheError::CircuitOpen));
    assert_eq!(h.store.scan_calls(), 5);
}
