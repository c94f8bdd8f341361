#![allow(dead_code)]

use std::sync::Arc;

use tickermap_cache::{
    ApiType, CacheConfig, CollectingMetricsSink, InMemoryRuleStore, MappingRule, MappingService,
    MockKeyValueStore,
};

pub struct Harness {
    pub store: MockKeyValueStore,
    pub rules: Arc<InMemoryRuleStore>,
    pub sink: CollectingMetricsSink,
    pub service: MappingService,
}

pub fn rule(id: &str, standard: &str, sdk: &str) -> MappingRule {
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

pub fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn harness(rules: Vec<MappingRule>, config: CacheConfig) -> Harness {
    let store = MockKeyValueStore::new();
    let rules = Arc::new(InMemoryRuleStore::new(rules));
    let sink = CollectingMetricsSink::new();
    let service = MappingService::new(
        config,
        Arc::new(store.clone()),
        rules.clone(),
        Arc::new(sink.clone()),
    );
    Harness {
        store,
        rules,
        sink,
        service,
    }
}

pub fn l3_keys(store: &MockKeyValueStore) -> Vec<String> {
    store
        .inner()
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("l3:"))
        .collect()
}
