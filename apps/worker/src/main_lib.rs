use std::path::Path;
use std::sync::Arc;

use tickermap_cache::{
    CacheConfig, InMemoryRuleStore, InMemoryStore, MappingRule, MappingService, NoopMetricsSink,
};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub fn init_tracing() {
    let log_format = std::env::var("TM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub struct AppState {
    pub service: Arc<MappingService>,
    pub rules: Arc<InMemoryRuleStore>,
}

pub fn load_rules(path: Option<&Path>) -> anyhow::Result<InMemoryRuleStore> {
    match path {
        Some(path) => Ok(InMemoryRuleStore::from_json_file(path)?),
        None => {
            tracing::warn!("TM_RULES_FILE not set, starting with an empty rule store");
            Ok(InMemoryRuleStore::default())
        }
    }
}

pub fn build_service(cache: CacheConfig, rules: Arc<InMemoryRuleStore>) -> Arc<MappingService> {
    Arc::new(MappingService::new(
        cache,
        Arc::new(InMemoryStore::new()),
        rules,
        Arc::new(NoopMetricsSink),
    ))
}

pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let rules = Arc::new(load_rules(config.rules_file.as_deref())?);
    let service = build_service(config.cache.clone(), rules.clone());

    let snapshot: Vec<MappingRule> = rules.all_rules();
    if !snapshot.is_empty() {
        let report = service.warmup(&snapshot).await?;
        tracing::info!(
            "Warmup: {} rules, {}/{} writes",
            report.rules,
            report.written,
            report.attempted_writes
        );
    }

    Ok(AppState { service, rules })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use tickermap_cache::MappingDirection;

    const RULES: &str = r#"[
        {
            "id": "r1",
            "provider": "acme",
            "apiType": "rest",
            "ruleListType": "symbol_mapping",
            "standardSymbol": "AAPL",
            "sdkSymbol": "AAPL_US",
            "market": "US",
            "symbolType": "stock",
            "isActive": true
        }
    ]"#;

    #[tokio::test]
    async fn test_build_state_warms_and_maps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();

        let config = Config {
            cache: CacheConfig::default(),
            rules_file: Some(file.path().to_path_buf()),
            shutdown_timeout: std::time::Duration::from_secs(1),
        };
        let state = build_state(&config).await.unwrap();
        assert_eq!(state.rules.all_rules().len(), 1);

        let result = state
            .service
            .map_symbols(
                "acme",
                &["AAPL".to_string()],
                MappingDirection::FromStandard,
                "test",
            )
            .await
            .unwrap();
        assert_eq!(result.cache_hits, 1);
    }

    #[test]
    fn test_missing_rules_file_is_an_error() {
        assert!(load_rules(Some(Path::new("/nonexistent/rules.json"))).is_err());
        assert!(load_rules(None).unwrap().all_rules().is_empty());
    }
}
