use std::path::PathBuf;
use std::time::Duration;

use tickermap_cache::CacheConfig;

pub struct Config {
    pub cache: CacheConfig,
    pub rules_file: Option<PathBuf>,
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let rules_file = std::env::var("TM_RULES_FILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let shutdown_secs: u64 = std::env::var("TM_SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .unwrap_or(5);
        Self {
            cache: CacheConfig::from_env(),
            rules_file,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
        }
    }
}
