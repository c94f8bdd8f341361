mod config;
mod main_lib;

use config::Config;
use main_lib::{build_state, init_tracing};
use tickermap_cache::ShutdownOutcome;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing();
    let state = build_state(&config).await?;

    // Invalidation worker and periodic stats reporter
    let tasks = state.service.start_background();
    tracing::info!(
        "Mapping cache ready (cache enabled: {}, {} rules loaded)",
        state.service.config().enabled,
        state.rules.all_rules().len()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    for task in tasks {
        let name = task.name();
        match task.shutdown(config.shutdown_timeout).await {
            ShutdownOutcome::Aborted => {
                tracing::warn!("Task '{}' was aborted during shutdown", name)
            }
            ShutdownOutcome::Panicked => {
                tracing::error!("Task '{}' panicked", name)
            }
            ShutdownOutcome::Completed | ShutdownOutcome::AlreadyStopped => {}
        }
    }

    let stats = state.service.metrics().report_and_reset();
    tracing::info!("Final cache stats: {}", serde_json::to_string(&stats)?);
    Ok(())
}
