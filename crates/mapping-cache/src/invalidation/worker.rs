//! Asynchronous ingestion of rule-change notifications.
//!
//! Notifications are queued on an unbounded channel so the publisher never
//! blocks. The worker collects a burst within the debounce window, then
//! applies the changes in arrival order, retrying retryable failures with
//! exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::InvalidationEngine;
use crate::config::InvalidationConfig;
use crate::errors::{CacheError, Result};
use crate::models::RuleChange;
use crate::scheduler::BackgroundTask;

/// Sending half of the invalidation channel.
#[derive(Clone)]
pub struct InvalidationQueue {
    tx: mpsc::UnboundedSender<RuleChange>,
}

impl InvalidationQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RuleChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a change for the worker. Never blocks.
    pub fn notify(&self, change: RuleChange) -> Result<()> {
        let provider = change.provider.clone();
        self.tx.send(change).map_err(|_| {
            CacheError::unavailable(format!(
                "invalidation worker stopped, change for '{}' dropped",
                provider
            ))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawns the worker that drains `rx` into `engine`.
pub fn start_invalidation_worker(
    engine: Arc<InvalidationEngine>,
    rx: mpsc::UnboundedReceiver<RuleChange>,
    config: InvalidationConfig,
) -> BackgroundTask {
    BackgroundTask::spawn("invalidation-worker", move |token| {
        run_worker(engine, rx, config, token)
    })
}

async fn run_worker(
    engine: Arc<InvalidationEngine>,
    mut rx: mpsc::UnboundedReceiver<RuleChange>,
    config: InvalidationConfig,
    token: CancellationToken,
) {
    info!("Invalidation worker started");
    let mut pending: Vec<RuleChange> = Vec::new();
    // Fixed per burst: later arrivals join the batch but do not push it back.
    let mut flush_at = Instant::now();

    loop {
        if pending.is_empty() {
            tokio::select! {
                _ = token.cancelled() => break,
                change = rx.recv() => match change {
                    Some(change) => {
                        pending.push(change);
                        flush_at = Instant::now() + config.debounce;
                    }
                    None => break,
                },
            }
            continue;
        }

        tokio::select! {
            _ = token.cancelled() => break,
            change = rx.recv() => match change {
                Some(change) => pending.push(change),
                None => break,
            },
            _ = tokio::time::sleep_until(flush_at) => {
                let batch = std::mem::take(&mut pending);
                process_batch(&engine, batch, &config, &token).await;
            }
        }
    }

    // Drain what already arrived so a clean shutdown does not lose changes.
    while let Ok(change) = rx.try_recv() {
        pending.push(change);
    }
    if !pending.is_empty() {
        debug!("Invalidation worker flushing {} pending change(s)", pending.len());
        process_batch(&engine, pending, &config, &CancellationToken::new()).await;
    }
    info!("Invalidation worker shutting down");
}

async fn process_batch(
    engine: &InvalidationEngine,
    batch: Vec<RuleChange>,
    config: &InvalidationConfig,
    token: &CancellationToken,
) {
    debug!("Processing {} rule change(s)", batch.len());
    for change in batch {
        apply_with_retry(engine, &change, config, token).await;
    }
}

async fn apply_with_retry(
    engine: &InvalidationEngine,
    change: &RuleChange,
    config: &InvalidationConfig,
    token: &CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        let e = match engine.handle_rule_change(change).await {
            Ok(report) => {
                debug!("Rule change applied: {:?}", report);
                return;
            }
            Err(e) => e,
        };

        if !e.retry_class().is_retryable() {
            error!("Dropping rule change for '{}': {}", change.provider, e);
            return;
        }
        if attempt >= config.max_retries {
            error!(
                "Giving up on rule change for '{}' after {} retries: {}",
                change.provider, attempt, e
            );
            return;
        }

        let delay = backoff_delay(config.retry_base_delay, attempt);
        attempt += 1;
        warn!(
            "Rule change for '{}' failed ({}), retry {}/{} in {:?}",
            change.provider, e, attempt, config.max_retries, delay
        );
        tokio::select! {
            _ = token.cancelled() => {
                warn!("Shutdown during backoff, rule change for '{}' not retried", change.provider);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// `base * 2^attempt`, saturating.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}
