//! Owned handles for background tasks.
//!
//! Every periodic or long-running job is spawned through [`BackgroundTask`],
//! which pairs the tokio `JoinHandle` with a `CancellationToken`. Shutdown is
//! explicit and bounded: cancel, wait up to a timeout, abort if still running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsRecorder;

/// How a background task ended during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The task observed cancellation and returned within the timeout.
    Completed,
    /// The task did not finish in time and was aborted.
    Aborted,
    /// The task had already returned on its own.
    AlreadyStopped,
    /// The task panicked, before or during shutdown.
    Panicked,
}

/// A spawned task plus the token that asks it to stop.
pub struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawns `make(token)` on the current runtime.
    ///
    /// The future must return promptly once `token` is cancelled.
    pub fn spawn<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(make(token.clone()));
        debug!("Background task '{}' started", name);
        Self {
            name,
            token,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task and waits at most `timeout` for it to exit.
    pub async fn shutdown(self, timeout: Duration) -> ShutdownOutcome {
        let already_finished = self.handle.is_finished();
        self.token.cancel();
        let mut handle = self.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) if already_finished => ShutdownOutcome::AlreadyStopped,
            Ok(Ok(())) => {
                info!("Background task '{}' stopped", self.name);
                ShutdownOutcome::Completed
            }
            Ok(Err(e)) if e.is_panic() => {
                error!("Background task '{}' panicked: {}", self.name, e);
                ShutdownOutcome::Panicked
            }
            Ok(Err(e)) => {
                warn!("Background task '{}' was cancelled: {}", self.name, e);
                ShutdownOutcome::AlreadyStopped
            }
            Err(_) => {
                warn!(
                    "Background task '{}' did not stop within {:?}, aborting",
                    self.name, timeout
                );
                handle.abort();
                ShutdownOutcome::Aborted
            }
        }
    }
}

/// Logs and resets the local cache counters every `interval`.
pub fn start_stats_reporter(metrics: Arc<MetricsRecorder>, interval: Duration) -> BackgroundTask {
    BackgroundTask::spawn("stats-reporter", move |token| async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so the first report covers a full period.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    metrics.report_and_reset();
                    break;
                }
                _ = ticker.tick() => {
                    metrics.report_and_reset();
                }
            }
        }
    })
}
