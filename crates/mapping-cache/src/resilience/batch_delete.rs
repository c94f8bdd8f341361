//! Parallel bulk deletion that tolerates partial failure.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, warn};

use crate::config::BatchDeleteConfig;
use crate::errors::{CacheError, Result};
use crate::store::KeyValueStore;

/// Aggregate outcome of a bulk delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteReport {
    /// Distinct keys submitted.
    pub requested: usize,
    /// Keys the store reported as removed.
    pub deleted: u64,
    pub chunks: usize,
    pub failed_chunks: usize,
}

/// Splits key lists into fixed-size chunks and deletes them concurrently.
///
/// A failing chunk never cancels its siblings. The call only fails when more
/// than half of the chunks failed, and only after every chunk has finished.
pub struct BatchDeleter {
    store: Arc<dyn KeyValueStore>,
    config: BatchDeleteConfig,
}

impl BatchDeleter {
    pub fn new(store: Arc<dyn KeyValueStore>, config: BatchDeleteConfig) -> Self {
        Self { store, config }
    }

    pub async fn delete(&self, keys: Vec<String>) -> Result<BatchDeleteReport> {
        let mut seen = HashSet::with_capacity(keys.len());
        let keys: Vec<String> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let mut report = BatchDeleteReport {
            requested: keys.len(),
            ..Default::default()
        };
        if keys.is_empty() {
            return Ok(report);
        }

        let chunk_size = self.config.chunk_size.max(1);
        let chunks: Vec<Vec<String>> = keys.chunks(chunk_size).map(<[String]>::to_vec).collect();
        report.chunks = chunks.len();

        let results: Vec<Result<u64>> = stream::iter(chunks)
            .map(|chunk| {
                let store = self.store.clone();
                async move { store.delete(&chunk).await }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                Ok(deleted) => report.deleted += deleted,
                Err(e) => {
                    report.failed_chunks += 1;
                    debug!("Delete chunk failed: {}", e);
                }
            }
        }

        if report.failed_chunks * 2 > report.chunks {
            warn!(
                "Batch delete failed for {}/{} chunks ({} keys requested)",
                report.failed_chunks, report.chunks, report.requested
            );
            return Err(CacheError::PartialBatchFailure {
                failed_chunks: report.failed_chunks,
                total_chunks: report.chunks,
            });
        }
        if report.failed_chunks > 0 {
            warn!(
                "Batch delete: {}/{} chunks failed, continuing ({} keys deleted)",
                report.failed_chunks, report.chunks, report.deleted
            );
        }
        Ok(report)
    }
}
