//! Bounded, breaker-gated key enumeration.
//!
//! A scan walks the store cursor round by round. The per-round fetch size
//! adapts: it shrinks once the accumulated result gets large and grows when
//! rounds keep coming back nearly empty. Rounds, total keys and wall-clock
//! time are all capped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use super::CircuitBreaker;
use crate::config::ScanConfig;
use crate::errors::{CacheError, Result};
use crate::store::KeyValueStore;

/// Rounds after which a sparse round is allowed to grow the fetch size.
const GROWTH_MIN_ROUNDS: u32 = 3;

/// Keys collected by one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub keys: Vec<String>,
    pub rounds: u32,
    /// True when the round or key cap stopped the walk before the cursor finished.
    pub truncated: bool,
}

/// Picks the fetch size for the next round.
pub fn next_batch_size(
    current: usize,
    accumulated: usize,
    rounds: u32,
    last_yield: usize,
    config: &ScanConfig,
) -> usize {
    let min = config.min_count.max(1);
    let max = config.max_count.max(min);

    if accumulated > config.max_keys / 2 {
        (current / 2).clamp(min, max)
    } else if rounds >= GROWTH_MIN_ROUNDS && last_yield < current / 10 {
        current.saturating_mul(2).clamp(min, max)
    } else {
        current.clamp(min, max)
    }
}

/// Enumerates keys matching a pattern, guarded by the circuit breaker.
pub struct KeyScanner {
    store: Arc<dyn KeyValueStore>,
    breaker: Arc<CircuitBreaker>,
    config: ScanConfig,
}

impl KeyScanner {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        breaker: Arc<CircuitBreaker>,
        config: ScanConfig,
    ) -> Self {
        Self {
            store,
            breaker,
            config,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Scan all keys matching `pattern`.
    ///
    /// Fails fast with [`CacheError::CircuitOpen`] while the breaker is open,
    /// without touching the store. Timeouts and store errors are recorded as
    /// breaker failures.
    pub async fn scan(&self, pattern: &str) -> Result<ScanOutcome> {
        if !self.breaker.try_acquire() {
            debug!("Scan of '{}' rejected: circuit open", pattern);
            return Err(CacheError::CircuitOpen);
        }

        match self.walk(pattern).await {
            Ok(outcome) => {
                self.breaker.record_success();
                Ok(outcome)
            }
            Err(e) => {
                // Anything other than a timeout or an unreachable store means
                // the store answered, so it does not count against the circuit.
                if e.counts_as_scan_failure() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_success();
                }
                warn!("Scan of '{}' failed: {}", pattern, e);
                Err(e)
            }
        }
    }

    async fn walk(&self, pattern: &str) -> Result<ScanOutcome> {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let timeout = || CacheError::ScanTimeout {
            pattern: pattern.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let mut seen = HashSet::new();
        let mut outcome = ScanOutcome::default();
        let mut cursor = 0u64;
        let mut count = self.config.initial_count;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(timeout());
            }
            if outcome.rounds >= self.config.max_rounds {
                warn!(
                    "Scan of '{}' stopped at round cap ({}), {} keys collected",
                    pattern,
                    self.config.max_rounds,
                    outcome.keys.len()
                );
                outcome.truncated = true;
                break;
            }

            let page = tokio::time::timeout(deadline - now, self.store.scan(cursor, pattern, count))
                .await
                .map_err(|_| timeout())??;
            outcome.rounds += 1;

            let yielded = page.keys.len();
            for key in page.keys {
                if seen.insert(key.clone()) {
                    outcome.keys.push(key);
                }
            }
            cursor = page.cursor;

            if outcome.keys.len() >= self.config.max_keys {
                if outcome.keys.len() > self.config.max_keys || cursor != 0 {
                    warn!(
                        "Scan of '{}' stopped at key cap ({})",
                        pattern, self.config.max_keys
                    );
                    outcome.truncated = true;
                }
                outcome.keys.truncate(self.config.max_keys);
                break;
            }
            if cursor == 0 {
                break;
            }

            count = next_batch_size(
                count,
                outcome.keys.len(),
                outcome.rounds,
                yielded,
                &self.config,
            );
        }

        debug!(
            "Scan of '{}' returned {} keys in {} rounds ({}ms)",
            pattern,
            outcome.keys.len(),
            outcome.rounds,
            started.elapsed().as_millis()
        );
        Ok(outcome)
    }
}
