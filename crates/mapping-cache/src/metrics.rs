//! Cache hit/miss/latency recording.
//!
//! Samples carry a [`CacheTier`] label, which can only be `l1`, `l2` or `l3`.
//! A disabled cache is tracked by its own counter and log line, never as a
//! tier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

use crate::models::CacheTier;

/// Outcome of one cache probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
    Error,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Error => "error",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Hit => 0,
            Self::Miss => 1,
            Self::Error => 2,
        }
    }
}

/// A single `(tier, outcome, durationMs)` sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSample {
    pub tier: CacheTier,
    pub outcome: CacheOutcome,
    pub duration_ms: u64,
}

/// Destination for cache samples (e.g. a metrics exporter).
///
/// `record()` must be fast and non-blocking.
pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: CacheSample);
}

/// Discards every sample.
#[derive(Clone, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _sample: CacheSample) {}
}

/// Mock sink for testing - collects emitted samples.
#[derive(Clone, Default)]
pub struct CollectingMetricsSink {
    samples: Arc<Mutex<Vec<CacheSample>>>,
}

impl CollectingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<CacheSample> {
        self.samples.lock().unwrap().clone()
    }

    /// Number of samples for the given tier and outcome.
    pub fn count(&self, tier: CacheTier, outcome: CacheOutcome) -> usize {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.tier == tier && s.outcome == outcome)
            .count()
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }
}

impl MetricsSink for CollectingMetricsSink {
    fn record(&self, sample: CacheSample) {
        self.samples.lock().unwrap().push(sample);
    }
}

/// Counters for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Local counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub l1: TierStats,
    pub l2: TierStats,
    pub l3: TierStats,
    /// Calls served while the cache feature flag was off.
    pub cache_disabled: u64,
}

impl StatsSnapshot {
    pub fn tier(&self, tier: CacheTier) -> &TierStats {
        match tier {
            CacheTier::L1 => &self.l1,
            CacheTier::L2 => &self.l2,
            CacheTier::L3 => &self.l3,
        }
    }
}

#[derive(Default)]
struct TierCounters {
    outcomes: [AtomicU64; 3],
    duration_ms: AtomicU64,
}

impl TierCounters {
    fn read(&self, reset: bool) -> TierStats {
        let load = |c: &AtomicU64| {
            if reset {
                c.swap(0, Ordering::Relaxed)
            } else {
                c.load(Ordering::Relaxed)
            }
        };
        TierStats {
            hits: load(&self.outcomes[0]),
            misses: load(&self.outcomes[1]),
            errors: load(&self.outcomes[2]),
            total_duration_ms: load(&self.duration_ms),
        }
    }
}

/// Forwards samples to a [`MetricsSink`] and keeps local counters.
pub struct MetricsRecorder {
    sink: Arc<dyn MetricsSink>,
    tiers: [TierCounters; 3],
    cache_disabled: AtomicU64,
}

impl MetricsRecorder {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            tiers: Default::default(),
            cache_disabled: AtomicU64::new(0),
        }
    }

    fn counters(&self, tier: CacheTier) -> &TierCounters {
        match tier {
            CacheTier::L1 => &self.tiers[0],
            CacheTier::L2 => &self.tiers[1],
            CacheTier::L3 => &self.tiers[2],
        }
    }

    pub fn record(&self, tier: CacheTier, outcome: CacheOutcome, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        let counters = self.counters(tier);
        counters.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);
        counters.duration_ms.fetch_add(duration_ms, Ordering::Relaxed);

        self.sink.record(CacheSample {
            tier,
            outcome,
            duration_ms,
        });
    }

    /// Notes a call that bypassed the cache because it is switched off.
    pub fn record_cache_disabled(&self, reason: &str) {
        let total = self.cache_disabled.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Cache bypassed ({}), total bypasses: {}", reason, total);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.read(false)
    }

    /// Returns the counters and resets them to zero.
    pub fn take_snapshot(&self) -> StatsSnapshot {
        self.read(true)
    }

    fn read(&self, reset: bool) -> StatsSnapshot {
        StatsSnapshot {
            l1: self.counters(CacheTier::L1).read(reset),
            l2: self.counters(CacheTier::L2).read(reset),
            l3: self.counters(CacheTier::L3).read(reset),
            cache_disabled: if reset {
                self.cache_disabled.swap(0, Ordering::Relaxed)
            } else {
                self.cache_disabled.load(Ordering::Relaxed)
            },
        }
    }

    /// Logs and resets the local counters.
    pub fn report_and_reset(&self) -> StatsSnapshot {
        let snapshot = self.take_snapshot();
        for tier in CacheTier::ALL {
            let stats = snapshot.tier(tier);
            info!(
                "Cache stats {}: {} hits, {} misses, {} errors, hit rate {:.1}%",
                tier,
                stats.hits,
                stats.misses,
                stats.errors,
                stats.hit_rate() * 100.0
            );
        }
        if snapshot.cache_disabled > 0 {
            info!(
                "Cache stats: {} calls bypassed the disabled cache",
                snapshot.cache_disabled
            );
        }
        snapshot
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(Arc::new(NoopMetricsSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_forwards_to_sink_and_counts() {
        let sink = CollectingMetricsSink::new();
        let recorder = MetricsRecorder::new(Arc::new(sink.clone()));

        recorder.record(CacheTier::L3, CacheOutcome::Hit, Duration::from_millis(2));
        recorder.record(CacheTier::L3, CacheOutcome::Miss, Duration::from_millis(1));
        recorder.record(CacheTier::L2, CacheOutcome::Error, Duration::ZERO);

        assert_eq!(sink.samples().len(), 3);
        assert_eq!(sink.count(CacheTier::L3, CacheOutcome::Hit), 1);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.l3.hits, 1);
        assert_eq!(snapshot.l3.misses, 1);
        assert_eq!(snapshot.l3.total_duration_ms, 3);
        assert_eq!(snapshot.l2.errors, 1);
        assert_eq!(snapshot.l3.hit_rate(), 0.5);
    }

    #[test]
    fn test_disabled_cache_is_not_a_tier_sample() {
        let sink = CollectingMetricsSink::new();
        let recorder = MetricsRecorder::new(Arc::new(sink.clone()));

        recorder.record_cache_disabled("feature flag off");
        recorder.record_cache_disabled("feature flag off");

        assert!(sink.samples().is_empty());
        assert_eq!(recorder.snapshot().cache_disabled, 2);
    }

    #[test]
    fn test_take_snapshot_resets() {
        let recorder = MetricsRecorder::default();
        recorder.record(CacheTier::L1, CacheOutcome::Hit, Duration::ZERO);
        recorder.record_cache_disabled("off");

        let taken = recorder.report_and_reset();
        assert_eq!(taken.l1.hits, 1);
        assert_eq!(taken.cache_disabled, 1);
        assert_eq!(recorder.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_sample_serializes_closed_labels() {
        let sample = CacheSample {
            tier: CacheTier::L2,
            outcome: CacheOutcome::Miss,
            duration_ms: 4,
        };
        let json = serde_json::to_value(sample).unwrap();
        assert_eq!(json["tier"], "l2");
        assert_eq!(json["outcome"], "miss");
        assert_eq!(json["durationMs"], 4);
    }
}
