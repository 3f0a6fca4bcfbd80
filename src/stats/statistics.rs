//! Cache statistics collection
//!
//! Per-tier and per-source hit/miss counters, bounded latency samples and
//! resident sizes, plus the derived views (summary, percentiles, alerts).

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::CacheTier;
use crate::error::Result;

/// Latency samples kept per tier
pub const MAX_LATENCY_SAMPLES: usize = 1000;

/// Alert raised when the overall hit rate is below the threshold
pub const ALERT_LOW_HIT_RATE: &str = "low_hit_rate";

/// Alert raised when p95 latency is above the threshold
pub const ALERT_HIGH_LATENCY: &str = "high_latency";

// =============================================================================
// Snapshots
// =============================================================================

/// Latency distribution in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyMetrics {
    pub samples: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencyMetrics {
    /// Compute from unsorted samples
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Self {
            samples: sorted.len(),
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            mean_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
        }
    }
}

/// Linear interpolation between the order statistics bracketing rank
/// `(n-1) * p / 100`. `sorted` must be ascending.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (n - 1) as f64 * p.clamp(0.0, 100.0) / 100.0;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            (sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
                .clamp(sorted[lower], sorted[upper])
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// One tier's counters
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size_bytes: u64,
    pub latency: LatencyMetrics,
}

/// One data source's counters
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Everything at once, as exported
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub uptime_seconds: f64,
    pub generated_at: DateTime<Utc>,
    pub latency: LatencyMetrics,
    pub tiers: BTreeMap<CacheTier, TierStats>,
    pub sources: BTreeMap<String, SourceStats>,
    pub storage: BTreeMap<CacheTier, u64>,
}

// =============================================================================
// Collector
// =============================================================================

#[derive(Debug, Default)]
struct TierCounters {
    hits: u64,
    misses: u64,
    latencies_ms: VecDeque<f64>,
    size_bytes: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct SourceCounters {
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct Inner {
    tiers: BTreeMap<CacheTier, TierCounters>,
    sources: BTreeMap<String, SourceCounters>,
    started: Instant,
}

impl Inner {
    fn new() -> Self {
        let tiers = [CacheTier::Memory, CacheTier::Persistent]
            .into_iter()
            .map(|tier| (tier, TierCounters::default()))
            .collect();
        Self {
            tiers,
            sources: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    fn all_latencies(&self) -> Vec<f64> {
        self.tiers
            .values()
            .flat_map(|t| t.latencies_ms.iter().copied())
            .collect()
    }

    fn tier_stats(&self) -> BTreeMap<CacheTier, TierStats> {
        self.tiers
            .iter()
            .map(|(tier, c)| {
                let samples: Vec<f64> = c.latencies_ms.iter().copied().collect();
                (
                    *tier,
                    TierStats {
                        hits: c.hits,
                        misses: c.misses,
                        hit_rate: hit_rate(c.hits, c.misses),
                        size_bytes: c.size_bytes,
                        latency: LatencyMetrics::from_samples(&samples),
                    },
                )
            })
            .collect()
    }

    fn source_stats(&self) -> BTreeMap<String, SourceStats> {
        self.sources
            .iter()
            .map(|(source, c)| {
                (
                    source.clone(),
                    SourceStats {
                        hits: c.hits,
                        misses: c.misses,
                        hit_rate: hit_rate(c.hits, c.misses),
                    },
                )
            })
            .collect()
    }

    fn storage_stats(&self) -> BTreeMap<CacheTier, u64> {
        self.tiers
            .iter()
            .map(|(tier, c)| (*tier, c.size_bytes))
            .collect()
    }
}

/// Thread-safe statistics shared by the cache tiers
#[derive(Debug)]
pub struct CacheStatistics {
    inner: Mutex<Inner>,
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record a hit served by `tier` after `latency`
    pub fn record_hit(&self, source: &str, tier: CacheTier, latency: Duration) {
        let mut inner = self.inner.lock();

        let counters = inner.tiers.entry(tier).or_default();
        counters.hits += 1;
        if counters.latencies_ms.len() == MAX_LATENCY_SAMPLES {
            counters.latencies_ms.pop_front();
        }
        counters
            .latencies_ms
            .push_back(latency.as_secs_f64() * 1000.0);

        inner.sources.entry(source.to_string()).or_default().hits += 1;
    }

    /// Record a miss at `tier`
    pub fn record_miss(&self, source: &str, tier: CacheTier) {
        let mut inner = self.inner.lock();
        inner.tiers.entry(tier).or_default().misses += 1;
        inner.sources.entry(source.to_string()).or_default().misses += 1;
    }

    /// Set the current resident size of `tier`
    pub fn update_storage_size(&self, tier: CacheTier, size_bytes: u64) {
        self.inner.lock().tiers.entry(tier).or_default().size_bytes = size_bytes;
    }

    pub fn get_tier_stats(&self) -> BTreeMap<CacheTier, TierStats> {
        self.inner.lock().tier_stats()
    }

    pub fn get_source_stats(&self) -> BTreeMap<String, SourceStats> {
        self.inner.lock().source_stats()
    }

    /// Latency distribution across every tier's retained samples
    pub fn get_latency_metrics(&self) -> LatencyMetrics {
        let samples = self.inner.lock().all_latencies();
        LatencyMetrics::from_samples(&samples)
    }

    /// Resident bytes per tier
    pub fn get_storage_stats(&self) -> BTreeMap<CacheTier, u64> {
        self.inner.lock().storage_stats()
    }

    /// Consistent snapshot of every counter, taken under one lock
    pub fn get_summary(&self) -> StatsSummary {
        let inner = self.inner.lock();
        let hits: u64 = inner.tiers.values().map(|c| c.hits).sum();
        let misses: u64 = inner.tiers.values().map(|c| c.misses).sum();

        StatsSummary {
            total_requests: hits + misses,
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            uptime_seconds: inner.started.elapsed().as_secs_f64(),
            generated_at: Utc::now(),
            latency: LatencyMetrics::from_samples(&inner.all_latencies()),
            tiers: inner.tier_stats(),
            sources: inner.source_stats(),
            storage: inner.storage_stats(),
        }
    }

    /// Names of the alert conditions currently raised
    pub fn check_alerts(&self, min_hit_rate: f64, max_latency_ms: f64) -> Vec<String> {
        let summary = self.get_summary();
        let mut alerts = Vec::new();

        if summary.total_requests > 0 && summary.hit_rate < min_hit_rate {
            warn!(
                hit_rate = summary.hit_rate,
                threshold = min_hit_rate,
                "Cache hit rate below threshold"
            );
            alerts.push(ALERT_LOW_HIT_RATE.to_string());
        }

        if summary.latency.p95_ms > max_latency_ms {
            warn!(
                p95_ms = summary.latency.p95_ms,
                threshold_ms = max_latency_ms,
                "Cache p95 latency above threshold"
            );
            alerts.push(ALERT_HIGH_LATENCY.to_string());
        }

        alerts
    }

    /// Zero every counter and sample; sizes are cleared too
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
        debug!("Cache statistics reset");
    }

    /// Write the summary as pretty-printed JSON
    pub fn export(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.get_summary())?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "Exported cache statistics");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
