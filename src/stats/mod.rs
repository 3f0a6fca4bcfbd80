//! Cache Statistics
//!
//! Observes both cache tiers and per-source activity: hit rates, latency
//! percentiles, resident sizes and alert conditions. Snapshots export as
//! JSON or Prometheus text.

mod exporter;
mod statistics;

pub use statistics::{
    percentile, CacheStatistics, LatencyMetrics, SourceStats, StatsSummary, TierStats,
    ALERT_HIGH_LATENCY, ALERT_LOW_HIT_RATE, MAX_LATENCY_SAMPLES,
};
