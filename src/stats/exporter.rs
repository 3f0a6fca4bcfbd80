//! Prometheus text exposition of cache statistics
//!
//! Metrics are built into a private registry on every render so repeated
//! calls never collide with the process-global default registry.

use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use super::statistics::CacheStatistics;
use crate::error::{Error, Result};

fn metric_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

impl CacheStatistics {
    /// Render current counters in the Prometheus text format
    pub fn render_prometheus(&self) -> Result<String> {
        let registry = Registry::new_custom(Some("market_cache".to_string()), None)
            .map_err(metric_err)?;

        let hits = IntCounterVec::new(
            Opts::new("tier_hits_total", "Cache hits by tier"),
            &["tier"],
        )
        .map_err(metric_err)?;
        let misses = IntCounterVec::new(
            Opts::new("tier_misses_total", "Cache misses by tier"),
            &["tier"],
        )
        .map_err(metric_err)?;
        let size = IntGaugeVec::new(
            Opts::new("tier_size_bytes", "Resident bytes by tier"),
            &["tier"],
        )
        .map_err(metric_err)?;
        let latency = GaugeVec::new(
            Opts::new("tier_latency_ms", "Hit latency percentiles by tier"),
            &["tier", "quantile"],
        )
        .map_err(metric_err)?;
        let source_hits = IntCounterVec::new(
            Opts::new("source_hits_total", "Cache hits by data source"),
            &["source"],
        )
        .map_err(metric_err)?;
        let source_misses = IntCounterVec::new(
            Opts::new("source_misses_total", "Cache misses by data source"),
            &["source"],
        )
        .map_err(metric_err)?;

        for (tier, stats) in self.get_tier_stats() {
            let tier = tier.name();
            hits.with_label_values(&[tier]).inc_by(stats.hits);
            misses.with_label_values(&[tier]).inc_by(stats.misses);
            size.with_label_values(&[tier])
                .set(i64::try_from(stats.size_bytes).unwrap_or(i64::MAX));
            for (quantile, value) in [
                ("0.5", stats.latency.p50_ms),
                ("0.95", stats.latency.p95_ms),
                ("0.99", stats.latency.p99_ms),
            ] {
                latency.with_label_values(&[tier, quantile]).set(value);
            }
        }

        for (source, stats) in self.get_source_stats() {
            source_hits
                .with_label_values(&[source.as_str()])
                .inc_by(stats.hits);
            source_misses
                .with_label_values(&[source.as_str()])
                .inc_by(stats.misses);
        }

        registry.register(Box::new(hits)).map_err(metric_err)?;
        registry.register(Box::new(misses)).map_err(metric_err)?;
        registry.register(Box::new(size)).map_err(metric_err)?;
        registry.register(Box::new(latency)).map_err(metric_err)?;
        registry.register(Box::new(source_hits)).map_err(metric_err)?;
        registry.register(Box::new(source_misses)).map_err(metric_err)?;

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(metric_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTier;
    use std::time::Duration;

    #[test]
    fn test_render_prometheus() {
        let stats = CacheStatistics::new();
        stats.record_hit("census", CacheTier::Memory, Duration::from_millis(2));
        stats.record_miss("census", CacheTier::Persistent);
        stats.update_storage_size(CacheTier::Memory, 2048);

        let text = stats.render_prometheus().unwrap();
        assert!(text.contains("market_cache_tier_hits_total{tier=\"memory\"} 1"));
        assert!(text.contains("market_cache_tier_misses_total{tier=\"persistent\"} 1"));
        assert!(text.contains("market_cache_tier_size_bytes{tier=\"memory\"} 2048"));
        assert!(text.contains("market_cache_source_hits_total{source=\"census\"} 1"));
    }

    #[test]
    fn test_render_twice() {
        let stats = CacheStatistics::new();
        assert!(stats.render_prometheus().is_ok());
        assert!(stats.render_prometheus().is_ok());
    }
}
