//! Cache configuration loaded from YAML
//!
//! Every section has a `Default` so a partial file (or none at all) yields a
//! usable configuration. TTL policy strings are parsed once during
//! [`CacheConfig::validate`]; lookups after that never fail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::duration::parse_duration;
use crate::cache::compression::{CompressionAlgorithm, CompressionConfig};
use crate::error::{Error, Result};
use crate::warmer::WarmerConfig;

// =============================================================================
// Sections
// =============================================================================

/// In-process LRU tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub enable: bool,
    pub size_mb: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enable: true,
            size_mb: 256,
        }
    }
}

/// SQLite tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteSettings {
    pub enable: bool,
    pub path: PathBuf,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        Self {
            enable: true,
            path: PathBuf::from("./data/cache.db"),
        }
    }
}

/// Compression of persistent payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub enable: bool,
    pub threshold_kb: u64,
    /// 0-9, mapped onto the LZ4 high-compression level
    pub level: u8,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enable: true,
            threshold_kb: 10,
            level: 6,
        }
    }
}

/// Cache warming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchSettings {
    pub enabled: bool,
    pub nearby_radius_miles: f64,
    pub max_parallel_requests: usize,
    pub max_requests_per_second: f64,
    pub max_wait_seconds: u64,
    pub continue_on_error: bool,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            nearby_radius_miles: 50.0,
            max_parallel_requests: 5,
            max_requests_per_second: 10.0,
            max_wait_seconds: 30,
            continue_on_error: true,
        }
    }
}

/// Alert thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub alert_on_low_hit_rate: f64,
    pub alert_on_high_latency_ms: f64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            alert_on_low_hit_rate: 0.7,
            alert_on_high_latency_ms: 100.0,
        }
    }
}

/// Fallbacks for sources without a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSettings {
    pub ttl: String,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            ttl: "24h".to_string(),
        }
    }
}

fn default_ttl_policies() -> HashMap<String, String> {
    [
        ("census", "30d"),
        ("bls", "7d"),
        ("bea", "30d"),
        ("epa", "14d"),
        ("osm", "7d"),
        ("fema", "30d"),
        ("hud", "30d"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Top-level configuration for both cache tiers, the warmer and alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory: MemorySettings,
    pub sqlite: SqliteSettings,
    pub compression: CompressionSettings,
    pub prefetch: PrefetchSettings,
    pub monitoring: MonitoringSettings,
    pub defaults: DefaultSettings,
    pub ttl_policies: HashMap<String, String>,

    #[serde(skip)]
    resolved_default_ttl: Duration,
    #[serde(skip)]
    resolved_ttls: HashMap<String, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut config = Self {
            memory: MemorySettings::default(),
            sqlite: SqliteSettings::default(),
            compression: CompressionSettings::default(),
            prefetch: PrefetchSettings::default(),
            monitoring: MonitoringSettings::default(),
            defaults: DefaultSettings::default(),
            ttl_policies: default_ttl_policies(),
            resolved_default_ttl: Duration::from_secs(24 * 3600),
            resolved_ttls: HashMap::new(),
        };
        // Built-in policies are known-good
        for (source, ttl) in &config.ttl_policies {
            if let Ok(d) = parse_duration(ttl) {
                config.resolved_ttls.insert(source.to_lowercase(), d);
            }
        }
        config
    }
}

impl CacheConfig {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml_str(&raw)?;
        debug!(path = %path.display(), policies = config.ttl_policies.len(), "Loaded cache config");
        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let mut config: CacheConfig = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting and resolve TTL policies
    pub fn validate(&mut self) -> Result<()> {
        if self.memory.enable && self.memory.size_mb == 0 {
            return Err(Error::Config("memory.size_mb must be greater than 0".into()));
        }
        if self.memory.size_mb.checked_mul(1024 * 1024).is_none() {
            return Err(Error::Config(format!(
                "memory.size_mb of {} is out of range",
                self.memory.size_mb
            )));
        }
        if self.sqlite.enable && self.sqlite.path.as_os_str().is_empty() {
            return Err(Error::Config("sqlite.path must not be empty".into()));
        }
        if self.compression.level > 9 {
            return Err(Error::Config(format!(
                "compression.level must be 0-9, got {}",
                self.compression.level
            )));
        }
        if self.prefetch.max_parallel_requests == 0 {
            return Err(Error::Config(
                "prefetch.max_parallel_requests must be greater than 0".into(),
            ));
        }
        if !(self.prefetch.max_requests_per_second > 0.0) {
            return Err(Error::Config(
                "prefetch.max_requests_per_second must be greater than 0".into(),
            ));
        }
        if self.prefetch.nearby_radius_miles < 0.0 {
            return Err(Error::Config(
                "prefetch.nearby_radius_miles must not be negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.monitoring.alert_on_low_hit_rate) {
            return Err(Error::Config(
                "monitoring.alert_on_low_hit_rate must be within 0-1".into(),
            ));
        }

        self.resolved_default_ttl = parse_duration(&self.defaults.ttl)
            .map_err(|e| Error::Config(format!("defaults.ttl: {}", e)))?;

        let mut resolved = HashMap::with_capacity(self.ttl_policies.len());
        for (source, ttl) in &self.ttl_policies {
            let d = parse_duration(ttl)
                .map_err(|e| Error::Config(format!("ttl_policies.{}: {}", source, e)))?;
            resolved.insert(source.to_lowercase(), d);
        }
        self.resolved_ttls = resolved;

        Ok(())
    }

    /// TTL for a data source, falling back to `defaults.ttl`
    pub fn ttl_for(&self, source: &str) -> Duration {
        self.resolved_ttls
            .get(&source.to_lowercase())
            .copied()
            .unwrap_or(self.resolved_default_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.resolved_default_ttl
    }

    /// Resolved TTL policies, sorted by source name
    pub fn resolved_policies(&self) -> Vec<(String, Duration)> {
        let mut policies: Vec<_> = self
            .resolved_ttls
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        policies.sort_by(|a, b| a.0.cmp(&b.0));
        policies
    }

    pub fn memory_capacity_bytes(&self) -> u64 {
        self.memory.size_mb.saturating_mul(1024 * 1024)
    }

    /// Compression settings for the persistent tier codec
    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            default_algorithm: if self.compression.enable {
                CompressionAlgorithm::Lz4
            } else {
                CompressionAlgorithm::None
            },
            min_size_bytes: self.compression.threshold_kb.saturating_mul(1024),
            level: self.compression.level as i32,
            fallback_on_failure: true,
        }
    }

    /// Scheduler and warmer settings
    pub fn warmer_config(&self) -> WarmerConfig {
        WarmerConfig {
            max_parallel_requests: self.prefetch.max_parallel_requests,
            max_requests_per_second: self.prefetch.max_requests_per_second,
            max_wait: Duration::from_secs(self.prefetch.max_wait_seconds),
            nearby_radius_miles: self.prefetch.nearby_radius_miles,
            continue_on_error: self.prefetch.continue_on_error,
            skip_cached: true,
        }
    }
}
