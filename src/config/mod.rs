//! Configuration
//!
//! YAML-backed settings for the cache tiers, compression, prefetching and
//! alert thresholds, plus the TTL duration parser used by per-source
//! policies.

mod duration;
mod settings;

pub use duration::{parse_duration, MAX_DURATION};
pub use settings::{
    CacheConfig, CompressionSettings, DefaultSettings, MemorySettings, MonitoringSettings,
    PrefetchSettings, SqliteSettings,
};
