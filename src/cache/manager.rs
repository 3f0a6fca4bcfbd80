//! Tiered Cache - Memory over SQLite
//!
//! Read-through composition of the two tiers. Lookups try memory first, then
//! the persistent store; persistent hits are promoted into memory for the
//! remainder of their TTL. Writes go to both tiers with the source's TTL
//! policy. Every lookup is recorded in [`CacheStatistics`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::codec::{CompressedCodec, JsonCodec, ValueCodec};
use super::entry::{CacheKey, ReadMode};
use super::memory::MemoryCache;
use super::persistent::PersistentCache;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::stats::CacheStatistics;

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process LRU (hot)
    Memory,
    /// SQLite (warm)
    Persistent,
}

impl CacheTier {
    pub fn name(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Persistent => "persistent",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Cache lookup result
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub value: Value,
    /// Which tier answered
    pub tier: CacheTier,
    /// Total lookup latency across tiers
    pub latency: Duration,
}

/// Two-tier cache shared by every connector
pub struct TieredCache {
    memory: Option<MemoryCache>,
    persistent: Option<PersistentCache>,
    stats: Arc<CacheStatistics>,
    config: CacheConfig,
}

impl TieredCache {
    /// Assemble from already-built tiers
    pub fn new(
        config: CacheConfig,
        memory: Option<MemoryCache>,
        persistent: Option<PersistentCache>,
    ) -> Self {
        Self {
            memory,
            persistent,
            stats: Arc::new(CacheStatistics::new()),
            config,
        }
    }

    /// Build the tiers enabled in `config`
    pub fn from_config(config: CacheConfig) -> Result<Self> {
        let memory = if config.memory.enable {
            Some(MemoryCache::new(config.memory_capacity_bytes())?)
        } else {
            None
        };

        let persistent = if config.sqlite.enable {
            Some(PersistentCache::open(
                &config.sqlite.path,
                Self::codec_for(&config),
            )?)
        } else {
            None
        };

        Ok(Self::new(config, memory, persistent))
    }

    /// Memory tier plus a private in-memory SQLite store
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        let memory = MemoryCache::new(config.memory_capacity_bytes())?;
        let persistent = PersistentCache::in_memory_with_codec(Self::codec_for(&config))?;
        Ok(Self::new(config, Some(memory), Some(persistent)))
    }

    fn codec_for(config: &CacheConfig) -> Arc<dyn ValueCodec> {
        if config.compression.enable {
            Arc::new(CompressedCodec::json(config.compression_config()))
        } else {
            Arc::new(JsonCodec)
        }
    }

    /// Look up `source:subject`, trying memory then the persistent tier
    pub fn get(&self, source: &str, subject: &str, mode: ReadMode) -> Result<Option<CacheLookup>> {
        let cache_key = CacheKey::new(source, subject);
        let key = cache_key.to_string();
        let source = cache_key.source();
        let start = Instant::now();

        if let Some(memory) = &self.memory {
            let tier_start = Instant::now();
            if let Some(entry) = memory.get_entry(&key, mode) {
                self.stats
                    .record_hit(source, CacheTier::Memory, tier_start.elapsed());
                return Ok(Some(CacheLookup {
                    value: entry.value().clone(),
                    tier: CacheTier::Memory,
                    latency: start.elapsed(),
                }));
            }
            self.stats.record_miss(source, CacheTier::Memory);
        }

        let Some(persistent) = &self.persistent else {
            return Ok(None);
        };

        let tier_start = Instant::now();
        match persistent.get_entry(&key, mode)? {
            Some(entry) => {
                self.stats
                    .record_hit(source, CacheTier::Persistent, tier_start.elapsed());
                self.promote(&key, &entry.value, entry.remaining_ttl());
                Ok(Some(CacheLookup {
                    value: entry.value,
                    tier: CacheTier::Persistent,
                    latency: start.elapsed(),
                }))
            }
            None => {
                self.stats.record_miss(source, CacheTier::Persistent);
                Ok(None)
            }
        }
    }

    /// Value-only lookup in normal mode
    pub fn get_value(&self, source: &str, subject: &str) -> Result<Option<Value>> {
        Ok(self
            .get(source, subject, ReadMode::Normal)?
            .map(|lookup| lookup.value))
    }

    fn promote(&self, key: &str, value: &Value, remaining: Duration) {
        let Some(memory) = &self.memory else {
            return;
        };
        if remaining.is_zero() {
            return;
        }
        match memory.set(key, value.clone(), remaining) {
            Ok(()) => {
                debug!(key, "Promoted persistent entry to memory");
                self.stats
                    .update_storage_size(CacheTier::Memory, memory.size_bytes());
            }
            Err(e) => debug!(key, "Skipped promotion: {}", e),
        }
    }

    /// Store under the source's TTL policy
    pub fn set(&self, source: &str, subject: &str, value: Value) -> Result<()> {
        let ttl = self.config.ttl_for(source);
        self.set_with_ttl(source, subject, value, ttl)
    }

    /// Store with an explicit TTL
    ///
    /// The persistent write happens first; a value too large for memory is
    /// still kept on disk when that tier exists.
    pub fn set_with_ttl(&self, source: &str, subject: &str, value: Value, ttl: Duration) -> Result<()> {
        let key = CacheKey::new(source, subject).to_string();

        if let Some(persistent) = &self.persistent {
            persistent.set(&key, &value, ttl)?;
        }

        if let Some(memory) = &self.memory {
            match memory.set(&key, value, ttl) {
                Ok(()) => {}
                Err(e @ Error::ValueTooLarge { .. }) if self.persistent.is_some() => {
                    // A stale memory copy would shadow the fresh row
                    memory.delete(&key);
                    warn!(key = %key, "Not cached in memory: {}", e);
                }
                Err(e) => return Err(e),
            }
            self.stats
                .update_storage_size(CacheTier::Memory, memory.size_bytes());
        }

        Ok(())
    }

    /// Live entry in either tier; touches no counters or recency
    pub fn contains(&self, source: &str, subject: &str) -> Result<bool> {
        let key = CacheKey::new(source, subject).to_string();

        if let Some(memory) = &self.memory {
            if memory.contains(&key) {
                return Ok(true);
            }
        }
        match &self.persistent {
            Some(persistent) => persistent.contains(&key),
            None => Ok(false),
        }
    }

    /// Remove from both tiers; true if either held it
    pub fn delete(&self, source: &str, subject: &str) -> Result<bool> {
        let key = CacheKey::new(source, subject).to_string();

        let mut deleted = false;
        if let Some(memory) = &self.memory {
            deleted |= memory.delete(&key);
        }
        if let Some(persistent) = &self.persistent {
            deleted |= persistent.delete(&key)?;
        }
        Ok(deleted)
    }

    /// Sweep expired entries from both tiers, returning the total removed
    pub fn clear_expired(&self) -> Result<usize> {
        let mut removed = 0;
        if let Some(memory) = &self.memory {
            removed += memory.clear_expired();
        }
        if let Some(persistent) = &self.persistent {
            removed += persistent.clear_expired()?;
        }
        self.refresh_storage_stats()?;
        Ok(removed)
    }

    /// Drop every entry from both tiers, returning the persistent row count
    pub fn purge(&self) -> Result<usize> {
        if let Some(memory) = &self.memory {
            memory.clear();
        }
        let removed = match &self.persistent {
            Some(persistent) => persistent.purge()?,
            None => 0,
        };
        self.refresh_storage_stats()?;
        Ok(removed)
    }

    /// Push current tier sizes into the statistics
    pub fn refresh_storage_stats(&self) -> Result<()> {
        if let Some(memory) = &self.memory {
            self.stats
                .update_storage_size(CacheTier::Memory, memory.size_bytes());
        }
        if let Some(persistent) = &self.persistent {
            self.stats
                .update_storage_size(CacheTier::Persistent, persistent.stats()?.size_bytes);
        }
        Ok(())
    }

    /// TTL applied to values from `source`
    pub fn ttl_for(&self, source: &str) -> Duration {
        self.config.ttl_for(source)
    }

    pub fn stats(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    pub fn memory(&self) -> Option<&MemoryCache> {
        self.memory.as_ref()
    }

    pub fn persistent(&self) -> Option<&PersistentCache> {
        self.persistent.as_ref()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("memory", &self.memory)
            .field("persistent", &self.persistent)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn cache() -> TieredCache {
        TieredCache::in_memory(CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_set_writes_both_tiers() {
        let cache = cache();
        cache.set("Census", "Boulder", json!({"population": 108250})).unwrap();

        assert!(cache.memory().unwrap().contains("census:boulder"));
        assert!(cache.persistent().unwrap().contains("census:boulder").unwrap());
    }

    #[test]
    fn test_memory_hit_first() {
        let cache = cache();
        cache.set("bls", "denver", json!(3.4)).unwrap();

        let lookup = cache.get("bls", "denver", ReadMode::Normal).unwrap().unwrap();
        assert_eq!(lookup.tier, CacheTier::Memory);
        assert_eq!(lookup.value, json!(3.4));

        let tiers = cache.stats().get_tier_stats();
        assert_eq!(tiers[&CacheTier::Memory].hits, 1);
        assert_eq!(tiers[&CacheTier::Persistent].hits, 0);
    }

    #[test]
    fn test_persistent_hit_promotes() {
        let cache = cache();
        cache.set("bea", "provo", json!({"gdp": 1})).unwrap();
        cache.memory().unwrap().clear();

        let lookup = cache.get("bea", "provo", ReadMode::Normal).unwrap().unwrap();
        assert_eq!(lookup.tier, CacheTier::Persistent);
        assert!(cache.memory().unwrap().contains("bea:provo"));

        let lookup = cache.get("bea", "provo", ReadMode::Normal).unwrap().unwrap();
        assert_eq!(lookup.tier, CacheTier::Memory);

        let sources = cache.stats().get_source_stats();
        assert_eq!(sources["bea"].hits, 2);
        assert_eq!(sources["bea"].misses, 1);
    }

    #[test]
    fn test_full_miss_records_both_tiers() {
        let cache = cache();
        assert!(cache.get("epa", "boise", ReadMode::Normal).unwrap().is_none());

        let tiers = cache.stats().get_tier_stats();
        assert_eq!(tiers[&CacheTier::Memory].misses, 1);
        assert_eq!(tiers[&CacheTier::Persistent].misses, 1);
    }

    #[test]
    fn test_bypass_misses_everywhere() {
        let cache = cache();
        cache.set("osm", "ogden", json!([1, 2])).unwrap();
        assert!(cache.get("osm", "ogden", ReadMode::BypassCache).unwrap().is_none());
        assert!(cache.contains("osm", "ogden").unwrap());
    }

    #[test]
    fn test_delete_and_purge() {
        let cache = cache();
        cache.set("census", "a", json!(1)).unwrap();
        cache.set("census", "b", json!(2)).unwrap();

        assert!(cache.delete("census", "a").unwrap());
        assert!(!cache.contains("census", "a").unwrap());
        assert!(!cache.delete("census", "a").unwrap());

        assert_eq!(cache.purge().unwrap(), 1);
        assert!(!cache.contains("census", "b").unwrap());
        assert_eq!(cache.memory().unwrap().len(), 0);
    }

    #[test]
    fn test_ttl_policy_applied() {
        let cache = cache();
        assert_eq!(cache.ttl_for("census"), Duration::from_secs(30 * 86400));
        assert_eq!(cache.ttl_for("zillow"), Duration::from_secs(86400));
    }

    #[test]
    fn test_too_large_for_memory_kept_on_disk() {
        let mut config = CacheConfig::default();
        config.memory.size_mb = 1;
        let cache = TieredCache::in_memory(config).unwrap();

        let big = json!("x".repeat(2 * 1024 * 1024));
        cache.set("fema", "boulder", big.clone()).unwrap();

        assert!(!cache.memory().unwrap().contains("fema:boulder"));
        assert_eq!(cache.get_value("fema", "boulder").unwrap(), Some(big));
    }

    #[test]
    fn test_oversized_overwrite_drops_stale_memory_copy() {
        let config = CacheConfig::default();
        let memory = MemoryCache::new(200).unwrap();
        let persistent = PersistentCache::in_memory().unwrap();
        let cache = TieredCache::new(config, Some(memory), Some(persistent));

        cache.set("census", "boulder", json!("old")).unwrap();
        let big = json!("x".repeat(1000));
        cache.set("census", "boulder", big.clone()).unwrap();

        assert!(!cache.memory().unwrap().contains("census:boulder"));
        let lookup = cache.get("census", "boulder", ReadMode::Normal).unwrap().unwrap();
        assert_eq!(lookup.tier, CacheTier::Persistent);
        assert_eq!(lookup.value, big);
    }

    #[test]
    fn test_memory_only_rejects_unrepresentable_ttl() {
        let mut config = CacheConfig::default();
        config.sqlite.enable = false;
        let memory = MemoryCache::new(config.memory_capacity_bytes()).unwrap();
        let cache = TieredCache::new(config, Some(memory), None);

        let err = cache
            .set_with_ttl("census", "boulder", json!(1), Duration::MAX)
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(!cache.contains("census", "boulder").unwrap());
    }

    #[test]
    fn test_memory_only_rejects_oversized() {
        let mut config = CacheConfig::default();
        config.memory.size_mb = 1;
        config.sqlite.enable = false;
        let memory = MemoryCache::new(config.memory_capacity_bytes()).unwrap();
        let cache = TieredCache::new(config, Some(memory), None);

        let err = cache
            .set("fema", "boulder", json!("x".repeat(2 * 1024 * 1024)))
            .unwrap_err();
        assert_matches!(err, Error::ValueTooLarge { .. });
    }

    #[test]
    fn test_from_config_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CacheConfig::default();
        config.sqlite.path = dir.path().join("cache.db");

        {
            let cache = TieredCache::from_config(config.clone()).unwrap();
            cache.set("hud", "greeley", json!({"fmr": 1400})).unwrap();
        }

        let cache = TieredCache::from_config(config).unwrap();
        let lookup = cache.get("hud", "greeley", ReadMode::Normal).unwrap().unwrap();
        assert_eq!(lookup.tier, CacheTier::Persistent);
        assert_eq!(lookup.value, json!({"fmr": 1400}));
    }

    #[test]
    fn test_storage_stats_refresh() {
        let cache = cache();
        cache.set("census", "denver", json!({"n": 1})).unwrap();
        cache.refresh_storage_stats().unwrap();

        let storage = cache.stats().get_storage_stats();
        assert!(storage[&CacheTier::Memory] > 0);
        assert!(storage[&CacheTier::Persistent] > 0);
    }
}
