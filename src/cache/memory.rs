//! Memory Cache - In-Process Hot Tier
//!
//! Byte-bounded LRU with per-entry TTL.
//!
//! # Design
//!
//! - `lru::LruCache` (unbounded) keeps recency order; the byte budget is
//!   enforced here, evicting from the LRU end until a new entry fits
//! - A single mutex guards the map and the resident size so that
//!   expire/evict/insert sequences are atomic
//! - Expired entries are removed lazily on read and by `clear_expired`;
//!   those removals are counted apart from capacity evictions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::entry::{CacheEntry, ReadMode};
use crate::error::{Error, Result};

struct Inner {
    entries: LruCache<String, CacheEntry>,
    size_bytes: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.size_bytes -= entry.size();
        Some(entry)
    }
}

/// Memory cache - RAM-based hot tier
pub struct MemoryCache {
    inner: Mutex<Inner>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_evictions: AtomicU64,
}

/// Memory tier statistics
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub hits: u64,
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_rate: f64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Entries removed because their TTL ran out
    pub expired_evictions: u64,
    pub size_bytes: u64,
    pub capacity_bytes: u64,
    pub entries: usize,
    /// Utilization (0.0 - 1.0)
    pub utilization: f64,
}

impl MemoryCache {
    /// Create a cache holding at most `capacity_bytes` of estimated payload
    pub fn new(capacity_bytes: u64) -> Result<Self> {
        if capacity_bytes == 0 {
            return Err(Error::Config(
                "memory cache capacity must be greater than 0".into(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                size_bytes: 0,
            }),
            capacity: capacity_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_evictions: AtomicU64::new(0),
        })
    }

    /// Create with capacity given in megabytes
    pub fn with_size_mb(size_mb: u64) -> Result<Self> {
        let capacity = size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            Error::Config(format!("memory size of {} MB is out of range", size_mb))
        })?;
        Self::new(capacity)
    }

    /// Get a value, promoting it to most-recently-used
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key, ReadMode::Normal)
            .map(|entry| entry.value().clone())
    }

    /// Get a value using an explicit read mode
    pub fn get_with(&self, key: &str, mode: ReadMode) -> Option<Value> {
        self.get_entry(key, mode).map(|entry| entry.value().clone())
    }

    /// Get a copy of the full entry (value plus timing metadata)
    pub fn get_entry(&self, key: &str, mode: ReadMode) -> Option<CacheEntry> {
        match mode {
            ReadMode::BypassCache => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            ReadMode::PurgeThenRead => {
                self.clear_expired();
            }
            ReadMode::Normal => {}
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.peek(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            inner.remove(key);
            self.expired_evictions.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key, "Memory entry expired on read");
            return None;
        }

        let entry = inner.entries.get_mut(key)?;
        entry.record_access();
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Insert or overwrite a value
    ///
    /// Fails with [`Error::ValueTooLarge`] when the value alone exceeds the
    /// capacity; nothing is evicted or written in that case.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(Error::Config(format!("TTL for '{}' must be greater than 0", key)));
        }

        let size = CacheEntry::estimate_size(key, &value);
        if size > self.capacity {
            return Err(Error::ValueTooLarge {
                key: key.to_string(),
                size,
                capacity: self.capacity,
            });
        }

        let entry = CacheEntry::new(value, ttl, size)?;

        let mut inner = self.inner.lock();
        inner.remove(key);

        while inner.size_bytes + size > self.capacity {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.size_bytes -= evicted.size();
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %evicted_key, size = evicted.size(), "Evicted LRU entry");
                }
                None => break,
            }
        }

        inner
            .entries
            .push(key.to_string(), entry);
        inner.size_bytes += size;

        Ok(())
    }

    /// Remove a key; true if it was present
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Check for a live entry without touching recency or counters
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .peek(key)
            .map(|entry| !entry.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size_bytes = 0;
    }

    /// Physically remove all expired entries, returning how many were dropped
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }

        let removed = expired.len();
        if removed > 0 {
            self.expired_evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Cleared expired memory entries");
        }
        removed
    }

    /// Current estimated resident size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from most- to least-recently used
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> MemoryStats {
        let (size_bytes, entries) = {
            let inner = self.inner.lock();
            (inner.size_bytes, inner.entries.len())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        MemoryStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_evictions: self.expired_evictions.load(Ordering::Relaxed),
            size_bytes,
            capacity_bytes: self.capacity,
            entries,
            utilization: size_bytes as f64 / self.capacity as f64,
        }
    }

    /// Zero the hit/miss/eviction counters; entries are kept
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expired_evictions.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("capacity", &self.capacity)
            .field("size_bytes", &self.size_bytes())
            .field("entries", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
