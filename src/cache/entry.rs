//! Cache Entry Types
//!
//! Keys, read modes and the in-memory entry record shared by the tiers.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Composite cache key - a data source plus the subject it describes
///
/// Renders as `"{source}:{subject}"` with both parts trimmed and lowercased,
/// so `("Census", " Boulder ")` and `("census", "boulder")` hit the same row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: String,
    subject: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(source: impl AsRef<str>, subject: impl AsRef<str>) -> Self {
        Self {
            source: normalize(source.as_ref()),
            subject: normalize(subject.as_ref()),
        }
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

fn normalize(part: &str) -> String {
    part.trim().to_lowercase()
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.subject)
    }
}

impl From<&CacheKey> for String {
    fn from(key: &CacheKey) -> Self {
        key.to_string()
    }
}

/// How a read treats the tier it is issued against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Expiry-checked lookup
    #[default]
    Normal,
    /// Always a miss; no recency or expiry state is touched
    BypassCache,
    /// Sweep expired entries, then look up
    PurgeThenRead,
}

/// Entry held by the memory tier
#[derive(Debug, Clone)]
pub struct CacheEntry {
    value: Value,
    created_at: Instant,
    expires_at: Instant,
    size: u64,
    access_count: u64,
    last_accessed: Instant,
}

impl CacheEntry {
    /// Create an entry expiring `ttl` from now
    ///
    /// Fails with [`Error::Config`] when the expiry is not representable.
    pub fn new(value: Value, ttl: Duration, size: u64) -> Result<Self> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| Error::Config(format!("TTL of {:?} is out of range", ttl)))?;
        Ok(Self {
            value,
            created_at: now,
            expires_at,
            size,
            access_count: 0,
            last_accessed: now,
        })
    }

    /// Estimated resident size of `value` stored under `key`, in bytes
    ///
    /// Uses the compact JSON encoding length as the payload estimate.
    pub fn estimate_size(key: &str, value: &Value) -> u64 {
        (key.len() + value.to_string().len()) as u64
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    #[inline]
    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    /// Visible iff `now < expires_at`
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Record a read and return the new access count
    pub fn record_access(&mut self) -> u64 {
        self.last_accessed = Instant::now();
        self.access_count += 1;
        self.access_count
    }
}

// =============================================================================
// Tests
// =============================================================================
