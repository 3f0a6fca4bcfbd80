//! Persistent Cache - SQLite Warm Tier
//!
//! Durable key/value store with per-row TTL. Survives restarts; shared by
//! every connector in the process through a single connection.
//!
//! # Layout
//!
//! ```sql
//! cache(key TEXT PRIMARY KEY, value BLOB, created_at TEXT, expires_at TEXT)
//! ```
//!
//! Timestamps are UTC RFC 3339 with fixed microsecond precision, so string
//! comparison in SQL orders rows chronologically.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, trace};

use super::codec::{JsonCodec, ValueCodec};
use super::entry::ReadMode;
use crate::error::{Error, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_expires_at ON cache(expires_at);
";

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("corrupt timestamp '{}': {}", raw, e)))
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    if ttl.is_zero() {
        return Err(Error::Config("TTL must be greater than 0".into()));
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| Error::Config(format!("TTL {:?} is out of range", ttl)))
}

/// A decoded row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredEntry {
    /// Time left before expiry, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Persistent tier statistics
#[derive(Debug, Clone, Serialize)]
pub struct PersistentStats {
    /// Rows in the table, expired or not
    pub entries: u64,
    /// Rows past their expiry that have not been swept yet
    pub expired_entries: u64,
    /// Stored key plus payload bytes
    pub size_bytes: u64,
    pub codec: String,
    pub path: Option<PathBuf>,
}

/// SQLite-backed cache tier
pub struct PersistentCache {
    conn: Mutex<Connection>,
    codec: Arc<dyn ValueCodec>,
    path: Option<PathBuf>,
}

impl PersistentCache {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>, codec: Arc<dyn ValueCodec>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("failed to open {}: {}", path.display(), e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), codec = codec.name(), "Opened persistent cache");

        Ok(Self {
            conn: Mutex::new(conn),
            codec,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open with the default JSON codec
    pub fn open_json(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, Arc::new(JsonCodec))
    }

    /// Private in-memory database with the JSON codec
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_codec(Arc::new(JsonCodec))
    }

    pub fn in_memory_with_codec(codec: Arc<dyn ValueCodec>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            codec,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a live value
    pub fn get(&self, key: &str, mode: ReadMode) -> Result<Option<Value>> {
        Ok(self.get_entry(key, mode)?.map(|entry| entry.value))
    }

    /// Get a live row with its timestamps
    pub fn get_entry(&self, key: &str, mode: ReadMode) -> Result<Option<StoredEntry>> {
        self.get_entry_at(key, mode, Utc::now())
    }

    fn get_entry_at(
        &self,
        key: &str,
        mode: ReadMode,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredEntry>> {
        match mode {
            ReadMode::BypassCache => return Ok(None),
            ReadMode::PurgeThenRead => {
                self.clear_expired_at(now)?;
            }
            ReadMode::Normal => {}
        }

        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, String, String)> = conn
            .query_row(
                "SELECT value, created_at, expires_at FROM cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((blob, created_at, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at = parse_ts(&expires_at)?;
        if expires_at <= now {
            conn.execute("DELETE FROM cache WHERE key = ?1", params![key])?;
            trace!(key, "Persistent entry expired on read");
            return Ok(None);
        }

        Ok(Some(StoredEntry {
            value: self.codec.decode(&blob)?,
            created_at: parse_ts(&created_at)?,
            expires_at,
        }))
    }

    /// Insert or replace a value with fresh timestamps
    pub fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        self.set_at(key, value, ttl, Utc::now())
    }

    fn set_at(&self, key: &str, value: &Value, ttl: Duration, now: DateTime<Utc>) -> Result<()> {
        let expires_at = expiry_after(now, ttl)?;
        let blob = self.codec.encode(value)?;

        self.conn.lock().execute(
            "INSERT OR REPLACE INTO cache (key, value, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, blob.as_ref(), format_ts(now), format_ts(expires_at)],
        )?;

        debug!(key, bytes = blob.len(), "Stored persistent entry");
        Ok(())
    }

    /// Typed read through serde
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key, ReadMode::Normal)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed write through serde
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        self.set(key, &serde_json::to_value(value)?, ttl)
    }

    /// Remove a row; true if it existed
    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM cache WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// True if a live row exists; does not delete expired rows
    pub fn contains(&self, key: &str) -> Result<bool> {
        let now = format_ts(Utc::now());
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Delete every expired row, returning the count
    pub fn clear_expired(&self) -> Result<usize> {
        self.clear_expired_at(Utc::now())
    }

    fn clear_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn.lock().execute(
            "DELETE FROM cache WHERE expires_at <= ?1",
            params![format_ts(now)],
        )?;
        if removed > 0 {
            debug!(removed, "Cleared expired persistent entries");
        }
        Ok(removed)
    }

    /// Delete every row, returning the count
    pub fn purge(&self) -> Result<usize> {
        let removed = self.conn.lock().execute("DELETE FROM cache", [])?;
        info!(removed, "Purged persistent cache");
        Ok(removed)
    }

    /// Row counts and stored size
    pub fn stats(&self) -> Result<PersistentStats> {
        let now = format_ts(Utc::now());
        let conn = self.conn.lock();

        let (entries, size_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM cache",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let expired: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache WHERE expires_at <= ?1",
            params![now],
            |row| row.get(0),
        )?;

        Ok(PersistentStats {
            entries: entries as u64,
            expired_entries: expired as u64,
            size_bytes: size_bytes as u64,
            codec: self.codec.name().to_string(),
            path: self.path.clone(),
        })
    }
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("path", &self.path)
            .field("codec", &self.codec.name())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::CompressedCodec;
    use crate::cache::compression::CompressionConfig;
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use serde_json::json;

    const DAY: Duration = Duration::from_secs(86400);

    fn hours_ago(h: i64) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(h)
    }

    #[test]
    fn test_set_get_delete() {
        let cache = PersistentCache::in_memory().unwrap();
        let value = json!({"median_rent": 1850, "tracts": [1, 2, 3]});

        cache.set("census:denver", &value, DAY).unwrap();
        assert_eq!(cache.get("census:denver", ReadMode::Normal).unwrap(), Some(value));
        assert!(cache.contains("census:denver").unwrap());

        assert!(cache.delete("census:denver").unwrap());
        assert!(!cache.delete("census:denver").unwrap());
        assert_eq!(cache.get("census:denver", ReadMode::Normal).unwrap(), None);
    }

    #[test]
    fn test_overwrite_refreshes_timestamps() {
        let cache = PersistentCache::in_memory().unwrap();
        cache
            .set_at("bls:provo", &json!(1), Duration::from_secs(3600), hours_ago(2))
            .unwrap();
        assert_eq!(cache.get("bls:provo", ReadMode::Normal).unwrap(), None);

        cache.set("bls:provo", &json!(2), DAY).unwrap();
        let entry = cache.get_entry("bls:provo", ReadMode::Normal).unwrap().unwrap();
        assert_eq!(entry.value, json!(2));
        assert!(entry.expires_at > Utc::now());
        assert!(entry.remaining_ttl() > Duration::from_secs(86000));
    }

    #[test]
    fn test_expired_row_is_deleted_on_read() {
        let cache = PersistentCache::in_memory().unwrap();
        cache
            .set_at("epa:boise", &json!({"aqi": 30}), Duration::from_secs(3600), hours_ago(2))
            .unwrap();

        assert!(!cache.contains("epa:boise").unwrap());
        assert_eq!(cache.stats().unwrap().entries, 1);

        assert_eq!(cache.get("epa:boise", ReadMode::Normal).unwrap(), None);
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[test]
    fn test_bypass_always_misses() {
        let cache = PersistentCache::in_memory().unwrap();
        cache.set("osm:ogden", &json!("parks"), DAY).unwrap();
        assert_eq!(cache.get("osm:ogden", ReadMode::BypassCache).unwrap(), None);
        assert!(cache.contains("osm:ogden").unwrap());
    }

    #[test]
    fn test_clear_expired_and_purge_then_read() {
        let cache = PersistentCache::in_memory().unwrap();
        let hour = Duration::from_secs(3600);
        cache.set_at("a", &json!(1), hour, hours_ago(3)).unwrap();
        cache.set_at("b", &json!(2), hour, hours_ago(2)).unwrap();
        cache.set("c", &json!(3), DAY).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.expired_entries, 2);

        assert_eq!(cache.get("c", ReadMode::PurgeThenRead).unwrap(), Some(json!(3)));
        assert_eq!(cache.stats().unwrap().entries, 1);
        assert_eq!(cache.clear_expired().unwrap(), 0);
    }

    #[test]
    fn test_purge() {
        let cache = PersistentCache::in_memory().unwrap();
        for i in 0..5 {
            cache.set(&format!("census:m{}", i), &json!(i), DAY).unwrap();
        }
        assert_eq!(cache.purge().unwrap(), 5);
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[test]
    fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Employment {
            county: String,
            unemployment_rate: f64,
        }

        let cache = PersistentCache::in_memory().unwrap();
        let record = Employment {
            county: "Utah".into(),
            unemployment_rate: 2.7,
        };
        cache.set_as("bls:utah", &record, DAY).unwrap();
        assert_eq!(cache.get_as::<Employment>("bls:utah").unwrap(), Some(record));
        assert_eq!(cache.get_as::<Employment>("bls:missing").unwrap(), None);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let cache = PersistentCache::in_memory().unwrap();
        assert_matches!(cache.set("k", &json!(1), Duration::ZERO), Err(Error::Config(_)));
    }

    #[test]
    fn test_corrupt_blob_is_cache_error() {
        let cache = PersistentCache::in_memory().unwrap();
        cache.set("k", &json!(1), DAY).unwrap();
        cache
            .conn
            .lock()
            .execute("UPDATE cache SET value = X'7B7B' WHERE key = 'k'", [])
            .unwrap();

        let err = cache.get("k", ReadMode::Normal).unwrap_err();
        assert!(err.is_cache_error());
    }

    #[test]
    fn test_compressed_codec_round_trip() {
        let codec = Arc::new(CompressedCodec::json(CompressionConfig {
            min_size_bytes: 256,
            ..Default::default()
        }));
        let cache = PersistentCache::in_memory_with_codec(codec).unwrap();

        let small = json!({"aqi": 12});
        let large = json!({"blocks": vec!["block group 0801301"; 200]});
        cache.set("small", &small, DAY).unwrap();
        cache.set("large", &large, DAY).unwrap();

        assert_eq!(cache.get("small", ReadMode::Normal).unwrap(), Some(small));
        assert_eq!(cache.get("large", ReadMode::Normal).unwrap(), Some(large));
        assert_eq!(cache.stats().unwrap().codec, "compressed");
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let cache = PersistentCache::open_json(&path).unwrap();
            cache.set("hud:fort collins", &json!({"fmr": 1620}), DAY).unwrap();
        }

        let cache = PersistentCache::open_json(&path).unwrap();
        assert_eq!(
            cache.get("hud:fort collins", ReadMode::Normal).unwrap(),
            Some(json!({"fmr": 1620}))
        );
        assert_eq!(cache.path(), Some(path.as_path()));
    }

    #[test]
    fn test_timestamp_format_sorts_chronologically() {
        let earlier = format_ts(hours_ago(1));
        let later = format_ts(Utc::now());
        assert!(earlier < later);
        assert!(later.ends_with('Z'));

        let ts = hours_ago(5);
        assert_eq!(
            parse_ts(&format_ts(ts)).unwrap().timestamp_micros(),
            ts.timestamp_micros()
        );
    }
}
