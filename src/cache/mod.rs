//! Two-Tier Cache
//!
//! Hot in-process LRU in front of a durable SQLite store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TieredCache                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  MemoryCache (RAM)            │  PersistentCache (SQLite)     │
//! │  ┌─────────────────────────┐  │  ┌────────────────────────┐   │
//! │  │ LruCache + byte budget  │  │  │ cache(key, value BLOB, │   │
//! │  │ per-entry TTL           │  │  │  created_at,expires_at)│   │
//! │  └─────────────────────────┘  │  └────────────────────────┘   │
//! │              ▲                │              │                │
//! │              └──── promote on persistent hit ┘                │
//! │                                                               │
//! │                 CacheStatistics (hits, latency)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are `"{source}:{subject}"`, e.g. `census:boulder`.

mod codec;
mod entry;
mod manager;
mod memory;
mod persistent;
pub mod compression;

pub use codec::{CompressedCodec, JsonCodec, ValueCodec};
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
pub use entry::{CacheEntry, CacheKey, ReadMode};
pub use manager::{CacheLookup, CacheTier, TieredCache};
pub use memory::{MemoryCache, MemoryStats};
pub use persistent::{PersistentCache, PersistentStats, StoredEntry};
