//! Market Cache - Tiered caching and rate limiting for market data
//!
//! Caching and request-governance core for a real-estate market data
//! platform. Payloads from external sources (Census, BLS, BEA, EPA, OSM, ...)
//! are cached per `(source, market)` in two tiers and refreshed ahead of
//! demand, without exceeding each source's request quota.
//!
//! # Architecture
//!
//! ```text
//! Connector ──▶ RateLimiter ──▶ TieredCache (Memory LRU → SQLite) ──▶ Statistics
//!                    ▲                 ▲
//!                    └── CacheWarmer ──┘ (PrefetchScheduler)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Memory (LRU + TTL) and persistent (SQLite) tiers
//! - [`config`] - YAML configuration and TTL policies
//! - [`error`] - Error types
//! - [`ratelimit`] - Per-source sliding-window quotas
//! - [`stats`] - Hit/miss, latency and storage statistics
//! - [`warmer`] - Prefetch scheduling and cache warming

pub mod cache;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod stats;
pub mod warmer;

// Re-export commonly used types
pub use cache::{CacheKey, CacheTier, MemoryCache, PersistentCache, ReadMode, TieredCache};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use ratelimit::{RateLimitConfig, RateLimiter, UsageStats};
pub use stats::{CacheStatistics, StatsSummary};
pub use warmer::{CacheWarmer, Connector, ConnectorError, WarmerConfig, WarmingResult};
