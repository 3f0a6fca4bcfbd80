//! Rate Limiting
//!
//! Per-source sliding-window quotas shared by every outbound connector.
//! Constructed once by the application and passed around as
//! `Arc<RateLimiter>`.

mod limiter;

pub use limiter::{RateLimitConfig, RateLimiter, UsageStats};
