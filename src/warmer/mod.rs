//! Cache Warming
//!
//! Proactive population of the tiered cache:
//!
//! - [`Connector`] - boundary to the external data sources
//! - [`MarketRegistry`] - known markets and great-circle proximity
//! - [`PrefetchScheduler`] - bounded, paced worker pool
//! - [`CacheWarmer`] - skip-if-cached, rate-limited fetch-and-store

mod connector;
mod engine;
mod market;
mod scheduler;

pub use connector::{connector_map, Connector, ConnectorError, ConnectorMap};
pub use engine::{
    CacheWarmer, ProgressCallback, WarmerConfig, WarmingError, WarmingProgress, WarmingResult,
};
pub use market::{haversine_miles, Market, MarketRegistry, EARTH_RADIUS_MILES};
pub use scheduler::{PrefetchScheduler, SchedulerReport, UnitOutcome};
