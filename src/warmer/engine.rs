//! Cache Warmer
//!
//! Populates both cache tiers ahead of user requests. One unit of work is a
//! `(market, source)` pair; each unit skips when already cached, otherwise
//! waits for a rate-limit permit, calls the source's connector and stores the
//! payload under the source's TTL policy. Failures are collected, never
//! raised.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::connector::{Connector, ConnectorMap};
use super::market::{Market, MarketRegistry};
use super::scheduler::{PrefetchScheduler, UnitOutcome};
use crate::cache::TieredCache;
use crate::error::Error;
use crate::ratelimit::RateLimiter;

// =============================================================================
// Configuration
// =============================================================================

/// Warmer and scheduler settings
#[derive(Debug, Clone)]
pub struct WarmerConfig {
    /// Units in flight at once
    pub max_parallel_requests: usize,
    /// Dispatch ceiling across all sources
    pub max_requests_per_second: f64,
    /// Patience for one rate-limit permit
    pub max_wait: Duration,
    pub nearby_radius_miles: f64,
    /// Keep dispatching after a unit fails
    pub continue_on_error: bool,
    /// Skip units already present in either tier
    pub skip_cached: bool,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: 5,
            max_requests_per_second: 10.0,
            max_wait: Duration::from_secs(30),
            nearby_radius_miles: 50.0,
            continue_on_error: true,
            skip_cached: true,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// One failed unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarmingError {
    pub source: String,
    pub market: String,
    pub message: String,
}

/// Running totals of a warming invocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmingProgress {
    pub markets: Vec<String>,
    /// Markets whose every unit has finished
    pub markets_processed: usize,
    /// Units attempted, including cache hits and failures
    pub total_requests: usize,
    pub cache_hits: usize,
    /// Units that fetched and stored a fresh payload
    pub fetched: usize,
    pub errors: Vec<WarmingError>,
    pub units_completed: usize,
    pub units_total: usize,
}

/// Final report of a warming invocation
#[derive(Debug, Clone, Serialize)]
pub struct WarmingResult {
    pub run_id: Uuid,
    pub markets: Vec<String>,
    pub markets_processed: usize,
    pub total_requests: usize,
    pub cache_hits: usize,
    pub fetched: usize,
    pub errors: Vec<WarmingError>,
    pub duration_seconds: f64,
    /// Dispatch halted after a failure with `continue_on_error` off
    pub stopped_early: bool,
}

impl WarmingResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.stopped_early
    }
}

/// Invoked after every completed unit with the aggregated snapshot
pub type ProgressCallback = Arc<dyn Fn(&WarmingProgress) + Send + Sync>;

#[derive(Debug)]
enum UnitStatus {
    CacheHit,
    Fetched,
    Failed(String),
}

#[derive(Debug, Clone)]
struct Unit {
    market: String,
    source: String,
}

#[derive(Debug)]
struct Completed {
    market: String,
    source: String,
    status: UnitStatus,
}

impl UnitOutcome for Completed {
    type Unit = Unit;

    fn is_failure(&self) -> bool {
        matches!(self.status, UnitStatus::Failed(_))
    }

    fn panicked(unit: Unit, message: String) -> Self {
        Completed {
            market: unit.market,
            source: unit.source,
            status: UnitStatus::Failed(format!("unit panicked: {}", message)),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

impl WarmingProgress {
    fn new(markets: Vec<String>, units_total: usize) -> Self {
        Self {
            markets,
            units_total,
            ..Default::default()
        }
    }

    fn apply(&mut self, unit: &Completed) {
        self.total_requests += 1;
        self.units_completed += 1;
        match &unit.status {
            UnitStatus::CacheHit => self.cache_hits += 1,
            UnitStatus::Fetched => self.fetched += 1,
            UnitStatus::Failed(message) => self.errors.push(WarmingError {
                source: unit.source.clone(),
                market: unit.market.clone(),
                message: message.clone(),
            }),
        }
    }
}

// =============================================================================
// Warmer
// =============================================================================

/// Drives cache warming over markets and sources
pub struct CacheWarmer {
    cache: Arc<TieredCache>,
    limiter: Arc<RateLimiter>,
    config: WarmerConfig,
    registry: MarketRegistry,
}

impl CacheWarmer {
    pub fn new(cache: Arc<TieredCache>, limiter: Arc<RateLimiter>, config: WarmerConfig) -> Self {
        Self {
            cache,
            limiter,
            config,
            registry: MarketRegistry::builtin(),
        }
    }

    /// Replace the market registry used for proximity warming
    pub fn with_registry(mut self, registry: MarketRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    /// Warm every source for one market, one source at a time
    #[instrument(skip(self, sources, connectors), fields(market = %market))]
    pub async fn warm_market<S: AsRef<str>>(
        &self,
        market: &str,
        sources: &[S],
        connectors: &ConnectorMap,
        skip_cached: bool,
    ) -> WarmingProgress {
        let market = normalize(market);
        let mut progress = WarmingProgress::new(vec![market.clone()], sources.len());

        for source in sources {
            let source = normalize(source.as_ref());
            let status = warm_unit(
                &self.cache,
                &self.limiter,
                connectors.get(&source).cloned(),
                &market,
                &source,
                skip_cached,
                self.config.max_wait,
            )
            .await;
            progress.apply(&Completed {
                market: market.clone(),
                source,
                status,
            });
        }

        progress.markets_processed = 1;
        info!(
            cache_hits = progress.cache_hits,
            fetched = progress.fetched,
            errors = progress.errors.len(),
            "Warmed market"
        );
        progress
    }

    /// Warm every `(market, source)` pair on the bounded scheduler
    #[instrument(skip_all, fields(markets = markets.len(), sources = sources.len()))]
    pub async fn warm_markets<M: AsRef<str>, S: AsRef<str>>(
        &self,
        markets: &[M],
        sources: &[S],
        connectors: &ConnectorMap,
        progress_callback: Option<ProgressCallback>,
    ) -> WarmingResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let mut market_names: Vec<String> = Vec::with_capacity(markets.len());
        for market in markets {
            let market = normalize(market.as_ref());
            if !market.is_empty() && !market_names.contains(&market) {
                market_names.push(market);
            }
        }
        let mut source_names: Vec<String> = Vec::with_capacity(sources.len());
        for source in sources {
            let source = normalize(source.as_ref());
            if !source.is_empty() && !source_names.contains(&source) {
                source_names.push(source);
            }
        }

        let units: Vec<Unit> = market_names
            .iter()
            .flat_map(|market| {
                source_names.iter().map(move |source| Unit {
                    market: market.clone(),
                    source: source.clone(),
                })
            })
            .collect();

        info!(%run_id, units = units.len(), "Starting cache warming run");

        let mut progress = WarmingProgress::new(market_names.clone(), units.len());
        let mut remaining_per_market: HashMap<String, usize> = market_names
            .iter()
            .map(|m| (m.clone(), source_names.len()))
            .collect();

        let scheduler = match PrefetchScheduler::new(
            self.config.max_parallel_requests,
            self.config.max_requests_per_second,
            self.config.continue_on_error,
        ) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                warn!(%run_id, "Invalid warming settings: {}", e);
                return WarmingResult {
                    run_id,
                    markets: market_names,
                    markets_processed: 0,
                    total_requests: 0,
                    cache_hits: 0,
                    fetched: 0,
                    errors: vec![WarmingError {
                        source: String::new(),
                        market: String::new(),
                        message: e.to_string(),
                    }],
                    duration_seconds: started.elapsed().as_secs_f64(),
                    stopped_early: true,
                };
            }
        };

        let cache = Arc::clone(&self.cache);
        let limiter = Arc::clone(&self.limiter);
        let connectors = Arc::new(connectors.clone());
        let skip_cached = self.config.skip_cached;
        let max_wait = self.config.max_wait;

        let report = scheduler
            .run(
                units,
                move |unit: Unit| {
                    let cache = Arc::clone(&cache);
                    let limiter = Arc::clone(&limiter);
                    let connector = connectors.get(&unit.source).cloned();
                    async move {
                        let status = warm_unit(
                            &cache,
                            &limiter,
                            connector,
                            &unit.market,
                            &unit.source,
                            skip_cached,
                            max_wait,
                        )
                        .await;
                        Completed {
                            market: unit.market,
                            source: unit.source,
                            status,
                        }
                    }
                },
                |completed: &Completed| {
                    progress.apply(completed);
                    if let Some(remaining) = remaining_per_market.get_mut(&completed.market) {
                        *remaining -= 1;
                        if *remaining == 0 {
                            progress.markets_processed += 1;
                        }
                    }
                    if let Some(callback) = &progress_callback {
                        callback(&progress);
                    }
                },
            )
            .await;

        let result = WarmingResult {
            run_id,
            markets: progress.markets,
            markets_processed: progress.markets_processed,
            total_requests: progress.total_requests,
            cache_hits: progress.cache_hits,
            fetched: progress.fetched,
            errors: progress.errors,
            duration_seconds: started.elapsed().as_secs_f64(),
            stopped_early: report.stopped_early,
        };

        info!(
            %run_id,
            markets_processed = result.markets_processed,
            total_requests = result.total_requests,
            cache_hits = result.cache_hits,
            errors = result.errors.len(),
            skipped = report.skipped,
            duration_seconds = result.duration_seconds,
            "Cache warming run finished"
        );
        result
    }

    /// Warm `market` plus every candidate within the configured radius
    ///
    /// Candidates default to the built-in registry. An unknown primary
    /// market is warmed on its own.
    #[instrument(skip(self, sources, connectors, candidates), fields(market = %market))]
    pub async fn warm_market_with_proximity<S: AsRef<str>>(
        &self,
        market: &str,
        sources: &[S],
        connectors: &ConnectorMap,
        candidates: Option<&[Market]>,
    ) -> WarmingResult {
        let markets = self.proximity_markets(market, candidates);
        debug!(?markets, "Resolved proximity markets");
        self.warm_markets(&markets, sources, connectors, None).await
    }

    /// Primary market followed by its neighbours, nearest first
    pub fn proximity_markets(&self, market: &str, candidates: Option<&[Market]>) -> Vec<String> {
        let registry = match candidates {
            Some(candidates) => MarketRegistry::new(candidates.to_vec()),
            None => self.registry.clone(),
        };

        let Some(primary) = registry.find(market) else {
            warn!(market, "Unknown market, warming it without neighbours");
            return vec![market.trim().to_string()];
        };

        std::iter::once(primary.name.clone())
            .chain(
                registry
                    .within(primary, self.config.nearby_radius_miles)
                    .into_iter()
                    .map(|(m, _)| m.name),
            )
            .collect()
    }
}

/// Warm a single `(market, source)` pair
async fn warm_unit(
    cache: &TieredCache,
    limiter: &RateLimiter,
    connector: Option<Arc<dyn Connector>>,
    market: &str,
    source: &str,
    skip_cached: bool,
    max_wait: Duration,
) -> UnitStatus {
    if skip_cached {
        match cache.contains(source, market) {
            Ok(true) => {
                debug!(source, market, "Already cached");
                return UnitStatus::CacheHit;
            }
            Ok(false) => {}
            Err(e) => warn!(source, market, "Cache check failed, fetching: {}", e),
        }
    }

    let Some(connector) = connector else {
        return UnitStatus::Failed(format!("no connector registered for source '{}'", source));
    };

    if let Err(e) = limiter.wait_if_needed(source, max_wait).await {
        warn!(source, market, "{}", e);
        return UnitStatus::Failed(e.to_string());
    }

    let value = match connector.fetch(market).await {
        Ok(value) => value,
        Err(e) => {
            let err = Error::Connector {
                source_name: source.to_string(),
                market: market.to_string(),
                message: e.to_string(),
            };
            warn!("{}", err);
            return UnitStatus::Failed(err.to_string());
        }
    };

    match cache.set(source, market, value) {
        Ok(()) => {
            debug!(source, market, "Warmed");
            UnitStatus::Fetched
        }
        Err(e) => {
            warn!(source, market, "Failed to store warmed value: {}", e);
            UnitStatus::Failed(e.to_string())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
