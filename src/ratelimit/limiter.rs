//! Sliding-window rate limiter
//!
//! Each registered source keeps the instants of its recent requests in a
//! queue. A request is permitted while fewer than `max_requests` instants
//! fall inside the trailing window. Pruning happens lazily on every access
//! to that source and on an explicit [`RateLimiter::cleanup`] sweep.
//!
//! Blocking waits queue FIFO per source on a fair async gate; the request
//! log itself sits behind a short-held synchronous lock so non-blocking
//! checks never wait on a sleeping caller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Quota for one source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Requests permitted per window
    pub max_requests: u32,
    /// Trailing window length
    pub window: Duration,
    /// Usage fraction (0, 1] at which a warning is logged
    pub warn_threshold: f64,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration, warn_threshold: f64) -> Result<Self> {
        if max_requests == 0 {
            return Err(Error::Config("max_requests must be greater than 0".into()));
        }
        if window.is_zero() {
            return Err(Error::Config("rate limit window must be greater than 0".into()));
        }
        if !(warn_threshold > 0.0 && warn_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "warn_threshold must be within (0, 1], got {}",
                warn_threshold
            )));
        }
        Ok(Self {
            max_requests,
            window,
            warn_threshold,
        })
    }
}

/// Usage snapshot for one source
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    /// Requests inside the current window
    pub current: u32,
    pub max: u32,
    /// current / max * 100
    pub usage_pct: f64,
    pub remaining: u32,
    /// Until the oldest request leaves the window; zero when the log is empty
    pub time_until_reset: Duration,
    pub window: Duration,
    /// Threshold warnings raised so far
    pub warnings: u64,
    /// Requests made under this name before it was registered
    pub unregistered_requests: u64,
}

// =============================================================================
// Per-source state
// =============================================================================

#[derive(Debug)]
struct Window {
    config: RateLimitConfig,
    log: VecDeque<Instant>,
    warnings: u64,
}

impl Window {
    /// Drop instants that fell out of the window, returning how many
    fn prune(&mut self, now: Instant) -> usize {
        let before = self.log.len();
        while let Some(&oldest) = self.log.front() {
            if oldest + self.config.window <= now {
                self.log.pop_front();
            } else {
                break;
            }
        }
        before - self.log.len()
    }

    fn has_capacity(&self) -> bool {
        self.log.len() < self.config.max_requests as usize
    }

    /// Time until the oldest logged request expires
    fn time_until_slot(&self, now: Instant) -> Duration {
        self.log
            .front()
            .map(|oldest| (*oldest + self.config.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    fn usage(&self) -> f64 {
        self.log.len() as f64 / self.config.max_requests as f64
    }

    fn record(&mut self, api: &str, now: Instant) {
        self.log.push_back(now);

        let usage = self.usage();
        if usage > 1.0 {
            self.warnings += 1;
            warn!(
                api,
                current = self.log.len(),
                max = self.config.max_requests,
                "Request recorded over rate limit"
            );
        } else if usage >= self.config.warn_threshold {
            self.warnings += 1;
            warn!(
                api,
                usage_pct = usage * 100.0,
                current = self.log.len(),
                max = self.config.max_requests,
                "Approaching rate limit"
            );
        }
    }
}

#[derive(Debug)]
struct SourceState {
    window: Mutex<Window>,
    /// FIFO queue for blocking waiters
    gate: tokio::sync::Mutex<()>,
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Source-keyed sliding-window limiter shared across the application
#[derive(Debug, Default)]
pub struct RateLimiter {
    sources: DashMap<String, Arc<SourceState>>,
    unregistered: DashMap<String, u64>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-configure) a source
    ///
    /// Re-registering replaces the quota and keeps the request log.
    pub fn add_api(
        &self,
        name: &str,
        max_requests: u32,
        window: Duration,
        warn_threshold: f64,
    ) -> Result<()> {
        let config = RateLimitConfig::new(max_requests, window, warn_threshold)?;

        match self.sources.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().window.lock().config = config;
                debug!(api = name, max_requests, ?window, "Updated rate limit");
                return Ok(());
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(SourceState {
                    window: Mutex::new(Window {
                        config,
                        log: VecDeque::new(),
                        warnings: 0,
                    }),
                    gate: tokio::sync::Mutex::new(()),
                }));
            }
        }
        debug!(api = name, max_requests, ?window, "Registered rate limit");
        Ok(())
    }

    fn state(&self, name: &str) -> Option<Arc<SourceState>> {
        self.sources.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn note_unregistered(&self, name: &str) {
        *self.unregistered.entry(name.to_string()).or_insert(0) += 1;
        warn!(api = name, "Request for unregistered rate limit source");
    }

    /// True if a request could be made now. Prunes, never records.
    ///
    /// Unregistered sources are always allowed. The check is logged but not
    /// counted in `unregistered_requests`, which tracks requests actually
    /// made through `try_acquire`, `record_request` or `wait_if_needed`.
    pub fn can_proceed(&self, name: &str) -> bool {
        let Some(state) = self.state(name) else {
            debug!(api = name, "Unregistered rate limit source is unlimited");
            return true;
        };
        let mut window = state.window.lock();
        window.prune(Instant::now());
        window.has_capacity()
    }

    /// Check and record in one step; false if the quota is used up
    pub fn try_acquire(&self, name: &str) -> bool {
        let Some(state) = self.state(name) else {
            self.note_unregistered(name);
            return true;
        };

        let now = Instant::now();
        let mut window = state.window.lock();
        window.prune(now);
        if !window.has_capacity() {
            return false;
        }
        window.record(name, now);
        true
    }

    /// Record a request that has already been made
    pub fn record_request(&self, name: &str) {
        let Some(state) = self.state(name) else {
            self.note_unregistered(name);
            return;
        };

        let now = Instant::now();
        let mut window = state.window.lock();
        window.prune(now);
        window.record(name, now);
    }

    /// Wait until a request is permitted, then record it
    ///
    /// Returns how long the caller was held. Fails with
    /// [`Error::RateLimitTimeout`], without sleeping, as soon as the
    /// required wait would exceed what is left of `max_wait`.
    #[instrument(skip(self), level = "debug")]
    pub async fn wait_if_needed(&self, name: &str, max_wait: Duration) -> Result<Duration> {
        let Some(state) = self.state(name) else {
            self.note_unregistered(name);
            return Ok(Duration::ZERO);
        };

        let start = Instant::now();
        let (_turn, mut waited) = match state.gate.try_lock() {
            Ok(guard) => (guard, Duration::ZERO),
            Err(_) => match timeout(max_wait, state.gate.lock()).await {
                Ok(guard) => (guard, start.elapsed()),
                Err(_) => {
                    return Err(Error::RateLimitTimeout {
                        api: name.to_string(),
                        required: start.elapsed(),
                        max_wait,
                    })
                }
            },
        };

        loop {
            let now = Instant::now();
            let required = {
                let mut window = state.window.lock();
                window.prune(now);
                if window.has_capacity() {
                    window.record(name, now);
                    if !waited.is_zero() {
                        debug!(api = name, ?waited, "Rate limit wait complete");
                    }
                    return Ok(waited);
                }
                window.time_until_slot(now)
            };

            let remaining = max_wait.saturating_sub(waited);
            if required > remaining {
                warn!(api = name, ?required, ?max_wait, "Rate limit wait exceeds budget");
                return Err(Error::RateLimitTimeout {
                    api: name.to_string(),
                    required: waited + required,
                    max_wait,
                });
            }

            debug!(api = name, ?required, "Waiting for rate limit slot");
            sleep(required).await;
            waited = start.elapsed();
        }
    }

    /// Usage snapshot; `None` for unregistered sources
    pub fn get_usage_stats(&self, name: &str) -> Option<UsageStats> {
        let state = self.state(name)?;
        let now = Instant::now();
        let mut window = state.window.lock();
        window.prune(now);

        let current = window.log.len() as u32;
        let max = window.config.max_requests;
        Some(UsageStats {
            current,
            max,
            usage_pct: current as f64 * 100.0 / max as f64,
            remaining: max.saturating_sub(current),
            time_until_reset: window.time_until_slot(now),
            window: window.config.window,
            warnings: window.warnings,
            unregistered_requests: self.unregistered.get(name).map(|c| *c).unwrap_or(0),
        })
    }

    /// Clear the log of one source, or of every source (and the unregistered
    /// tallies) when `name` is `None`
    pub fn reset(&self, name: Option<&str>) {
        match name {
            Some(name) => {
                if let Some(state) = self.state(name) {
                    let mut window = state.window.lock();
                    window.log.clear();
                    window.warnings = 0;
                }
                self.unregistered.remove(name);
            }
            None => {
                for entry in self.sources.iter() {
                    let mut window = entry.value().window.lock();
                    window.log.clear();
                    window.warnings = 0;
                }
                self.unregistered.clear();
            }
        }
    }

    /// Prune every source's log, returning the number of instants dropped
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let removed: usize = self
            .sources
            .iter()
            .map(|entry| entry.value().window.lock().prune(now))
            .sum();
        if removed > 0 {
            debug!(removed, "Pruned rate limit logs");
        }
        removed
    }

    /// Registered source names, sorted
    pub fn registered_apis(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Current quota for a source
    pub fn config(&self, name: &str) -> Option<RateLimitConfig> {
        self.state(name).map(|state| state.window.lock().config)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const MINUTE: Duration = Duration::from_secs(60);

    fn limiter(max: u32, window: Duration) -> RateLimiter {
        let limiter = RateLimiter::new();
        limiter.add_api("census", max, window, 0.8).unwrap();
        limiter
    }

    #[test]
    fn test_invalid_config_rejected() {
        let limiter = RateLimiter::new();
        assert_matches!(limiter.add_api("a", 0, MINUTE, 0.8), Err(Error::Config(_)));
        assert_matches!(limiter.add_api("a", 5, Duration::ZERO, 0.8), Err(Error::Config(_)));
        assert_matches!(limiter.add_api("a", 5, MINUTE, 0.0), Err(Error::Config(_)));
        assert_matches!(limiter.add_api("a", 5, MINUTE, 1.5), Err(Error::Config(_)));
        assert!(limiter.add_api("a", 5, MINUTE, 1.0).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_within_window() {
        let limiter = limiter(3, MINUTE);

        for _ in 0..3 {
            assert!(limiter.can_proceed("census"));
            limiter.record_request("census");
        }
        assert!(!limiter.can_proceed("census"));
        assert!(!limiter.try_acquire("census"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!limiter.can_proceed("census"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.can_proceed("census"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = limiter(2, Duration::from_secs(10));

        assert!(limiter.try_acquire("census"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(limiter.try_acquire("census"));
        assert!(!limiter.try_acquire("census"));

        // First request leaves the window at t=10, second at t=16
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.try_acquire("census"));
        assert!(!limiter.try_acquire("census"));

        let usage = limiter.get_usage_stats("census").unwrap();
        assert_eq!(usage.current, 2);
        assert_eq!(usage.time_until_reset, Duration::from_secs(6));
    }

    #[test]
    fn test_can_proceed_never_records() {
        let limiter = limiter(1, MINUTE);
        for _ in 0..10 {
            assert!(limiter.can_proceed("census"));
        }
        assert_eq!(limiter.get_usage_stats("census").unwrap().current, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_if_needed_under_quota_returns_zero() {
        let limiter = limiter(2, MINUTE);
        let waited = limiter.wait_if_needed("census", MINUTE).await.unwrap();
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(limiter.get_usage_stats("census").unwrap().current, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_if_needed_sleeps_until_slot() {
        let limiter = limiter(1, Duration::from_secs(10));
        limiter.record_request("census");

        tokio::time::advance(Duration::from_secs(3)).await;
        let start = Instant::now();
        let waited = limiter
            .wait_if_needed("census", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(waited, Duration::from_secs(7));
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_if_needed_times_out_without_sleeping() {
        let limiter = limiter(1, Duration::from_secs(10));
        limiter.record_request("census");

        let start = Instant::now();
        let err = limiter
            .wait_if_needed("census", Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_matches!(
            err,
            Error::RateLimitTimeout { ref api, required, max_wait }
                if api == "census"
                    && required == Duration::from_secs(10)
                    && max_wait == Duration::from_secs(5)
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.get_usage_stats("census").unwrap().current, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_are_served_in_order() {
        let limiter = Arc::new(limiter(1, Duration::from_secs(10)));
        limiter.record_request("census");

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter
                    .wait_if_needed("census", Duration::from_secs(60))
                    .await
                    .unwrap();
                order.lock().push(i);
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_respect_quota() {
        let window = Duration::from_secs(1);
        let limiter = Arc::new(limiter(2, window));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let stamps = Arc::clone(&stamps);
            handles.push(tokio::spawn(async move {
                limiter
                    .wait_if_needed("census", Duration::from_secs(30))
                    .await
                    .unwrap();
                stamps.lock().push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut stamps = stamps.lock().clone();
        stamps.sort();
        assert_eq!(stamps.len(), 8);
        for pair in stamps.windows(3) {
            assert!(pair[2] - pair[0] >= window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_is_permissive() {
        let limiter = RateLimiter::new();
        assert!(limiter.can_proceed("zillow"));
        assert_eq!(
            limiter.wait_if_needed("zillow", Duration::ZERO).await.unwrap(),
            Duration::ZERO
        );
        assert!(limiter.try_acquire("zillow"));
        assert!(limiter.get_usage_stats("zillow").is_none());

        limiter.add_api("zillow", 5, MINUTE, 0.8).unwrap();
        assert_eq!(limiter.get_usage_stats("zillow").unwrap().unregistered_requests, 2);
    }

    #[test]
    fn test_can_proceed_does_not_count_unregistered() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.can_proceed("redfin"));
        }
        limiter.record_request("redfin");

        limiter.add_api("redfin", 5, MINUTE, 0.8).unwrap();
        let usage = limiter.get_usage_stats("redfin").unwrap();
        assert_eq!(usage.unregistered_requests, 1);
        assert_eq!(usage.current, 0);
    }

    #[test]
    fn test_warning_threshold_counts() {
        let limiter = RateLimiter::new();
        limiter.add_api("bls", 10, MINUTE, 0.8).unwrap();

        for _ in 0..7 {
            limiter.record_request("bls");
        }
        assert_eq!(limiter.get_usage_stats("bls").unwrap().warnings, 0);

        limiter.record_request("bls");
        limiter.record_request("bls");
        let usage = limiter.get_usage_stats("bls").unwrap();
        assert_eq!(usage.warnings, 2);
        assert_eq!(usage.usage_pct, 90.0);
        assert_eq!(usage.remaining, 1);
    }

    #[test]
    fn test_reregister_keeps_log() {
        let limiter = limiter(5, MINUTE);
        limiter.record_request("census");
        limiter.record_request("census");

        limiter.add_api("census", 2, MINUTE, 0.9).unwrap();
        assert!(!limiter.can_proceed("census"));
        assert_eq!(limiter.config("census").unwrap().max_requests, 2);
    }

    #[test]
    fn test_reset() {
        let limiter = limiter(1, MINUTE);
        limiter.add_api("bea", 1, MINUTE, 1.0).unwrap();
        limiter.record_request("census");
        limiter.record_request("bea");

        limiter.reset(Some("census"));
        assert!(limiter.can_proceed("census"));
        assert!(!limiter.can_proceed("bea"));

        limiter.reset(None);
        assert!(limiter.can_proceed("bea"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_prunes_all_sources() {
        let limiter = limiter(5, Duration::from_secs(10));
        limiter.add_api("osm", 5, Duration::from_secs(30), 0.8).unwrap();
        limiter.record_request("census");
        limiter.record_request("census");
        limiter.record_request("osm");

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(limiter.cleanup(), 2);
        assert_eq!(limiter.cleanup(), 0);
        assert_eq!(limiter.registered_apis(), vec!["census", "osm"]);
    }
}
