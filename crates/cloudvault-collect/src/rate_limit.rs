//! Per-service rate limiting for the remote API
//!
//! Provides proactive request pacing so concurrent fetch tasks across all
//! streaming collections stay inside the provider's throttling profile.
//!
//! ## Architecture
//!
//! - [`ServiceLimiter`]: window-based limiter for a single remote service,
//!   supporting both fixed-window and sliding-window strategies
//! - [`RateLimiterRegistry`]: one limiter per service, shared process-wide
//!   but threaded explicitly through constructors (never a hidden global)
//!
//! Grants are recorded as timestamps regardless of strategy, so a dynamic
//! strategy swap via [`ServiceLimiter::reconfigure`] keeps every in-flight
//! permit intact.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cloudvault_collect::rate_limit::RateLimiterRegistry;
//! use cloudvault_core::config::RateLimitingConfig;
//! use cloudvault_core::ports::ServiceKind;
//!
//! # async fn example() {
//! let registry = RateLimiterRegistry::new(RateLimitingConfig::default());
//! let limiter = registry.for_service(ServiceKind::Drive);
//! limiter.acquire().await;
//! // ... make API call ...
//! # }
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{debug, info};

use cloudvault_core::config::{LimiterStrategyKind, RateLimitingConfig};
use cloudvault_core::ports::ServiceKind;

// ============================================================================
// LimiterConfig
// ============================================================================

/// Effective parameters of one service's limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    pub strategy: LimiterStrategyKind,
    /// Maximum grants per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl LimiterConfig {
    /// Derives the limiter parameters for `service` from the run config.
    pub fn for_service(cfg: &RateLimitingConfig, service: ServiceKind) -> Self {
        let limit = match service {
            ServiceKind::Mail => cfg.mail_requests_per_window,
            ServiceKind::Drive => cfg.drive_requests_per_window,
            ServiceKind::Site => cfg.site_requests_per_window,
            ServiceKind::Groups => cfg.groups_requests_per_window,
        };
        Self {
            strategy: cfg.strategy,
            limit,
            window: Duration::from_secs(cfg.window_secs),
        }
    }
}

// ============================================================================
// ServiceLimiter
// ============================================================================

/// Internal mutable state, protected by a Mutex.
///
/// Grant timestamps are kept for both strategies; the strategy only
/// changes how they are pruned and when the next slot opens.
#[derive(Debug)]
struct LimiterState {
    grants: VecDeque<Instant>,
    /// Anchor for fixed-window boundary computation
    epoch: Instant,
}

/// Window-based rate limiter for a single remote service.
///
/// Thread safety is provided by internal Mutexes; the limiter is designed
/// to be shared via `Arc<ServiceLimiter>` across all fetch tasks of all
/// collections streaming against the same service.
#[derive(Debug)]
pub struct ServiceLimiter {
    config: Mutex<LimiterConfig>,
    state: Mutex<LimiterState>,
}

impl ServiceLimiter {
    /// Creates a limiter with the given parameters.
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config: Mutex::new(config),
            state: Mutex::new(LimiterState {
                grants: VecDeque::new(),
                epoch: Instant::now(),
            }),
        }
    }

    /// Returns the current effective configuration.
    pub fn config(&self) -> LimiterConfig {
        *self.config.lock().unwrap()
    }

    /// Swaps the limiting strategy/parameters.
    ///
    /// Recorded grants survive the swap, so requests already paced within
    /// the old window still count against the new one.
    pub fn reconfigure(&self, config: LimiterConfig) {
        let old = {
            let mut cfg = self.config.lock().unwrap();
            let old = *cfg;
            *cfg = config;
            old
        };
        info!(
            old_strategy = ?old.strategy,
            new_strategy = ?config.strategy,
            limit = config.limit,
            window_ms = config.window.as_millis() as u64,
            "rate limiter reconfigured"
        );
    }

    /// Start of the fixed window containing `now`.
    fn fixed_window_start(epoch: Instant, now: Instant, window: Duration) -> Instant {
        let elapsed = now.duration_since(epoch);
        let windows = elapsed.as_nanos() / window.as_nanos().max(1);
        epoch + Duration::from_nanos((windows * window.as_nanos()) as u64)
    }

    /// Drops grants that no longer count against the current window.
    fn prune(state: &mut LimiterState, config: &LimiterConfig, now: Instant) {
        let cutoff = match config.strategy {
            LimiterStrategyKind::SlidingWindow => now.checked_sub(config.window),
            LimiterStrategyKind::FixedWindow => {
                Some(Self::fixed_window_start(state.epoch, now, config.window))
            }
        };
        if let Some(cutoff) = cutoff {
            while state.grants.front().is_some_and(|g| *g < cutoff) {
                state.grants.pop_front();
            }
        }
    }

    /// Attempts to take one grant without waiting.
    pub fn try_acquire(&self) -> bool {
        let config = *self.config.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        Self::prune(&mut state, &config, now);

        if (state.grants.len() as u32) < config.limit {
            state.grants.push_back(now);
            true
        } else {
            false
        }
    }

    /// Returns how long until a grant becomes available.
    ///
    /// Zero when a slot is open now.
    pub fn time_until_available(&self) -> Duration {
        let config = *self.config.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        Self::prune(&mut state, &config, now);

        if (state.grants.len() as u32) < config.limit {
            return Duration::ZERO;
        }

        match config.strategy {
            LimiterStrategyKind::SlidingWindow => state
                .grants
                .front()
                .map(|oldest| (*oldest + config.window).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO),
            LimiterStrategyKind::FixedWindow => {
                let start = Self::fixed_window_start(state.epoch, now, config.window);
                (start + config.window).saturating_duration_since(now)
            }
        }
    }

    /// Acquires a grant, sleeping until one is available.
    ///
    /// This method is async and yields to the tokio runtime while waiting.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self.time_until_available().max(Duration::from_millis(10));
            debug!(wait_ms = wait.as_millis() as u64, "rate limit window full, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Current number of grants counted against the window.
    pub fn in_window(&self) -> usize {
        let config = *self.config.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        Self::prune(&mut state, &config, Instant::now());
        state.grants.len()
    }
}

// ============================================================================
// RateLimiterRegistry
// ============================================================================

/// One [`ServiceLimiter`] per remote service.
///
/// Created once per process from the run configuration and threaded through
/// the producer into every collection, so limiting stays testable and
/// swappable.
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<ServiceKind, Arc<ServiceLimiter>>>,
    config: RateLimitingConfig,
}

impl std::fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("config", &self.config)
            .finish()
    }
}

impl RateLimiterRegistry {
    /// Creates a registry from the run's rate-limiting configuration.
    pub fn new(config: RateLimitingConfig) -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Returns the limiter for `service`, creating it on first use.
    pub fn for_service(&self, service: ServiceKind) -> Arc<ServiceLimiter> {
        let mut limiters = self.limiters.lock().unwrap();
        Arc::clone(limiters.entry(service).or_insert_with(|| {
            let cfg = LimiterConfig::for_service(&self.config, service);
            debug!(%service, limit = cfg.limit, "creating service limiter");
            Arc::new(ServiceLimiter::new(cfg))
        }))
    }

    /// Swaps the strategy/parameters of one service's limiter.
    pub fn reconfigure(&self, service: ServiceKind, config: LimiterConfig) {
        self.for_service(service).reconfigure(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sliding(limit: u32, window: Duration) -> LimiterConfig {
        LimiterConfig {
            strategy: LimiterStrategyKind::SlidingWindow,
            limit,
            window,
        }
    }

    fn fixed(limit: u32, window: Duration) -> LimiterConfig {
        LimiterConfig {
            strategy: LimiterStrategyKind::FixedWindow,
            limit,
            window,
        }
    }

    // ====================================================================
    // Acquisition tests
    // ====================================================================

    #[test]
    fn test_try_acquire_up_to_limit() {
        let limiter = ServiceLimiter::new(sliding(3, Duration::from_secs(60)));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.in_window(), 3);
    }

    #[test]
    fn test_sliding_window_frees_after_window() {
        let limiter = ServiceLimiter::new(sliding(1, Duration::from_millis(20)));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_fixed_window_frees_at_boundary() {
        let limiter = ServiceLimiter::new(fixed(2, Duration::from_millis(30)));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // Next fixed window must open a fresh budget
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_time_until_available_zero_with_open_slot() {
        let limiter = ServiceLimiter::new(sliding(5, Duration::from_secs(60)));
        assert_eq!(limiter.time_until_available(), Duration::ZERO);
    }

    #[test]
    fn test_time_until_available_positive_when_full() {
        let limiter = ServiceLimiter::new(sliding(1, Duration::from_secs(60)));
        limiter.try_acquire();

        let wait = limiter.time_until_available();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = ServiceLimiter::new(sliding(1, Duration::from_millis(30)));
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(10),
            "second acquire should have waited, took {elapsed:?}"
        );
    }

    // ====================================================================
    // Reconfiguration tests
    // ====================================================================

    #[test]
    fn test_reconfigure_keeps_in_flight_grants() {
        let limiter = ServiceLimiter::new(sliding(3, Duration::from_secs(60)));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        // Switch strategy; the two grants must still count
        limiter.reconfigure(fixed(3, Duration::from_secs(60)));
        assert_eq!(limiter.in_window(), 2);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_reconfigure_to_lower_limit_blocks() {
        let limiter = ServiceLimiter::new(sliding(5, Duration::from_secs(60)));
        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }

        limiter.reconfigure(sliding(2, Duration::from_secs(60)));
        // Already over the new limit
        assert!(!limiter.try_acquire());
    }

    // ====================================================================
    // Concurrent access tests
    // ====================================================================

    #[test]
    fn test_concurrent_try_acquire_no_overallocation() {
        let limiter = Arc::new(ServiceLimiter::new(sliding(10, Duration::from_secs(60))));
        let mut handles = Vec::new();

        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                if limiter.try_acquire() {
                    1u32
                } else {
                    0u32
                }
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 10, "exactly the window budget must be granted");
    }

    #[tokio::test]
    async fn test_concurrent_acquire_all_complete() {
        let limiter = Arc::new(ServiceLimiter::new(sliding(50, Duration::from_millis(50))));
        let mut handles = Vec::new();

        for i in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                i
            }));
        }

        let mut done = 0;
        for handle in handles {
            handle.await.unwrap();
            done += 1;
        }
        assert_eq!(done, 20);
    }

    // ====================================================================
    // Registry tests
    // ====================================================================

    #[test]
    fn test_registry_returns_same_limiter_per_service() {
        let registry = RateLimiterRegistry::new(RateLimitingConfig::default());
        let a = registry.for_service(ServiceKind::Drive);
        let b = registry.for_service(ServiceKind::Drive);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_registry_services_independent() {
        let registry = RateLimiterRegistry::new(RateLimitingConfig {
            strategy: LimiterStrategyKind::SlidingWindow,
            window_secs: 60,
            mail_requests_per_window: 1,
            drive_requests_per_window: 2,
            site_requests_per_window: 1,
            groups_requests_per_window: 1,
        });

        let mail = registry.for_service(ServiceKind::Mail);
        let drive = registry.for_service(ServiceKind::Drive);

        assert!(mail.try_acquire());
        assert!(!mail.try_acquire());

        // Drive budget unaffected by mail exhaustion
        assert!(drive.try_acquire());
        assert!(drive.try_acquire());
        assert!(!drive.try_acquire());
    }

    #[test]
    fn test_registry_reconfigure() {
        let registry = RateLimiterRegistry::new(RateLimitingConfig::default());
        registry.reconfigure(
            ServiceKind::Site,
            fixed(1, Duration::from_secs(60)),
        );
        let limiter = registry.for_service(ServiceKind::Site);
        assert_eq!(limiter.config().strategy, LimiterStrategyKind::FixedWindow);
        assert_eq!(limiter.config().limit, 1);
    }

    #[test]
    fn test_limiter_config_per_service_mapping() {
        let cfg = RateLimitingConfig::default();
        let mail = LimiterConfig::for_service(&cfg, ServiceKind::Mail);
        let drive = LimiterConfig::for_service(&cfg, ServiceKind::Drive);
        assert_eq!(mail.limit, cfg.mail_requests_per_window);
        assert_eq!(drive.limit, cfg.drive_requests_per_window);
        assert_eq!(mail.window, Duration::from_secs(cfg.window_secs));
    }
}
