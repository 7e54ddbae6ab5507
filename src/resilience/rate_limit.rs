//! Per-dependency rate limiting.
//!
//! # Responsibilities
//! - Grant at most `limit_for_period` permits per refresh period, per dependency
//! - Let a caller wait for the next refresh, but never past its acquire timeout
//!
//! # Design Decisions
//! - Fixed windows aligned to the first acquisition, refilled lazily on access
//! - A caller that has to wait reserves its permit in a future window before
//!   sleeping, so waiters are served in reservation order and never exceed the limit
//! - If the wait would exceed the timeout the caller is rejected immediately
//! - Rejection is not an error here; the pipeline turns it into `RateLimited`

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{ConfigHandle, RateLimitConfig};
use crate::observability::metrics;

/// Permit accounting for one dependency.
///
/// `available` goes negative while callers hold reservations in future windows.
#[derive(Debug)]
struct PermitWindow {
    window_start: Instant,
    available: i64,
}

impl PermitWindow {
    fn new(now: Instant, limit: i64) -> Self {
        Self {
            window_start: now,
            available: limit,
        }
    }

    fn refresh(&mut self, now: Instant, limit: i64, period: Duration) {
        if period.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < period {
            return;
        }
        let period_nanos = period.as_nanos();
        let cycles = elapsed.as_nanos() / period_nanos;
        let into_window = elapsed.as_nanos() % period_nanos;

        self.window_start = now - Duration::from_nanos(into_window as u64);
        let refill = limit.saturating_mul(i64::try_from(cycles).unwrap_or(i64::MAX));
        self.available = self.available.saturating_add(refill).min(limit);
    }

    /// Reserve one permit. Returns how long the caller must wait for it, or
    /// `None` if that wait would exceed `timeout`.
    fn reserve(
        &mut self,
        now: Instant,
        limit: i64,
        period: Duration,
        timeout: Duration,
    ) -> Option<Duration> {
        if limit <= 0 {
            return None;
        }
        // A zero refresh period never closes a window: no limit applies.
        if period.is_zero() {
            return Some(Duration::ZERO);
        }
        self.refresh(now, limit, period);

        if self.available > 0 {
            self.available -= 1;
            return Some(Duration::ZERO);
        }

        // Position of this caller among the permits of future windows.
        let position = self.available.unsigned_abs() + 1;
        let windows_ahead = position.div_ceil(limit as u64);
        let ready_at = self.window_start + period.saturating_mul(windows_ahead as u32);
        let wait = ready_at.saturating_duration_since(now);

        if wait > timeout {
            return None;
        }
        self.available -= 1;
        Some(wait)
    }
}

/// Rate limiter holding one permit window per dependency key.
#[derive(Debug)]
pub struct RateLimiter {
    config: Arc<ConfigHandle>,
    windows: DashMap<String, Arc<Mutex<PermitWindow>>>,
}

impl RateLimiter {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn window(&self, key: &str, policy: &RateLimitConfig) -> Arc<Mutex<PermitWindow>> {
        if let Some(window) = self.windows.get(key) {
            return window.clone();
        }
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(PermitWindow::new(
                    Instant::now(),
                    i64::from(policy.limit_for_period),
                )))
            })
            .clone()
    }

    /// Try to obtain a permit for `key`, waiting at most `timeout`.
    ///
    /// Dropping the returned future while it waits forfeits the reserved permit.
    pub async fn try_acquire(&self, key: &str, timeout: Duration) -> bool {
        let policy = self.config.policy_for(key).rate_limit;
        if !policy.enabled {
            return true;
        }

        let window = self.window(key, &policy);
        let reservation = window.lock().reserve(
            Instant::now(),
            i64::from(policy.limit_for_period),
            policy.limit_refresh_period(),
            timeout,
        );

        match reservation {
            None => {
                tracing::warn!(
                    dependency = %key,
                    limit_for_period = policy.limit_for_period,
                    timeout = ?timeout,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited(key);
                false
            }
            Some(wait) if wait.is_zero() => true,
            Some(wait) => {
                tracing::debug!(dependency = %key, wait = ?wait, "Waiting for rate limit permit");
                tokio::time::sleep(wait).await;
                true
            }
        }
    }

    /// Try to obtain a permit using the dependency's configured acquire timeout.
    pub async fn acquire(&self, key: &str) -> bool {
        let timeout = self.config.policy_for(key).rate_limit.acquire_timeout();
        self.try_acquire(key, timeout).await
    }

    /// Permits left in the current window; negative while reservations are pending.
    pub fn available_permits(&self, key: &str) -> i64 {
        let policy = self.config.policy_for(key).rate_limit;
        match self.windows.get(key) {
            Some(window) => {
                let mut window = window.lock();
                window.refresh(
                    Instant::now(),
                    i64::from(policy.limit_for_period),
                    policy.limit_refresh_period(),
                );
                window.available
            }
            None => i64::from(policy.limit_for_period),
        }
    }
}
