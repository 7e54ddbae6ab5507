//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the invocation layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Policy applied to every dependency unless overridden.
    pub defaults: PolicyConfig,

    /// Per-dependency overrides keyed by dependency key.
    pub dependencies: HashMap<String, DependencyOverrides>,

    /// HTTP transport adapter settings.
    pub transport: TransportConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GuardConfig {
    /// Effective policy for a dependency: defaults with that key's overrides applied.
    pub fn policy_for(&self, dependency: &str) -> PolicyConfig {
        match self.dependencies.get(dependency) {
            Some(overrides) => overrides.apply(&self.defaults),
            None => self.defaults.clone(),
        }
    }
}

/// The full set of resilience settings for one dependency.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100] at which the circuit opens.
    pub failure_rate_threshold: f64,

    /// Number of recent outcomes kept in the sliding window.
    pub sliding_window_size: usize,

    /// Observations required before the failure rate is evaluated.
    pub minimum_number_of_calls: usize,

    /// Time spent OPEN before trial calls are admitted, in milliseconds.
    pub wait_duration_in_open_ms: u64,

    /// Trial calls admitted while HALF_OPEN.
    pub permitted_calls_in_half_open: u32,
}

impl CircuitBreakerConfig {
    pub fn wait_duration_in_open(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_number_of_calls: 5,
            wait_duration_in_open_ms: 10_000,
            permitted_calls_in_half_open: 3,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_period_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_period_ms: u64,
}

impl RetryConfig {
    pub fn base_period(&self) -> Duration {
        Duration::from_millis(self.base_period_ms)
    }

    pub fn max_period(&self) -> Duration {
        Duration::from_millis(self.max_period_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_period_ms: 1000,
            max_period_ms: 10_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Permits granted per refresh period.
    pub limit_for_period: u32,

    /// Length of one rate limiting period in milliseconds.
    pub limit_refresh_period_ms: u64,

    /// How long a caller may wait for a permit, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl RateLimitConfig {
    pub fn limit_refresh_period(&self) -> Duration {
        Duration::from_millis(self.limit_refresh_period_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit_for_period: 100,
            limit_refresh_period_ms: 1000,
            acquire_timeout_ms: 100,
        }
    }
}

/// Per-dependency overrides. Unset fields fall back to `GuardConfig::defaults`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DependencyOverrides {
    pub failure_rate_threshold: Option<f64>,
    pub sliding_window_size: Option<usize>,
    pub minimum_number_of_calls: Option<usize>,
    pub wait_duration_in_open_ms: Option<u64>,
    pub permitted_calls_in_half_open: Option<u32>,
    pub max_attempts: Option<u32>,
    pub base_period_ms: Option<u64>,
    pub max_period_ms: Option<u64>,
    pub rate_limit_enabled: Option<bool>,
    pub limit_for_period: Option<u32>,
    pub limit_refresh_period_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
}

impl DependencyOverrides {
    /// Merge these overrides on top of `base`.
    pub fn apply(&self, base: &PolicyConfig) -> PolicyConfig {
        let cb = &base.circuit_breaker;
        let retry = &base.retry;
        let rl = &base.rate_limit;

        PolicyConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_rate_threshold: self
                    .failure_rate_threshold
                    .unwrap_or(cb.failure_rate_threshold),
                sliding_window_size: self.sliding_window_size.unwrap_or(cb.sliding_window_size),
                minimum_number_of_calls: self
                    .minimum_number_of_calls
                    .unwrap_or(cb.minimum_number_of_calls),
                wait_duration_in_open_ms: self
                    .wait_duration_in_open_ms
                    .unwrap_or(cb.wait_duration_in_open_ms),
                permitted_calls_in_half_open: self
                    .permitted_calls_in_half_open
                    .unwrap_or(cb.permitted_calls_in_half_open),
            },
            retry: RetryConfig {
                max_attempts: self.max_attempts.unwrap_or(retry.max_attempts),
                base_period_ms: self.base_period_ms.unwrap_or(retry.base_period_ms),
                max_period_ms: self.max_period_ms.unwrap_or(retry.max_period_ms),
            },
            rate_limit: RateLimitConfig {
                enabled: self.rate_limit_enabled.unwrap_or(rl.enabled),
                limit_for_period: self.limit_for_period.unwrap_or(rl.limit_for_period),
                limit_refresh_period_ms: self
                    .limit_refresh_period_ms
                    .unwrap_or(rl.limit_refresh_period_ms),
                acquire_timeout_ms: self.acquire_timeout_ms.unwrap_or(rl.acquire_timeout_ms),
            },
        }
    }
}

/// Timeouts for the bundled HTTP transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Total request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Maximum idle pooled connections per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            request_timeout_ms: 10_000,
            pool_max_idle_per_host: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of the pretty format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
