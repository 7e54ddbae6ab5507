//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, windows, periods)
//! - Validate every per-dependency override after merging with defaults
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GuardConfig, PolicyConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{scope}: {field} {problem}")]
pub struct ValidationError {
    /// `defaults` or `dependencies.<key>`.
    pub scope: String,
    pub field: &'static str,
    pub problem: String,
}

impl ValidationError {
    fn new(scope: &str, field: &'static str, problem: impl Into<String>) -> Self {
        Self {
            scope: scope.to_string(),
            field,
            problem: problem.into(),
        }
    }
}

/// Validate a whole configuration, collecting every error.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_policy("defaults", &config.defaults, &mut errors);

    let mut keys: Vec<&String> = config.dependencies.keys().collect();
    keys.sort();
    for key in keys {
        let scope = format!("dependencies.{}", key);
        if key.trim().is_empty() {
            errors.push(ValidationError::new(&scope, "key", "must not be empty"));
        }
        validate_policy(&scope, &config.policy_for(key), &mut errors);
    }

    if config.transport.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("transport", "connect_timeout_ms", "must be > 0"));
    }
    if config.transport.request_timeout_ms == 0 {
        errors.push(ValidationError::new("transport", "request_timeout_ms", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability",
            "metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_policy(scope: &str, policy: &PolicyConfig, errors: &mut Vec<ValidationError>) {
    let cb = &policy.circuit_breaker;
    if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 100.0) {
        errors.push(ValidationError::new(
            scope,
            "failure_rate_threshold",
            format!("must be in (0, 100], got {}", cb.failure_rate_threshold),
        ));
    }
    if cb.sliding_window_size == 0 {
        errors.push(ValidationError::new(scope, "sliding_window_size", "must be >= 1"));
    }
    if cb.minimum_number_of_calls == 0 {
        errors.push(ValidationError::new(scope, "minimum_number_of_calls", "must be >= 1"));
    }
    // The window never holds more outcomes than its size.
    if cb.minimum_number_of_calls > cb.sliding_window_size {
        errors.push(ValidationError::new(
            scope,
            "minimum_number_of_calls",
            format!(
                "({}) exceeds sliding_window_size ({})",
                cb.minimum_number_of_calls, cb.sliding_window_size
            ),
        ));
    }
    if cb.permitted_calls_in_half_open == 0 {
        errors.push(ValidationError::new(scope, "permitted_calls_in_half_open", "must be >= 1"));
    }

    let retry = &policy.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new(scope, "max_attempts", "must be >= 1"));
    }
    if retry.base_period_ms > retry.max_period_ms {
        errors.push(ValidationError::new(
            scope,
            "base_period_ms",
            format!("({}) exceeds max_period_ms ({})", retry.base_period_ms, retry.max_period_ms),
        ));
    }

    let rl = &policy.rate_limit;
    if rl.enabled {
        if rl.limit_for_period == 0 {
            errors.push(ValidationError::new(scope, "limit_for_period", "must be >= 1"));
        }
        if rl.limit_refresh_period_ms == 0 {
            errors.push(ValidationError::new(scope, "limit_refresh_period_ms", "must be > 0"));
        }
    }
}
