//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GuardConfig, ConfigError> {
    let config: GuardConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides_and_defaults() {
        let config = parse_config(
            r#"
            [defaults.retry]
            max_attempts = 4

            [dependencies.restaurant-service]
            max_attempts = 2
            base_period_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.defaults.retry.max_attempts, 4);
        assert_eq!(config.defaults.circuit_breaker.sliding_window_size, 10);

        let restaurant = config.policy_for("restaurant-service");
        assert_eq!(restaurant.retry.max_attempts, 2);
        assert_eq!(restaurant.retry.base_period_ms, 500);
        assert_eq!(restaurant.retry.max_period_ms, 10_000);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = parse_config("").unwrap();
        assert!(config.dependencies.is_empty());
        assert_eq!(config.transport.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config(
            r#"
            [defaults.circuit_breaker]
            failure_rate_threshold = 150.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errs) if errs.len() == 1));
        assert!(err.to_string().contains("failure_rate_threshold"));
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = parse_config("[defaults.retry\nmax_attempts = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
