//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handle.rs (ConfigHandle, shared via Arc by all components)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ConfigHandle::replace (atomic swap)
//!     → next decision per dependency sees the new policy
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Per-dependency overrides are partial; unset fields inherit `defaults`

pub mod handle;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use handle::ConfigHandle;
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, DependencyOverrides, GuardConfig, ObservabilityConfig, PolicyConfig,
    RateLimitConfig, RetryConfig, TransportConfig,
};
