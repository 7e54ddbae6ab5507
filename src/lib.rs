//! Resilient invocation layer for calls to downstream dependencies.
//!
//! Every call goes through rate limiting, circuit breaking, classified retries
//! and fallback resolution, with per-dependency state and live configuration.

pub mod config;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use config::{ConfigHandle, GuardConfig};
pub use resilience::{
    CallError, ErrorKind, FallbackMatcher, FallbackRegistry, InvocationError, InvokeOptions,
    Invoker, Resolution,
};
pub use transport::HttpDependency;
