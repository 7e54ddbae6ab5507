//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded call to a dependency:
//!     → rate_limit.rs (per-dependency permits, once per logical call)
//!     → circuit_breaker.rs (admission per attempt, outcome recording)
//!     → classify.rs (map the failure to one ErrorKind)
//!     → retries.rs + backoff.rs (retry retryable kinds with jittered backoff)
//!     → fallback.rs (substitute value for abandoned calls)
//! ```
//!
//! # Design Decisions
//! - All state is keyed by dependency name and created lazily
//! - Policies are read from the live `ConfigHandle` on every decision
//! - `pipeline.rs` is the only place the pieces are composed

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod errors;
pub mod fallback;
pub mod pipeline;
pub mod rate_limit;
pub mod retries;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use classify::{classify, classify_status, classify_transport, is_retryable, ErrorKind, TransportFailure};
pub use errors::{CallError, CauseKind, Failure, InvocationError};
pub use fallback::{FallbackFn, FallbackMatcher, FallbackRegistry, Resolution};
pub use pipeline::{InvokeOptions, Invoker};
pub use rate_limit::RateLimiter;
pub use retries::RetryContext;
