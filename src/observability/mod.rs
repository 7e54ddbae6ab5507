//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! resilience/* produce:
//!     → logging.rs (structured events inside the per-invocation span)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
