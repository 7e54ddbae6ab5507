//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_calls_total` (counter): logical calls by dependency, outcome
//! - `guard_call_duration_seconds` (histogram): logical call latency, retries included
//! - `guard_retries_total` (counter): retry attempts by dependency, kind
//! - `guard_rate_limited_total` (counter): calls rejected by the rate limiter
//! - `guard_circuit_rejections_total` (counter): attempts rejected by the circuit breaker
//! - `guard_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `guard_fallbacks_total` (counter): fallback resolutions by dependency, kind
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs a recorder
//! - Labels carry the dependency key, never per-call identifiers

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::classify::ErrorKind;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!("guard_calls_total", "Guarded calls by final outcome");
    describe_histogram!(
        "guard_call_duration_seconds",
        "Guarded call duration in seconds, including waits and retries"
    );
    describe_counter!("guard_retries_total", "Retry attempts");
    describe_counter!("guard_rate_limited_total", "Calls rejected by the rate limiter");
    describe_counter!(
        "guard_circuit_rejections_total",
        "Attempts rejected by the circuit breaker"
    );
    describe_gauge!("guard_circuit_state", "Circuit state: 0=closed, 1=open, 2=half-open");
    describe_counter!("guard_fallbacks_total", "Calls resolved by a fallback provider");
}

/// `outcome` is one of `success`, `fallback`, `error`.
pub fn record_call(dependency: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        "guard_calls_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("guard_call_duration_seconds", "dependency" => dependency.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(dependency: &str, kind: ErrorKind) {
    counter!(
        "guard_retries_total",
        "dependency" => dependency.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_rate_limited(dependency: &str) {
    counter!("guard_rate_limited_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_circuit_rejected(dependency: &str) {
    counter!("guard_circuit_rejections_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_circuit_state(dependency: &str, state: CircuitState) {
    gauge!("guard_circuit_state", "dependency" => dependency.to_string()).set(state as u8 as f64);
}

pub fn record_fallback(dependency: &str, kind: ErrorKind) {
    counter!(
        "guard_fallbacks_total",
        "dependency" => dependency.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}
