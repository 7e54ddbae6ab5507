//! Invocation pipeline.
//!
//! # Data Flow
//! ```text
//! invoke(dependency, operation, fallbacks)
//!     → rate_limit.rs   (once per logical call; rejection → RateLimited fallback)
//!     → circuit_breaker.rs (per attempt; rejection → ServerUnavailable fallback)
//!     → operation()     (outcome recorded through a CallPermit guard)
//!     → classify.rs     (ErrorKind for the failure)
//!     → retries.rs      (backoff sleep, back to the circuit breaker)
//!     → fallback.rs     (terminal failure → substitute value or error)
//! ```
//!
//! # Design Decisions
//! - Retries re-check the circuit but not the rate limiter
//! - Intermediate attempt failures are never surfaced to the caller
//! - A deadline bounds the whole call; expiry records a failure for the attempt
//!   in flight and propagates without consulting fallbacks

use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ConfigHandle, GuardConfig};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::classify::{classify, ErrorKind};
use crate::resilience::errors::{CallError, Failure, InvocationError};
use crate::resilience::fallback::{FallbackMatcher, FallbackRegistry, Resolution};
use crate::resilience::rate_limit::RateLimiter;
use crate::resilience::retries::RetryContext;

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeOptions {
    /// Absolute deadline for the whole invocation, including waits and retries.
    pub deadline: Option<Instant>,
}

impl InvokeOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }
}

type FallbackKey = (String, TypeId);

/// Entry point for guarded calls to downstream dependencies.
///
/// Shares one rate limiter and one circuit breaker registry across all callers;
/// per-dependency state is isolated by key.
#[derive(Debug)]
pub struct Invoker {
    config: Arc<ConfigHandle>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    fallbacks: DashMap<FallbackKey, Box<dyn Any + Send + Sync>>,
}

impl Invoker {
    pub fn new(config: GuardConfig) -> Self {
        Self::with_handle(Arc::new(ConfigHandle::new(config)))
    }

    /// Build on an existing handle, e.g. one fed by the config watcher.
    pub fn with_handle(config: Arc<ConfigHandle>) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config.clone()),
            circuit_breaker: CircuitBreaker::new(config.clone()),
            config,
            fallbacks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Register a fallback for calls to `dependency` producing `T`.
    ///
    /// Registrations are consulted by `invoke_registered`, in registration order.
    pub fn register_fallback<T, M, F>(&self, dependency: &str, matcher: M, provider: F)
    where
        T: 'static,
        M: Into<FallbackMatcher>,
        F: Fn(InvocationError) -> Result<T, InvocationError> + Send + Sync + 'static,
    {
        self.with_registry::<T>(dependency, |registry| {
            registry.register(matcher, provider);
        });
    }

    /// Set the provider used for `dependency` when no registration matches.
    pub fn set_default_fallback<T, F>(&self, dependency: &str, provider: F)
    where
        T: 'static,
        F: Fn(InvocationError) -> Result<T, InvocationError> + Send + Sync + 'static,
    {
        self.with_registry::<T>(dependency, |registry| {
            registry.set_default(provider);
        });
    }

    fn with_registry<T: 'static>(&self, dependency: &str, apply: impl FnOnce(&mut FallbackRegistry<T>)) {
        let mut entry = self
            .fallbacks
            .entry((dependency.to_string(), TypeId::of::<T>()))
            .or_insert_with(|| Box::new(FallbackRegistry::<T>::new()));
        if let Some(registry) = entry.value_mut().as_mut().downcast_mut::<FallbackRegistry<T>>() {
            apply(registry);
        }
    }

    /// Copy of the fallbacks registered for `dependency` and result type `T`.
    pub fn registered_fallbacks<T: 'static>(&self, dependency: &str) -> FallbackRegistry<T> {
        self.fallbacks
            .get(&(dependency.to_string(), TypeId::of::<T>()))
            .and_then(|entry| {
                entry
                    .value()
                    .as_ref()
                    .downcast_ref::<FallbackRegistry<T>>()
                    .cloned()
            })
            .unwrap_or_default()
    }

    /// Guard one logical call to `dependency`.
    pub async fn invoke<T, F, Fut>(
        &self,
        dependency: &str,
        operation: F,
        fallbacks: &FallbackRegistry<T>,
    ) -> Result<Resolution<T>, InvocationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.invoke_with(dependency, operation, fallbacks, InvokeOptions::default())
            .await
    }

    /// Guard one logical call using the fallbacks registered for `dependency`.
    pub async fn invoke_registered<T, F, Fut>(
        &self,
        dependency: &str,
        operation: F,
    ) -> Result<Resolution<T>, InvocationError>
    where
        T: 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let fallbacks = self.registered_fallbacks::<T>(dependency);
        self.invoke(dependency, operation, &fallbacks).await
    }

    /// Guard one logical call with explicit options.
    pub async fn invoke_with<T, F, Fut>(
        &self,
        dependency: &str,
        operation: F,
        fallbacks: &FallbackRegistry<T>,
        options: InvokeOptions,
    ) -> Result<Resolution<T>, InvocationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!("invoke", dependency = %dependency, invocation_id = %invocation_id);
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let run = self.run(dependency, operation, fallbacks, &attempts);
        let result = match options.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, run).instrument(span.clone()).await {
                Ok(result) => result,
                Err(_) => {
                    let attempts = attempts.load(Ordering::Relaxed);
                    tracing::warn!(parent: &span, attempts, "Invocation deadline exceeded");
                    Err(InvocationError::new(
                        dependency,
                        ErrorKind::Transient,
                        attempts,
                        Failure::DeadlineExceeded,
                    ))
                }
            },
            None => run.instrument(span).await,
        };

        let outcome = match &result {
            Ok(Resolution::Primary(_)) => "success",
            Ok(Resolution::Fallback { .. }) => "fallback",
            Err(_) => "error",
        };
        metrics::record_call(dependency, outcome, started.elapsed());
        result
    }

    async fn run<T, F, Fut>(
        &self,
        dependency: &str,
        mut operation: F,
        fallbacks: &FallbackRegistry<T>,
        attempts: &AtomicU32,
    ) -> Result<Resolution<T>, InvocationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let policy = self.config.policy_for(dependency);

        // 1. Rate limiter, once per logical call.
        let acquire_timeout = policy.rate_limit.acquire_timeout();
        if !self.rate_limiter.try_acquire(dependency, acquire_timeout).await {
            let error = InvocationError::new(
                dependency,
                ErrorKind::RateLimited,
                0,
                Failure::RateLimited(acquire_timeout),
            );
            return fallbacks.resolve(error);
        }

        let mut retry = RetryContext::new(&policy.retry);
        loop {
            // 2. Circuit breaker, every attempt.
            let permit = match self.circuit_breaker.acquire(dependency) {
                Ok(permit) => permit,
                Err(state) => {
                    let error = InvocationError::new(
                        dependency,
                        ErrorKind::ServerUnavailable,
                        retry.attempt() - 1,
                        Failure::CircuitOpen(state),
                    );
                    return fallbacks.resolve(error);
                }
            };

            // 3. Attempt. The permit records a failure if this future is dropped here.
            attempts.store(retry.attempt(), Ordering::Relaxed);
            let cause = match operation().await {
                Ok(value) => {
                    permit.record(true);
                    if retry.attempt() > 1 {
                        tracing::info!(attempt = retry.attempt(), "Call succeeded after retry");
                    }
                    return Ok(Resolution::Primary(value));
                }
                Err(cause) => {
                    permit.record(false);
                    cause
                }
            };

            // 4. Classify and decide.
            let kind = classify(&cause);
            let attempt = retry.attempt();
            if let Some(delay) = retry.next_delay(kind) {
                tracing::info!(
                    attempt,
                    max_attempts = retry.max_attempts(),
                    kind = %kind,
                    delay = ?delay,
                    error = %cause,
                    "Retrying call"
                );
                metrics::record_retry(dependency, kind);
                retry.sleep(delay).await;
                continue;
            }

            if kind.is_retryable() {
                tracing::error!(
                    attempts = attempt,
                    slept = ?retry.total_slept(),
                    kind = %kind,
                    error = %cause,
                    "Retries exhausted"
                );
            } else {
                tracing::warn!(kind = %kind, error = %cause, "Non-retryable failure");
            }

            let error = InvocationError::new(dependency, kind, attempt, Failure::Call(cause));
            return fallbacks.resolve(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependencyOverrides, RetryConfig};
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::classify::TransportFailure;
    use crate::resilience::errors::CauseKind;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> GuardConfig {
        let mut config = GuardConfig::default();
        config.defaults.retry = RetryConfig {
            max_attempts: 3,
            base_period_ms: 10,
            max_period_ms: 100,
        };
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let invoker = Invoker::new(GuardConfig::default());
        let calls = AtomicUsize::new(0);
        let fallback_hits = Arc::new(AtomicUsize::new(0));
        let hits = fallback_hits.clone();
        let fallbacks = FallbackRegistry::new().with_default(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok("fallback")
        });

        let start = Instant::now();
        let result = invoker
            .invoke(
                "catalogue",
                || async {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 1 => Err(CallError::transport(TransportFailure::ConnectionReset, "reset")),
                        _ => Ok("menu"),
                    }
                },
                &fallbacks,
            )
            .await
            .unwrap();

        assert_eq!(result, Resolution::Primary("menu"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fallback_hits.load(Ordering::SeqCst), 0);

        let snapshot = invoker.circuit_breaker().snapshot("catalogue");
        assert_eq!(snapshot.failures, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.state, CircuitState::Closed);

        // 1000ms + 2000ms of backoff, each with at most 10% jitter.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000) && elapsed <= Duration::from_millis(3310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_is_attempted_once() {
        let invoker = Invoker::new(fast_config());
        let calls = AtomicUsize::new(0);
        let fallbacks: FallbackRegistry<u32> = FallbackRegistry::new();

        let err = invoker
            .invoke(
                "orders",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::status(400, "quantity must be positive"))
                },
                &fallbacks,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.attempts, 1);
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_reach_fallback() {
        let invoker = Invoker::new(fast_config());
        let calls = AtomicUsize::new(0);
        let fallbacks = FallbackRegistry::new()
            .on(ErrorKind::ServerUnavailable, |err| Ok(format!("degraded after {}", err.attempts)));

        let result = invoker
            .invoke(
                "restaurants",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<String, _>(CallError::status(503, "unavailable"))
                },
                &fallbacks,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.is_fallback());
        assert_eq!(result.into_value(), "degraded after 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_to_fallback() {
        let invoker = Invoker::new(fast_config());
        for _ in 0..5 {
            assert!(invoker.circuit_breaker().allow("catalogue"));
            invoker.circuit_breaker().record_outcome("catalogue", false);
        }

        let calls = AtomicUsize::new(0);
        let fallbacks = FallbackRegistry::new().on_value(CauseKind::CircuitOpen, 0u32);
        let result = invoker
            .invoke(
                "catalogue",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CallError>(1u32)
                },
                &fallbacks,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::ServerUnavailable);
        assert_eq!(error.attempts, 0);
        assert_eq!(result.into_value(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_skips_circuit_breaker() {
        let mut config = fast_config();
        config.dependencies.insert(
            "users".into(),
            DependencyOverrides {
                limit_for_period: Some(1),
                acquire_timeout_ms: Some(0),
                ..Default::default()
            },
        );
        let invoker = Invoker::new(config);
        let fallbacks = FallbackRegistry::new().on_value(ErrorKind::RateLimited, "busy");

        let first = invoker.invoke("users", || async { Ok::<_, CallError>("alice") }, &fallbacks).await.unwrap();
        assert_eq!(first, Resolution::Primary("alice"));

        let second = invoker.invoke("users", || async { Ok::<_, CallError>("bob") }, &fallbacks).await.unwrap();
        assert_eq!(second.error().map(|e| e.cause_kind()), Some(CauseKind::RateLimited));
        assert_eq!(second.into_value(), "busy");

        assert_eq!(invoker.circuit_breaker().snapshot("users").window_len, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unvalidated_zero_refresh_period_still_invokes() {
        let mut config = fast_config();
        config.defaults.rate_limit.limit_refresh_period_ms = 0;
        let invoker = Invoker::new(config);
        let fallbacks: FallbackRegistry<u8> = FallbackRegistry::new();

        for _ in 0..2 {
            let result = invoker
                .invoke("catalogue", || async { Ok::<_, CallError>(7u8) }, &fallbacks)
                .await
                .unwrap();
            assert_eq!(result, Resolution::Primary(7));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opening_mid_retry_stops_attempts() {
        let mut config = fast_config();
        config.defaults.retry.max_attempts = 5;
        config.defaults.circuit_breaker.minimum_number_of_calls = 2;
        let invoker = Invoker::new(config);
        let calls = AtomicUsize::new(0);
        let fallbacks: FallbackRegistry<()> = FallbackRegistry::new();

        let err = invoker
            .invoke(
                "catalogue",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::transport(TransportFailure::Timeout, "slow"))
                },
                &fallbacks,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.kind, ErrorKind::ServerUnavailable);
        assert_eq!(err.cause, Failure::CircuitOpen(CircuitState::Open));
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_records_failure_for_inflight_attempt() {
        let invoker = Invoker::new(fast_config());
        let fallbacks = FallbackRegistry::new().with_default_value(0u8);

        let err = invoker
            .invoke_with(
                "catalogue",
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, CallError>(1u8)
                },
                &fallbacks,
                InvokeOptions::with_timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();

        assert_eq!(err.cause, Failure::DeadlineExceeded);
        assert_eq!(err.attempts, 1);
        let snapshot = invoker.circuit_breaker().snapshot("catalogue");
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.window_len, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_retry_sleep() {
        let invoker = Invoker::new(GuardConfig::default());
        let calls = AtomicUsize::new(0);
        let fallbacks: FallbackRegistry<()> = FallbackRegistry::new();

        let err = invoker
            .invoke_with(
                "catalogue",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::status(503, "down"))
                },
                &fallbacks,
                InvokeOptions::with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();

        // The 1000ms backoff outlives the deadline: no second attempt.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.cause, Failure::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_fallbacks_are_typed_per_dependency() {
        let invoker = Invoker::new(fast_config());
        invoker.register_fallback("catalogue", ErrorKind::NotFound, |_| Ok(Vec::<String>::new()));
        invoker.set_default_fallback("catalogue", |_| Ok(vec!["cached".to_string()]));
        invoker.register_fallback("catalogue", ErrorKind::NotFound, |_| Ok(0u64));

        let missing = invoker
            .invoke_registered("catalogue", || async {
                Err::<Vec<String>, _>(CallError::status(404, "no such item"))
            })
            .await
            .unwrap();
        assert!(missing.into_value().is_empty());

        let forbidden = invoker
            .invoke_registered("catalogue", || async {
                Err::<Vec<String>, _>(CallError::status(403, "nope"))
            })
            .await
            .unwrap();
        assert_eq!(forbidden.into_value(), vec!["cached".to_string()]);

        let count = invoker
            .invoke_registered("catalogue", || async { Err::<u64, _>(CallError::status(404, "")) })
            .await
            .unwrap();
        assert_eq!(count.into_value(), 0);

        // Nothing registered for this dependency: the error propagates.
        let err = invoker
            .invoke_registered("users", || async { Err::<u64, _>(CallError::status(404, "")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
