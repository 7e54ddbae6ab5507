//! Retry logic.
//!
//! # Responsibilities
//! - Track attempts for one logical call
//! - Decide whether a classified failure gets another attempt
//! - Compute the wait before it (exponential backoff + jitter)
//!
//! # Design Decisions
//! - Only retryable kinds (`Transient`, `ServerUnavailable`) are retried
//! - The context is owned by one call and never shared
//! - Sleeping is cancelled by dropping the future; a cancelled sleep is never
//!   followed by another attempt

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::classify::ErrorKind;

/// Retry bookkeeping for a single logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    attempt: u32,
    max_attempts: u32,
    base_period: Duration,
    max_period: Duration,
    total_slept: Duration,
}

impl RetryContext {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 1,
            max_attempts: config.max_attempts.max(1),
            base_period: config.base_period(),
            max_period: config.max_period(),
            total_slept: Duration::ZERO,
        }
    }

    /// The attempt currently in progress, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn total_slept(&self) -> Duration {
        self.total_slept
    }

    /// Delay before the next attempt, or `None` when the failure should propagate.
    pub fn next_delay_with<R: Rng + ?Sized>(
        &mut self,
        kind: ErrorKind,
        rng: &mut R,
    ) -> Option<Duration> {
        if !kind.is_retryable() || self.attempt >= self.max_attempts {
            return None;
        }
        let delay = calculate_backoff(self.attempt, self.base_period, self.max_period, rng);
        self.attempt += 1;
        Some(delay)
    }

    pub fn next_delay(&mut self, kind: ErrorKind) -> Option<Duration> {
        self.next_delay_with(kind, &mut rand::thread_rng())
    }

    /// Sleep for `delay`, accounting it once the sleep completes.
    pub async fn sleep(&mut self, delay: Duration) {
        tokio::time::sleep(delay).await;
        self.total_slept += delay;
    }
}
