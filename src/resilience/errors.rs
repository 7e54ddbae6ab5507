//! Error types surfaced by the invocation layer.

use std::time::Duration;

use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::classify::{ErrorKind, TransportFailure};

/// Failure returned by a single attempt of a downstream operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The dependency answered with a non-success status.
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response.
    #[error("{failure}: {message}")]
    Transport {
        failure: TransportFailure,
        message: String,
    },

    /// The operation already knows how its failure classifies.
    #[error("{kind}: {message}")]
    Classified { kind: ErrorKind, message: String },
}

impl CallError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        CallError::Status {
            status,
            message: message.into(),
        }
    }

    pub fn transport(failure: TransportFailure, message: impl Into<String>) -> Self {
        CallError::Transport {
            failure,
            message: message.into(),
        }
    }

    pub fn classified(kind: ErrorKind, message: impl Into<String>) -> Self {
        CallError::Classified {
            kind,
            message: message.into(),
        }
    }
}

/// Coarse family of a failure cause, used by fallback matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CauseKind {
    Status,
    Transport,
    Classified,
    RateLimited,
    CircuitOpen,
    DeadlineExceeded,
}

/// Why an invocation was abandoned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Failure {
    /// The last attempt failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// No rate limit permit became available within the acquire timeout.
    #[error("no rate limit permit within {0:?}")]
    RateLimited(Duration),

    /// The circuit breaker rejected the call without attempting it.
    #[error("circuit breaker is {0}")]
    CircuitOpen(CircuitState),

    /// The caller's deadline expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl Failure {
    pub fn cause_kind(&self) -> CauseKind {
        match self {
            Failure::Call(CallError::Status { .. }) => CauseKind::Status,
            Failure::Call(CallError::Transport { .. }) => CauseKind::Transport,
            Failure::Call(CallError::Classified { .. }) => CauseKind::Classified,
            Failure::RateLimited(_) => CauseKind::RateLimited,
            Failure::CircuitOpen(_) => CauseKind::CircuitOpen,
            Failure::DeadlineExceeded => CauseKind::DeadlineExceeded,
        }
    }
}

/// Terminal failure of one logical call: exactly one kind plus the original cause.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("call to '{dependency}' failed after {attempts} attempt(s) [{kind}]: {cause}")]
pub struct InvocationError {
    pub dependency: String,
    pub kind: ErrorKind,
    /// Attempts actually made (0 when rejected before the first attempt).
    pub attempts: u32,
    #[source]
    pub cause: Failure,
}

impl InvocationError {
    pub fn new(dependency: &str, kind: ErrorKind, attempts: u32, cause: Failure) -> Self {
        Self {
            dependency: dependency.to_string(),
            kind,
            attempts,
            cause,
        }
    }

    pub fn cause_kind(&self) -> CauseKind {
        self.cause.cause_kind()
    }

    /// Status code of the last attempt, if it produced one.
    pub fn status(&self) -> Option<u16> {
        match &self.cause {
            Failure::Call(CallError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}
