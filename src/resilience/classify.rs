//! Outcome classification.
//!
//! # Responsibilities
//! - Map a status code or transport failure to exactly one `ErrorKind`
//! - Decide retryability per kind
//!
//! # Design Decisions
//! - Pure functions, no state: retry and circuit behavior stay reproducible
//! - Only `Transient` and `ServerUnavailable` are retried
//! - Unrecognized statuses and transport failures are `Unknown` (terminal)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resilience::errors::CallError;

/// Closed set of failure classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    Transient,
    ServerUnavailable,
    Unknown,
}

impl ErrorKind {
    /// Stable label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::ServerUnavailable => "server_unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::ServerUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level failure reported by the downstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailure {
    ConnectionRefused,
    Timeout,
    ConnectionReset,
    Other,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportFailure::ConnectionRefused => "connection refused",
            TransportFailure::Timeout => "timeout",
            TransportFailure::ConnectionReset => "connection reset",
            TransportFailure::Other => "transport error",
        };
        f.write_str(label)
    }
}

/// Classify an HTTP-style status code.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Validation,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Transient,
        429 => ErrorKind::RateLimited,
        500 | 502 | 503 | 504 => ErrorKind::ServerUnavailable,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a transport failure.
pub fn classify_transport(failure: TransportFailure) -> ErrorKind {
    match failure {
        TransportFailure::ConnectionRefused
        | TransportFailure::Timeout
        | TransportFailure::ConnectionReset => ErrorKind::Transient,
        TransportFailure::Other => ErrorKind::Unknown,
    }
}

/// Classify the failure returned by one attempt.
pub fn classify(error: &CallError) -> ErrorKind {
    match error {
        CallError::Status { status, .. } => classify_status(*status),
        CallError::Transport { failure, .. } => classify_transport(*failure),
        CallError::Classified { kind, .. } => *kind,
    }
}

pub fn is_retryable(kind: ErrorKind) -> bool {
    kind.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify_status(400), ErrorKind::Validation);
        assert_eq!(classify_status(401), ErrorKind::Unauthorized);
        assert_eq!(classify_status(403), ErrorKind::Forbidden);
        assert_eq!(classify_status(404), ErrorKind::NotFound);
        assert_eq!(classify_status(408), ErrorKind::Transient);
        assert_eq!(classify_status(429), ErrorKind::RateLimited);
        for status in [500, 502, 503, 504] {
            assert_eq!(classify_status(status), ErrorKind::ServerUnavailable);
        }
        assert_eq!(classify_status(418), ErrorKind::Unknown);
        assert_eq!(classify_status(501), ErrorKind::Unknown);
    }

    #[test]
    fn test_transport_mapping() {
        assert_eq!(classify_transport(TransportFailure::ConnectionRefused), ErrorKind::Transient);
        assert_eq!(classify_transport(TransportFailure::Timeout), ErrorKind::Transient);
        assert_eq!(classify_transport(TransportFailure::ConnectionReset), ErrorKind::Transient);
        assert_eq!(classify_transport(TransportFailure::Other), ErrorKind::Unknown);
    }

    #[test]
    fn test_only_transient_and_unavailable_retry() {
        let retryable: Vec<_> = [
            ErrorKind::Validation,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::RateLimited,
            ErrorKind::Transient,
            ErrorKind::ServerUnavailable,
            ErrorKind::Unknown,
        ]
        .into_iter()
        .filter(|k| is_retryable(*k))
        .collect();

        assert_eq!(retryable, vec![ErrorKind::Transient, ErrorKind::ServerUnavailable]);
    }

    #[test]
    fn test_classify_call_error() {
        let err = CallError::status(503, "down");
        assert_eq!(classify(&err), ErrorKind::ServerUnavailable);

        let err = CallError::transport(TransportFailure::Timeout, "read timed out");
        assert_eq!(classify(&err), ErrorKind::Transient);

        let err = CallError::classified(ErrorKind::Forbidden, "no scope");
        assert_eq!(classify(&err), ErrorKind::Forbidden);
    }

    #[test]
    fn test_kind_labels_serialize_snake_case() {
        assert_eq!(ErrorKind::ServerUnavailable.to_string(), "server_unavailable");
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
