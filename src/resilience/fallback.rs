//! Fallback dispatch for abandoned calls.
//!
//! # Responsibilities
//! - Hold an ordered list of matcher → provider registrations
//! - Resolve a terminal `InvocationError` into a substitute value or a final error
//!
//! # Design Decisions
//! - First match wins, in registration order
//! - Without a match the registry default applies; with no default the original
//!   error is returned unchanged
//! - Lookup never fails; only a provider can turn the failure into a new error

use std::fmt;
use std::sync::Arc;

use crate::observability::metrics;
use crate::resilience::classify::ErrorKind;
use crate::resilience::errors::{CauseKind, InvocationError};

/// Produces a substitute value, or a final error, from a terminal failure.
pub type FallbackFn<T> = Arc<dyn Fn(InvocationError) -> Result<T, InvocationError> + Send + Sync>;

type Predicate = Arc<dyn Fn(&InvocationError) -> bool + Send + Sync>;

/// Selects which failures a fallback provider handles.
#[derive(Clone)]
pub enum FallbackMatcher {
    /// A single classified kind.
    Kind(ErrorKind),
    /// Any of several kinds.
    Kinds(Vec<ErrorKind>),
    /// A cause family (status, transport, circuit open, ...).
    Cause(CauseKind),
    /// Arbitrary predicate over the failure.
    Predicate(Predicate),
    /// Every failure.
    Any,
}

impl FallbackMatcher {
    pub fn predicate<P>(predicate: P) -> Self
    where
        P: Fn(&InvocationError) -> bool + Send + Sync + 'static,
    {
        FallbackMatcher::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, error: &InvocationError) -> bool {
        match self {
            FallbackMatcher::Kind(kind) => error.kind == *kind,
            FallbackMatcher::Kinds(kinds) => kinds.contains(&error.kind),
            FallbackMatcher::Cause(cause) => error.cause_kind() == *cause,
            FallbackMatcher::Predicate(predicate) => predicate(error),
            FallbackMatcher::Any => true,
        }
    }
}

impl fmt::Debug for FallbackMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackMatcher::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            FallbackMatcher::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            FallbackMatcher::Cause(cause) => f.debug_tuple("Cause").field(cause).finish(),
            FallbackMatcher::Predicate(_) => f.write_str("Predicate(..)"),
            FallbackMatcher::Any => f.write_str("Any"),
        }
    }
}

impl From<ErrorKind> for FallbackMatcher {
    fn from(kind: ErrorKind) -> Self {
        FallbackMatcher::Kind(kind)
    }
}

impl From<CauseKind> for FallbackMatcher {
    fn from(cause: CauseKind) -> Self {
        FallbackMatcher::Cause(cause)
    }
}

/// Result of a guarded call that did not end in an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// The dependency answered successfully.
    Primary(T),
    /// The call was abandoned and a fallback provider supplied the value.
    Fallback { value: T, error: InvocationError },
}

impl<T> Resolution<T> {
    pub fn into_value(self) -> T {
        match self {
            Resolution::Primary(value) | Resolution::Fallback { value, .. } => value,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Resolution::Primary(value) | Resolution::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback { .. })
    }

    /// The failure that triggered the fallback, if any.
    pub fn error(&self) -> Option<&InvocationError> {
        match self {
            Resolution::Primary(_) => None,
            Resolution::Fallback { error, .. } => Some(error),
        }
    }
}

/// Ordered fallback registrations for calls producing `T`.
pub struct FallbackRegistry<T> {
    entries: Vec<(FallbackMatcher, FallbackFn<T>)>,
    default: Option<FallbackFn<T>>,
}

impl<T> FallbackRegistry<T> {
    /// An empty registry: every failure is returned to the caller.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            default: None,
        }
    }

    /// Append a provider for failures accepted by `matcher`.
    pub fn register<M, F>(&mut self, matcher: M, provider: F) -> &mut Self
    where
        M: Into<FallbackMatcher>,
        F: Fn(InvocationError) -> Result<T, InvocationError> + Send + Sync + 'static,
    {
        self.entries.push((matcher.into(), Arc::new(provider)));
        self
    }

    /// Builder form of `register`.
    pub fn on<M, F>(mut self, matcher: M, provider: F) -> Self
    where
        M: Into<FallbackMatcher>,
        F: Fn(InvocationError) -> Result<T, InvocationError> + Send + Sync + 'static,
    {
        self.register(matcher, provider);
        self
    }

    /// Replace the provider used when nothing matches.
    pub fn set_default<F>(&mut self, provider: F) -> &mut Self
    where
        F: Fn(InvocationError) -> Result<T, InvocationError> + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(provider));
        self
    }

    pub fn with_default<F>(mut self, provider: F) -> Self
    where
        F: Fn(InvocationError) -> Result<T, InvocationError> + Send + Sync + 'static,
    {
        self.set_default(provider);
        self
    }

    /// Number of matcher registrations, excluding the default.
    pub fn matcher_count(&self) -> usize {
        self.entries.len()
    }

    /// True when neither a matcher nor a default is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.default.is_none()
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Resolve a terminal failure into a substitute value or a final error.
    pub fn resolve(&self, error: InvocationError) -> Result<Resolution<T>, InvocationError> {
        let provider = self
            .entries
            .iter()
            .find(|(matcher, _)| matcher.matches(&error))
            .map(|(_, provider)| provider)
            .or(self.default.as_ref());

        let Some(provider) = provider else {
            tracing::error!(
                dependency = %error.dependency,
                kind = %error.kind,
                error = %error,
                "No fallback registered, propagating failure"
            );
            return Err(error);
        };

        let dependency = error.dependency.clone();
        let kind = error.kind;
        match provider(error.clone()) {
            Ok(value) => {
                tracing::warn!(
                    dependency = %dependency,
                    kind = %kind,
                    reason = %error.cause,
                    "Fallback resolved"
                );
                metrics::record_fallback(&dependency, kind);
                Ok(Resolution::Fallback { value, error })
            }
            Err(final_error) => {
                tracing::error!(
                    dependency = %dependency,
                    kind = %final_error.kind,
                    error = %final_error,
                    "Fallback provider failed"
                );
                Err(final_error)
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> FallbackRegistry<T> {
    /// Register a constant substitute value.
    pub fn on_value<M: Into<FallbackMatcher>>(self, matcher: M, value: T) -> Self {
        self.on(matcher, move |_| Ok(value.clone()))
    }

    pub fn with_default_value(self, value: T) -> Self {
        self.with_default(move |_| Ok(value.clone()))
    }
}

impl<T: Default + 'static> FallbackRegistry<T> {
    /// Resolve unmatched failures to `T::default()` (empty / unavailable result).
    pub fn with_empty_default(self) -> Self {
        self.with_default(|_| Ok(T::default()))
    }
}

impl<T> Default for FallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for FallbackRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            default: self.default.clone(),
        }
    }
}

impl<T> fmt::Debug for FallbackRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRegistry")
            .field(
                "matchers",
                &self.entries.iter().map(|(m, _)| m).collect::<Vec<_>>(),
            )
            .field("has_default", &self.default.is_some())
            .finish()
    }
}
