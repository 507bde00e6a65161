//! Error types used by the eventvisor runtime and handlers.
//!
//! This module defines two main error enums:
//!
//! - [`BusError`] — errors raised by the bus runtime itself (registry misses,
//!   shutdown grace overrun, disposed primitives).
//! - [`HandlerError`] — errors raised while invoking an individual subscriber
//!   (unresolved parameters, provider misses, raised exit sentinels, panics).
//!
//! Both types provide `as_label()` returning a short stable snake_case label
//! for logs/metrics. Handler failures that are not control flow are routed to
//! the `ExceptionEvent` channel by the dispatch engine.

use std::time::Duration;

use thiserror::Error;

use crate::flow::ExitFlow;

/// # Errors produced by the bus runtime.
///
/// These represent failures in the dispatch machinery itself rather than in
/// any one subscriber.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// Shutdown grace period was exceeded; some dispatch tasks remained
    /// outstanding and were cancelled.
    #[error("shutdown grace {grace:?} exceeded; {pending} dispatch task(s) cancelled")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Number of dispatch tasks still running when the grace expired.
        pending: usize,
    },

    /// No publisher is registered under the requested id.
    #[error("publisher `{id}` is not registered")]
    PublisherNotFound {
        /// The requested publisher id.
        id: String,
    },

    /// A registration was rejected by the publisher's `check` gate.
    ///
    /// Rejection is not reported through the exception channel; the
    /// subscriber is simply not bound.
    #[error("publisher `{id}` rejected the subscriber")]
    Rejected {
        /// The gating publisher id.
        id: String,
    },

    /// Operation on a disposed primitive (scope, subscriber, or step-out).
    #[error("{what} is disposed")]
    Disposed {
        /// What was operated on.
        what: &'static str,
    },

    /// A first-result value failed the event's `check_result` predicate.
    #[error("result rejected by `check_result` of publisher `{id}`")]
    ResultRejected {
        /// The validating publisher id.
        id: String,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::GraceExceeded { .. } => "bus_grace_exceeded",
            BusError::PublisherNotFound { .. } => "bus_publisher_not_found",
            BusError::Rejected { .. } => "bus_registration_rejected",
            BusError::Disposed { .. } => "bus_disposed",
            BusError::ResultRejected { .. } => "bus_result_rejected",
        }
    }
}

/// # Errors produced while invoking one subscriber.
///
/// `Exit` is pure control flow (recovered by the engine); `Inner` carries a
/// dependency handler's failure to its parent parameter; everything else is
/// surfaced through the `ExceptionEvent` channel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandlerError {
    /// No provider and no default could satisfy a parameter.
    ///
    /// Carries the parameter's textual signature, the providers considered
    /// (in the order they were tried), and a snapshot of the context at
    /// resolution time.
    #[error("unresolved requirement for `{param}`; tried {providers:?}; context: {snapshot}")]
    UnresolvedRequirement {
        /// Textual parameter signature, e.g. `foo: alloc::string::String`.
        param: String,
        /// Human-readable descriptions of the providers considered.
        providers: Vec<String>,
        /// Rendered context snapshot (sorted keys with type names).
        snapshot: String,
    },

    /// A provider explicitly declared its source key missing.
    ///
    /// Propagates like an unresolved requirement but is reported verbatim,
    /// without the provider/context enrichment.
    #[error("provider for `{param}` found no `{key}` in the context")]
    ProviderUnsatisfied {
        /// The parameter being resolved.
        param: String,
        /// The context key the provider requires.
        key: String,
    },

    /// `Stop` / `Block` raised as an error for control flow out of deep calls.
    #[error("exit: {0:?}")]
    Exit(ExitFlow),

    /// A dependency handler failed; unwrapped at the outermost frame so the
    /// parent parameter reports the original failure.
    #[error("dependency failed: {0}")]
    Inner(#[source] Box<HandlerError>),

    /// A resolved value had an unexpected concrete type.
    #[error("parameter `{param}` expected {expected}, got {actual}")]
    TypeMismatch {
        /// The accessed parameter name.
        param: String,
        /// Expected type name.
        expected: &'static str,
        /// Actual concrete type name, when known.
        actual: String,
    },

    /// The handler body panicked; caught and isolated by the engine.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Any other handler failure.
    #[error("handler failed: {0}")]
    Failure(String),
}

impl HandlerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::UnresolvedRequirement { .. } => "handler_unresolved_requirement",
            HandlerError::ProviderUnsatisfied { .. } => "handler_provider_unsatisfied",
            HandlerError::Exit(_) => "handler_exit",
            HandlerError::Inner(_) => "handler_inner",
            HandlerError::TypeMismatch { .. } => "handler_type_mismatch",
            HandlerError::Panicked(_) => "handler_panicked",
            HandlerError::Failure(_) => "handler_failure",
        }
    }

    /// Builds a `Failure` from any displayable error.
    pub fn failure(e: impl std::fmt::Display) -> Self {
        HandlerError::Failure(e.to_string())
    }

    /// True when the error is a raised exit sentinel (recovered locally).
    #[inline]
    pub fn is_exit(&self) -> bool {
        matches!(self, HandlerError::Exit(_))
    }

    /// Unwraps nested `Inner` layers down to the original failure.
    pub fn unwrap_inner(self) -> HandlerError {
        match self {
            HandlerError::Inner(inner) => inner.unwrap_inner(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let e = HandlerError::Panicked("boom".into());
        assert_eq!(e.as_label(), "handler_panicked");
        let b = BusError::Disposed { what: "step_out" };
        assert_eq!(b.as_label(), "bus_disposed");
    }

    #[test]
    fn test_unwrap_inner_reaches_origin() {
        let origin = HandlerError::Failure("boom".into());
        let wrapped = HandlerError::Inner(Box::new(HandlerError::Inner(Box::new(origin))));
        match wrapped.unwrap_inner() {
            HandlerError::Failure(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other}"),
        }
    }
}
