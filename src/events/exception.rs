//! # ExceptionEvent: the out-of-band channel for subscriber failures.
//!
//! When a subscriber fails with anything other than a control-flow sentinel,
//! the engine wraps the failure into an [`ExceptionEvent`] and re-enters
//! dispatch with it on every enabled scope's non-backend subscribers.
//!
//! ## Rules
//! - Failures raised *while handling an `ExceptionEvent`* are swallowed (and
//!   optionally reported to stderr) — this prevents recursive error loops.
//! - Backend subscribers never receive exception events for the same reason.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{val, Context, ERROR};
use crate::error::HandlerError;
use crate::events::event::Event;
use crate::subscribers::SubscriberInfo;

/// Publisher id of the internal exception channel.
pub const EXCEPTION_PUBLISHER: &str = "internal/exception";

/// A subscriber failure, republished as an event.
#[derive(Clone)]
pub struct ExceptionEvent {
    /// Publisher id of the dispatch the failure happened in.
    pub origin: Arc<str>,
    /// The failing subscriber's identity.
    pub subscriber: SubscriberInfo,
    /// The failure itself.
    pub error: Arc<HandlerError>,
}

impl ExceptionEvent {
    /// Wraps a failure for republication.
    pub fn new(origin: Arc<str>, subscriber: SubscriberInfo, error: HandlerError) -> Self {
        Self {
            origin,
            subscriber,
            error: Arc::new(error),
        }
    }

    /// Renders the failure the way the stderr reporter prints it.
    pub fn render(&self) -> String {
        format!(
            "[{}] subscriber `{}` (#{}) failed: {}",
            self.origin, self.subscriber.name, self.subscriber.id, self.error
        )
    }
}

#[async_trait]
impl Event for ExceptionEvent {
    fn id() -> Arc<str> {
        Arc::from(EXCEPTION_PUBLISHER)
    }

    async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
        ctx.insert("origin", val(Arc::clone(&self.origin)));
        ctx.insert("subscriber", val(self.subscriber.clone()));
        ctx.insert("exception", val(Arc::clone(&self.error)));
        ctx.insert(ERROR, val(Arc::clone(&self.error)));
        Ok(())
    }
}

impl std::fmt::Debug for ExceptionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExceptionEvent({})", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gather_exposes_failure_attributes() {
        let ev = ExceptionEvent::new(
            Arc::from("$event:Demo"),
            SubscriberInfo {
                id: 3,
                name: Arc::from("handler"),
            },
            HandlerError::Failure("boom".into()),
        );
        let mut ctx = Context::new();
        ev.gather(&mut ctx).await.unwrap();
        assert!(ctx.contains("origin"));
        assert!(ctx.contains("subscriber"));
        assert!(ctx.contains("exception"));
        assert!(ctx.contains(ERROR));

        let err = ctx.get_as::<Arc<HandlerError>>("exception").unwrap();
        assert_eq!(err.as_label(), "handler_failure");
    }

    #[test]
    fn test_stable_publisher_id() {
        assert_eq!(&*<ExceptionEvent as Event>::id(), EXCEPTION_PUBLISHER);
    }
}
