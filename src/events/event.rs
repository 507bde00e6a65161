//! # Event traits: tagged events and their type-erased form.
//!
//! A *tagged* event is any type implementing [`Event`]: it advertises a
//! deterministic publisher id (derived from the type path unless overridden)
//! and an async `gather` that writes its attributes into the dispatch
//! context under their own names. *External* events (arbitrary values) skip
//! this trait and are routed through publishers registered with
//! [`EventBus::define`](crate::EventBus::define).
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use eventvisor::{val, Context, Event, HandlerError};
//!
//! struct TestEvent {
//!     foo: String,
//!     bar: String,
//! }
//!
//! #[async_trait]
//! impl Event for TestEvent {
//!     async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
//!         ctx.insert("foo", val(self.foo.clone()));
//!         ctx.insert("bar", val(self.bar.clone()));
//!         Ok(())
//!     }
//! }
//! ```

use std::any::TypeId;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, CtxValue};
use crate::error::HandlerError;
use crate::providers::Provider;

/// Publisher id of subscribers not tied to any event.
pub const BACKEND_PUBLISHER: &str = "$backend";

/// A tagged event type.
#[async_trait]
pub trait Event: Send + Sync + 'static {
    /// Deterministic publisher id; defaults to `$event:<type_path>`.
    fn id() -> Arc<str>
    where
        Self: Sized,
    {
        Arc::from(format!("$event:{}", std::any::type_name::<Self>()))
    }

    /// Writes the event's attributes into the dispatch context, each under
    /// its own name.
    async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError>;

    /// Providers declared on the event type, inherited by every subscriber
    /// of its publisher.
    fn providers() -> Vec<Arc<dyn Provider>>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Validates a first-result value for `post` mode.
    fn check_result(_value: &CtxValue) -> bool
    where
        Self: Sized,
    {
        true
    }
}

/// Object-safe view of a tagged event used by the dispatch engine.
#[async_trait]
pub trait AnyEvent: Send + Sync + 'static {
    /// The publisher id this event is tagged with.
    fn publisher_id(&self) -> Arc<str>;

    /// The concrete event type.
    fn event_type(&self) -> TypeId;

    /// Writes the event's attributes into the context.
    async fn write_attrs(&self, ctx: &mut Context) -> Result<(), HandlerError>;

    /// The event as a context value (`$event` slot).
    fn as_value(self: Arc<Self>) -> CtxValue;

    /// The event type's first-result validator.
    fn validate_result(&self, value: &CtxValue) -> bool;
}

#[async_trait]
impl<T: Event> AnyEvent for T {
    fn publisher_id(&self) -> Arc<str> {
        T::id()
    }

    fn event_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    async fn write_attrs(&self, ctx: &mut Context) -> Result<(), HandlerError> {
        self.gather(ctx).await
    }

    fn as_value(self: Arc<Self>) -> CtxValue {
        self
    }

    fn validate_result(&self, value: &CtxValue) -> bool {
        T::check_result(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;

    struct Demo {
        n: i32,
    }

    #[async_trait]
    impl Event for Demo {
        async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
            ctx.insert("n", val(self.n));
            Ok(())
        }
    }

    #[test]
    fn test_default_id_is_deterministic() {
        assert_eq!(&*Demo::id(), &*Demo::id());
        assert!(Demo::id().starts_with("$event:"));
        assert!(Demo::id().ends_with("Demo"));
    }

    #[tokio::test]
    async fn test_gather_roundtrip() {
        let ev = Demo { n: 7 };
        let mut ctx = Context::new();
        ev.gather(&mut ctx).await.unwrap();
        assert_eq!(*ctx.get_as::<i32>("n").unwrap(), 7);
    }

    #[tokio::test]
    async fn test_any_event_preserves_identity() {
        let ev: Arc<dyn AnyEvent> = Arc::new(Demo { n: 1 });
        assert_eq!(ev.publisher_id(), Demo::id());
        assert_eq!(ev.event_type(), TypeId::of::<Demo>());
        let raw = ev.as_value();
        assert_eq!(raw.downcast::<Demo>().unwrap().n, 1);
    }
}
