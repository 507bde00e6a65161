//! # Handler abstraction and function-backed handlers.
//!
//! A [`Handle`] is what subscribers run: it declares its parameters
//! ([`Handle::params`]) and consumes the resolved [`Args`]. The common
//! implementation is [`HandlerFn`], wrapping a closure
//! `F: Fn(Args) -> Fut`, producing a fresh future per invocation so no
//! state is shared between dispatches unless the closure captures it
//! explicitly.
//!
//! ## Example
//! ```rust
//! use eventvisor::{Args, Flow, HandlerFn, Param};
//!
//! let greet = HandlerFn::arc(
//!     "greet",
//!     vec![Param::of::<String>("foo"), Param::of::<String>("bar")],
//!     |args: Args| async move {
//!         let foo = args.get::<String>("foo")?;
//!         let bar = args.get::<String>("bar")?;
//!         Ok(Flow::value(format!("{foo}/{bar}")))
//!     },
//! );
//! assert_eq!(greet.name(), "greet");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{type_label, CleanupStack, CtxValue};
use crate::error::HandlerError;
use crate::flow::Flow;
use crate::providers::Provider;
use crate::subscribers::param::Param;

/// Resolved arguments handed to a handler body.
///
/// Values are shared handles; typed access goes through [`Args::get`].
/// Handlers that acquire scoped resources register teardown via
/// [`Args::defer`]; the engine drains those cleanups on every exit path.
pub struct Args {
    values: Vec<(Arc<str>, CtxValue)>,
    cleanup: CleanupStack,
}

impl Args {
    pub(crate) fn new(values: Vec<(Arc<str>, CtxValue)>, cleanup: CleanupStack) -> Self {
        Self { values, cleanup }
    }

    /// Typed access to a resolved parameter.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, HandlerError> {
        let v = self.raw(name).ok_or_else(|| {
            HandlerError::Failure(format!("no resolved argument named `{name}`"))
        })?;
        Arc::clone(v)
            .downcast::<T>()
            .map_err(|_| HandlerError::TypeMismatch {
                param: name.to_string(),
                expected: std::any::type_name::<T>(),
                actual: type_label(v),
            })
    }

    /// Typed access that misses quietly.
    pub fn opt<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.raw(name)
            .and_then(|v| Arc::clone(v).downcast::<T>().ok())
    }

    /// The raw type-erased value, when present.
    pub fn raw(&self, name: &str) -> Option<&CtxValue> {
        self.values
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, v)| v)
    }

    /// True when the named argument resolved.
    pub fn contains(&self, name: &str) -> bool {
        self.raw(name).is_some()
    }

    /// Registers an async cleanup drained when the invocation exits
    /// (value, stop, block, error — every path).
    pub fn defer<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cleanup.push(f);
    }
}

/// A subscriber body: declared parameters plus the async call.
#[async_trait]
pub trait Handle: Send + Sync + 'static {
    /// Stable handler name used in logs and exception events.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose —
    /// override it when possible.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The declared parameter list, inspected once at registration.
    fn params(&self) -> &[Param];

    /// Providers bound to the handler itself (highest provider layer).
    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        Vec::new()
    }

    /// Runs the body with resolved arguments.
    async fn handle(&self, args: Args) -> Result<Flow, HandlerError>;
}

/// Function-backed handler.
///
/// Wraps a closure that creates a new future per invocation.
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    params: Vec<Param>,
    providers: Vec<Arc<dyn Provider>>,
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new function-backed handler.
    ///
    /// Prefer [`HandlerFn::arc`] when you immediately need an
    /// `Arc<dyn Handle>`.
    pub fn new(name: impl Into<Cow<'static, str>>, params: Vec<Param>, f: F) -> Self {
        Self {
            name: name.into(),
            params,
            providers: Vec::new(),
            f,
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, params: Vec<Param>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, params, f))
    }

    /// Binds a provider to the handler itself (highest provider layer).
    pub fn bind(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }
}

#[async_trait]
impl<F, Fut> Handle for HandlerFn<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Flow, HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.clone()
    }

    async fn handle(&self, args: Args) -> Result<Flow, HandlerError> {
        (self.f)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;

    fn args(pairs: Vec<(&str, CtxValue)>) -> Args {
        Args::new(
            pairs.into_iter().map(|(n, v)| (Arc::from(n), v)).collect(),
            CleanupStack::new(),
        )
    }

    #[tokio::test]
    async fn test_typed_access_and_mismatch() {
        let a = args(vec![("n", val(5_i32))]);
        assert_eq!(*a.get::<i32>("n").unwrap(), 5);
        match a.get::<String>("n") {
            Err(HandlerError::TypeMismatch { param, actual, .. }) => {
                assert_eq!(param, "n");
                assert_eq!(actual, "i32");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(a.get::<i32>("absent").is_err());
        assert!(a.opt::<i32>("absent").is_none());
    }

    #[tokio::test]
    async fn test_handler_fn_invokes_body() {
        let h = HandlerFn::arc(
            "sum",
            vec![Param::of::<i32>("a"), Param::of::<i32>("b")],
            |args: Args| async move {
                let a = *args.get::<i32>("a")?;
                let b = *args.get::<i32>("b")?;
                Ok(Flow::value(a + b))
            },
        );
        assert_eq!(h.params().len(), 2);
        let out = h
            .handle(args(vec![("a", val(2_i32)), ("b", val(3_i32))]))
            .await
            .unwrap();
        let v = out.into_value().unwrap();
        assert_eq!(*v.downcast::<i32>().unwrap(), 5);
    }
}
