//! # Propagators: pre/post hooks around a subscriber body.
//!
//! A propagator runs in the same dispatch as the subscriber it wraps, either
//! **before** the body (participating in parameter seeding) or **after** it
//! (observing and transforming the result slot).
//!
//! ## Rules
//! - A pre-propagator returning [`Spread::Merge`] seeds the context before
//!   parameter resolution.
//! - A pre-propagator returning [`Spread::Stop`] halts the subscriber: the
//!   result is `Stop` and post-propagators are skipped.
//! - Post-propagators see the result in `ctx[$result]`; [`Spread::Value`]
//!   replaces it, `Stop`/`Block` escalate.
//! - [`defer`](crate::Subscriber::defer) registers a one-shot post-propagator
//!   removed after its first run.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, CtxValue};
use crate::error::HandlerError;

/// Where a propagator runs relative to the subscriber body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Before parameter resolution (may seed the context).
    Before,
    /// After the body (may transform the result).
    After,
}

/// Effect of one propagator run.
#[derive(Clone)]
pub enum Spread {
    /// No effect.
    Nothing,
    /// Merge these pairs into the context (pre-propagators).
    Merge(Vec<(Arc<str>, CtxValue)>),
    /// Replace the subscriber result (post-propagators).
    Value(CtxValue),
    /// Halt the subscriber's chain.
    Stop,
    /// Halt the whole dispatch.
    Block,
}

impl std::fmt::Debug for Spread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Spread::Nothing => write!(f, "Spread::Nothing"),
            Spread::Merge(pairs) => write!(f, "Spread::Merge({} keys)", pairs.len()),
            Spread::Value(_) => write!(f, "Spread::Value(..)"),
            Spread::Stop => write!(f, "Spread::Stop"),
            Spread::Block => write!(f, "Spread::Block"),
        }
    }
}

/// A pre- or post-hook on a subscriber.
#[async_trait]
pub trait Propagate: Send + Sync + 'static {
    /// Which side of the body this hook runs on.
    fn direction(&self) -> Direction;

    /// One-shot hooks are detached after their first run.
    fn once(&self) -> bool {
        false
    }

    /// Runs the hook against the invocation's context.
    async fn apply(&self, ctx: &mut Context) -> Result<Spread, HandlerError>;
}

/// Function-backed propagator.
///
/// The closure receives a copy of the context; mutations travel back through
/// the returned [`Spread`].
pub struct PropagateFn<F> {
    direction: Direction,
    once: bool,
    f: F,
}

impl<F, Fut> PropagateFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Spread, HandlerError>> + Send + 'static,
{
    /// Pre-propagator from a closure.
    pub fn before(f: F) -> Self {
        Self {
            direction: Direction::Before,
            once: false,
            f,
        }
    }

    /// Post-propagator from a closure.
    pub fn after(f: F) -> Self {
        Self {
            direction: Direction::After,
            once: false,
            f,
        }
    }

    /// One-shot post-propagator, detached after its first run.
    pub fn after_once(f: F) -> Self {
        Self {
            direction: Direction::After,
            once: true,
            f,
        }
    }

    /// Returns the propagator as a shared handle.
    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl<F, Fut> Propagate for PropagateFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Spread, HandlerError>> + Send + 'static,
{
    fn direction(&self) -> Direction {
        self.direction
    }

    fn once(&self) -> bool {
        self.once
    }

    async fn apply(&self, ctx: &mut Context) -> Result<Spread, HandlerError> {
        (self.f)(ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;

    #[tokio::test]
    async fn test_merge_travels_back() {
        let p = PropagateFn::before(|_ctx| async {
            Ok(Spread::Merge(vec![(Arc::from("seed"), val(1_i32))]))
        });
        let mut ctx = Context::new();
        match p.apply(&mut ctx).await.unwrap() {
            Spread::Merge(pairs) => assert_eq!(pairs.len(), 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_once_flag() {
        let p = PropagateFn::after_once(|_ctx| async { Ok(Spread::Nothing) });
        assert!(p.once());
        assert_eq!(p.direction(), Direction::After);
    }
}
