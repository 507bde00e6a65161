//! Subscribers: declared parameters, compiled resolvers, handlers,
//! propagators, and the registration builder.
//!
//! ## Contents
//! - [`Param`], [`TypeExpect`], [`CompiledParam`] — the parameter compiler
//! - [`Depends`] — dependency-injected defaults
//! - [`Handle`], [`HandlerFn`], [`Args`] — subscriber bodies
//! - [`Propagate`], [`PropagateFn`], [`Spread`] — pre/post hooks
//! - [`Subscriber`], [`SubscriberInfo`] — the compiled, bound unit
//! - [`RegisterBuilder`] — the fluent attach chain

mod depends;
mod handler;
mod param;
mod propagator;
mod register;
#[allow(clippy::module_inception)]
mod subscriber;

#[cfg(feature = "logging")]
mod log;

pub use depends::Depends;
pub use handler::{Args, Handle, HandlerFn};
pub use param::{CompiledParam, Param, TypeExpect};
pub use propagator::{Direction, Propagate, PropagateFn, Spread};
pub use register::{RegisterBuilder, Target};
pub use subscriber::{Subscriber, SubscriberInfo};
pub(crate) use subscriber::panic_message;

#[cfg(feature = "logging")]
pub use log::LogWriter;
