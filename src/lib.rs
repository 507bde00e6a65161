//! # eventvisor
//!
//! **Eventvisor** is an in-process, asynchronous event bus with injected
//! subscriber parameters.
//!
//! Producers publish typed events; subscribers (handlers declared with named
//! parameter descriptors) receive them after a resolver injects the
//! parameters they ask for. The engine fans out across subscribers, orders
//! them by priority, resolves parameters from a layered provider registry,
//! supports short-circuit (`Stop`) and blocking (`Block`) outcomes, routes
//! failures through an exception channel, and offers a breakpoint facility
//! ([`StepOut`]) that lets one handler suspend until a later event satisfies
//! a condition.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  publish(TestEvent)        publish_external((2, "2"))
//!        │                            │
//!        ▼                            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  EventBus (runtime handle)                                        │
//! │  - PublisherRegistry (tagged ids + structural predicates)         │
//! │  - Scopes ($global + named, enable/disable)                       │
//! │  - Global providers / factories                                   │
//! │  - TaskTracker + CancellationToken (lifecycle)                    │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        │ one gathered Context per matched publisher
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Dispatch engine                                                  │
//! │  buckets: (priority, publisher) ── ascending ──────────────┐      │
//! │    p=8   [sub, sub]      ── join_all (concurrent cohort)   │      │
//! │    p=16  [sub, sub, sub] ── join_all                       ▼      │
//! │  outcomes in registration order:                                  │
//! │    Nothing / Stop / Block / Value(first-result) / failure         │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        │ failure
//!        ▼
//!   ExceptionEvent ──► internal/exception ──► subscribers that opted in
//! ```
//!
//! ### One subscriber invocation
//! ```text
//! ctx copy ──► pre-propagators ──► parameter resolution ──► body ──► post
//!                │ Merge seeds ctx       │ name hit              │ $result
//!                │ Stop/Block halt       │ Depends (cached)      │ transform
//!                                        │ memo → providers      │ Stop/Block
//!                                        │ default → unresolved
//! cleanup stack drains on every exit path (value/stop/block/error)
//! ```
//!
//! ## Features
//! | Area | Description | Key types / traits |
//! |---|---|---|
//! | **Events** | Tagged event types with deterministic publisher ids and gathered attributes. | [`Event`], [`Publisher`] |
//! | **Subscribers** | Handlers with declared params, priorities, propagators. | [`Handle`], [`HandlerFn`], [`Param`] |
//! | **Providers** | Layered per-parameter value sources with a hot-path memo. | [`Provider`], [`ProviderFactory`] |
//! | **Dependencies** | Handler-valued defaults resolved at injection time. | [`Depends`] |
//! | **Scopes** | Named, enable-able subscriber buckets. | [`Scope`] |
//! | **Control flow** | Stop a chain or block a dispatch, return or raise. | [`Flow`], [`ExitFlow`] |
//! | **Breakpoints** | Wait inside a handler for a later matching event. | [`StepOut`] |
//! | **Overloading** | Many signatures behind one synthetic publisher. | [`CollectGroup`] |
//! | **Errors** | Typed runtime/handler errors with stable labels. | [`BusError`], [`HandlerError`] |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use eventvisor::{
//!     val, Args, Context, Event, EventBus, Flow, HandlerError, HandlerFn, Param,
//! };
//!
//! struct Greet {
//!     name: String,
//! }
//!
//! #[async_trait]
//! impl Event for Greet {
//!     async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
//!         ctx.insert("name", val(self.name.clone()));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::default();
//!
//!     bus.on::<Greet>(HandlerFn::arc(
//!         "greeter",
//!         vec![Param::of::<String>("name")],
//!         |args: Args| async move {
//!             println!("hello, {}!", args.get::<String>("name")?);
//!             Ok(Flow::Nothing)
//!         },
//!     ))
//!     .attach()?;
//!
//!     bus.publish(Greet { name: "world".into() }).join().await;
//!     bus.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod breakpoint;
mod collector;
mod context;
mod core;
mod error;
mod events;
mod flow;
mod providers;
mod scopes;
mod selector;
mod subscribers;

// ---- Public re-exports ----

pub use breakpoint::{StepIter, StepOut};
pub use collector::{ArgList, CollectGroup, FieldMap};
pub use context::{
    cast, is_nil, nil, val, CleanupStack, Context, CtxValue, Nil, CLEANUP, DEPEND_CACHE, ERROR,
    EVENT, RESULT, SUBSCRIBER,
};
pub use crate::core::{BusConfig, DispatchHandle, EventBus, PostHandle};
pub use error::{BusError, HandlerError};
pub use events::{
    AnyEvent, CheckGate, Event, ExceptionEvent, Fetch, FetchFn, Gather, GatherFn, Predicate,
    Publisher, ResultCheck, BACKEND_PUBLISHER, EXCEPTION_PUBLISHER,
};
pub use flow::{ExitFlow, Flow};
pub use providers::{
    provide, provide_key, CtxProvider, EventProvider, FactoryFn, FnProvider, KeyProvider,
    Provider, ProviderFactory, SelectorProvider, SubscriberProvider, Supply, ValueProvider,
    DEFAULT_PROVIDER_PRIORITY,
};
pub use scopes::{Scope, GLOBAL_SCOPE};
pub use selector::Selector;
pub use subscribers::{
    Args, CompiledParam, Depends, Direction, Handle, HandlerFn, Param, Propagate, PropagateFn,
    RegisterBuilder, Spread, Subscriber, SubscriberInfo, Target, TypeExpect,
};

// Optional: expose the simple built-in exception logger.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
