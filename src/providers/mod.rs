//! Parameter value sources.
//!
//! ## Contents
//! - [`Provider`], [`Supply`] — the per-parameter capability contract
//! - [`ProviderFactory`], [`FactoryFn`] — runtime-inspected provider minting
//! - built-ins: [`KeyProvider`], [`ValueProvider`], [`FnProvider`],
//!   [`SelectorProvider`], the reserved `ctx`/`event`/`subscriber` providers,
//!   and the [`provide`] / [`provide_key`] ad-hoc constructors

mod builtin;
mod factory;
mod provider;

pub use builtin::{
    provide, provide_key, CtxProvider, EventProvider, FnProvider, KeyProvider, SelectorProvider,
    SubscriberProvider, ValueProvider,
};
pub(crate) use builtin::RESERVED_PRIORITY;
pub use factory::{FactoryFn, ProviderFactory};
pub use provider::{Provider, Supply, DEFAULT_PROVIDER_PRIORITY};
