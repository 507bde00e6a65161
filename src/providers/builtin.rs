//! Built-in providers: context-key lookup, fixed values, closures, selector
//! walks, and the reserved `ctx` / `event` / `subscriber` parameters.
//!
//! These cover the param-derived provider forms of the compiler: a string key
//! becomes a [`KeyProvider`], a [`Selector`] becomes a [`SelectorProvider`],
//! a closure becomes an [`FnProvider`], and an explicit value (defaults,
//! prepended provider instances) becomes a [`ValueProvider`].

use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{val, Context, CtxValue, EVENT, SUBSCRIBER};
use crate::error::HandlerError;
use crate::providers::{Provider, Supply, DEFAULT_PROVIDER_PRIORITY};
use crate::selector::Selector;
use crate::subscribers::Param;

/// Reserved providers run after everything user-supplied.
pub(crate) const RESERVED_PRIORITY: u32 = 30;

/// Supplies `ctx[key]` when present.
///
/// With [`required`](KeyProvider::required) set, an absent key raises
/// [`HandlerError::ProviderUnsatisfied`] instead of missing quietly.
pub struct KeyProvider {
    key: Arc<str>,
    for_param: Option<Arc<str>>,
    priority: u32,
    required: bool,
    expect: Option<Vec<TypeId>>,
}

impl KeyProvider {
    /// Provider over a context key, attached to whatever parameter lists it.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self {
            key: key.into(),
            for_param: None,
            priority: DEFAULT_PROVIDER_PRIORITY,
            required: false,
            expect: None,
        }
    }

    /// Restricts validation to parameters with the given name.
    pub fn for_param(mut self, name: impl Into<Arc<str>>) -> Self {
        self.for_param = Some(name.into());
        self
    }

    /// Overrides the provider priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Makes an absent key a hard `ProviderUnsatisfied` failure.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Only supplies values whose concrete type is one of `ids`.
    ///
    /// Used by the collector, where a synthetic key may hold a value of the
    /// wrong shape for this signature.
    pub(crate) fn expecting(mut self, ids: Vec<TypeId>) -> Self {
        self.expect = Some(ids);
        self
    }
}

#[async_trait]
impl Provider for KeyProvider {
    fn priority(&self) -> u32 {
        self.priority
    }

    fn validate(&self, param: &Param) -> bool {
        match &self.for_param {
            Some(name) => param.name() == &**name,
            None => true,
        }
    }

    async fn supply(&self, ctx: &Context) -> Result<Supply, HandlerError> {
        match ctx.get_cloned(&self.key) {
            Some(v) => {
                if let Some(expect) = &self.expect {
                    if !expect.contains(&(*v).type_id()) {
                        return Ok(Supply::Miss);
                    }
                }
                Ok(Supply::Value(v))
            }
            None if self.required => Err(HandlerError::ProviderUnsatisfied {
                param: self
                    .for_param
                    .as_deref()
                    .unwrap_or(&self.key)
                    .to_string(),
                key: self.key.to_string(),
            }),
            None => Ok(Supply::Miss),
        }
    }

    fn describe(&self) -> String {
        format!("key(`{}`)", self.key)
    }
}

/// Supplies a fixed value, optionally forced.
pub struct ValueProvider {
    value: CtxValue,
    priority: u32,
    forced: bool,
}

impl ValueProvider {
    /// Provider that always supplies `value`.
    pub fn new(value: CtxValue) -> Self {
        Self {
            value,
            priority: DEFAULT_PROVIDER_PRIORITY,
            forced: false,
        }
    }

    /// Supplies the value verbatim, `Nil` included.
    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    /// Overrides the provider priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl Provider for ValueProvider {
    fn priority(&self) -> u32 {
        self.priority
    }

    fn validate(&self, _param: &Param) -> bool {
        true
    }

    async fn supply(&self, _ctx: &Context) -> Result<Supply, HandlerError> {
        if self.forced {
            Ok(Supply::Force(self.value.clone()))
        } else {
            Ok(Supply::Value(self.value.clone()))
        }
    }

    fn describe(&self) -> String {
        "value(..)".to_string()
    }
}

/// Function-backed provider.
///
/// The closure receives a copy of the dispatch context and returns a
/// [`Supply`]; use [`provide`] for the common name-validated form.
pub struct FnProvider<F> {
    describe: String,
    priority: u32,
    validate: Box<dyn Fn(&Param) -> bool + Send + Sync>,
    f: F,
}

impl<F, Fut> FnProvider<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Supply, HandlerError>> + Send + 'static,
{
    /// Creates a provider from a validation closure and a supply closure.
    pub fn new<V>(describe: impl Into<String>, priority: u32, validate: V, f: F) -> Self
    where
        V: Fn(&Param) -> bool + Send + Sync + 'static,
    {
        Self {
            describe: describe.into(),
            priority,
            validate: Box::new(validate),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Provider for FnProvider<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Supply, HandlerError>> + Send + 'static,
{
    fn priority(&self) -> u32 {
        self.priority
    }

    fn validate(&self, param: &Param) -> bool {
        (self.validate)(param)
    }

    async fn supply(&self, ctx: &Context) -> Result<Supply, HandlerError> {
        (self.f)(ctx.clone()).await
    }

    fn describe(&self) -> String {
        self.describe.clone()
    }
}

/// Provider that replays a [`Selector`] recording per dispatch.
pub struct SelectorProvider {
    selector: Selector,
    priority: u32,
}

impl SelectorProvider {
    /// Wraps a selector recording.
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            priority: DEFAULT_PROVIDER_PRIORITY,
        }
    }
}

#[async_trait]
impl Provider for SelectorProvider {
    fn priority(&self) -> u32 {
        self.priority
    }

    fn validate(&self, _param: &Param) -> bool {
        true
    }

    async fn supply(&self, ctx: &Context) -> Result<Supply, HandlerError> {
        match self.selector.generate()(ctx) {
            Some(v) => Ok(Supply::Value(v)),
            None => Ok(Supply::Miss),
        }
    }

    fn describe(&self) -> String {
        format!("selector({:?})", self.selector)
    }
}

// ---- reserved parameters ----

/// Serves the reserved `ctx` / `context` parameter with a context snapshot.
pub struct CtxProvider;

#[async_trait]
impl Provider for CtxProvider {
    fn priority(&self) -> u32 {
        RESERVED_PRIORITY
    }

    fn validate(&self, param: &Param) -> bool {
        matches!(param.name(), "ctx" | "context")
    }

    async fn supply(&self, ctx: &Context) -> Result<Supply, HandlerError> {
        Ok(Supply::Value(val(ctx.clone())))
    }

    fn describe(&self) -> String {
        "reserved(ctx)".to_string()
    }
}

/// Serves the reserved `subscriber` parameter.
pub struct SubscriberProvider;

#[async_trait]
impl Provider for SubscriberProvider {
    fn priority(&self) -> u32 {
        RESERVED_PRIORITY
    }

    fn validate(&self, param: &Param) -> bool {
        param.name() == "subscriber"
    }

    async fn supply(&self, ctx: &Context) -> Result<Supply, HandlerError> {
        Ok(match ctx.get_cloned(SUBSCRIBER) {
            Some(v) => Supply::Value(v),
            None => Supply::Miss,
        })
    }

    fn describe(&self) -> String {
        "reserved(subscriber)".to_string()
    }
}

/// Serves the published event itself.
///
/// The unrestricted form validates the parameter named `event`; the compiler
/// additionally mints type-restricted instances for parameters whose declared
/// type is the registered event type.
pub struct EventProvider {
    accept: Option<TypeId>,
}

impl EventProvider {
    /// Serves the parameter literally named `event`.
    pub fn by_name() -> Self {
        Self { accept: None }
    }

    /// Serves parameters only when the published event has this concrete type.
    pub fn of_type(id: TypeId) -> Self {
        Self { accept: Some(id) }
    }
}

#[async_trait]
impl Provider for EventProvider {
    fn priority(&self) -> u32 {
        RESERVED_PRIORITY
    }

    fn validate(&self, param: &Param) -> bool {
        match self.accept {
            None => param.name() == "event",
            // Only explicitly declared types match; untyped params must ask
            // for the event by name.
            Some(id) => param.expect().names_type(id),
        }
    }

    async fn supply(&self, ctx: &Context) -> Result<Supply, HandlerError> {
        let Some(event) = ctx.get_cloned(EVENT) else {
            return Ok(Supply::Miss);
        };
        if let Some(id) = self.accept {
            if (*event).type_id() != id {
                return Ok(Supply::Miss);
            }
        }
        Ok(Supply::Value(event))
    }

    fn describe(&self) -> String {
        "reserved(event)".to_string()
    }
}

/// Ad-hoc provider validated by parameter name.
///
/// ## Example
/// ```rust
/// use eventvisor::{provide, Supply, val};
///
/// let p = provide("who", 20, |_ctx| async move {
///     Ok(Supply::Value(val(String::from("world"))))
/// });
/// ```
pub fn provide<F, Fut>(param_name: &str, priority: u32, f: F) -> Arc<dyn Provider>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Supply, HandlerError>> + Send + 'static,
{
    let name: Arc<str> = param_name.into();
    let validated = Arc::clone(&name);
    Arc::new(FnProvider::new(
        format!("provide(`{name}`)"),
        priority,
        move |param: &Param| param.name() == &*validated,
        f,
    ))
}

/// Ad-hoc provider returning `ctx[key]` for the named parameter.
pub fn provide_key(param_name: &str, key: &str) -> Arc<dyn Provider> {
    Arc::new(KeyProvider::new(key).for_param(param_name))
}
