//! # Parameter descriptors and the compiled per-parameter resolver.
//!
//! A [`Param`] is what a handler declares: a name, a type expectation, an
//! optional default, optional param-level providers (key lookup, selector,
//! derived closure, explicit instances) and an optional [`Depends`] node.
//!
//! Compilation ([`CompiledParam::compile`]) runs each candidate provider's
//! `validate` once, collects acceptors across the layered sources
//! (param-level first, then handler / event-type / registration /
//! scope+global layers, then factory-minted), and sorts them by priority
//! ascending (stable, so layer order breaks ties). The result carries a
//! single-slot memo of the most recently successful provider.
//!
//! ## Resolution rule
//! For each parameter, in order:
//! 1. the context contains `param.name` → that value wins;
//! 2. the parameter is dependent → resolve the inner subscriber;
//! 3. the memoized provider supplies → its result (unwrapping `Force`);
//! 4. providers in priority order; first hit wins and updates the memo;
//! 5. the default, if any;
//! 6. otherwise *unresolved-requirement*.
//!
//! Resolution is deterministic given a fixed provider order and memo state,
//! and idempotent for identical inputs.

use std::any::{type_name, Any, TypeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::{Context, CtxValue};
use crate::error::HandlerError;
use crate::providers::{Provider, ProviderFactory};
use crate::selector::Selector;
use crate::subscribers::depends::{CompiledDepend, Depends};

/// Declared type expectation of a parameter.
#[derive(Clone)]
pub enum TypeExpect {
    /// No declared type; anything matches.
    Any,
    /// One concrete type.
    Exact {
        /// The expected `TypeId`.
        id: TypeId,
        /// Its rendered name, for diagnostics.
        name: &'static str,
    },
    /// A union of alternatives; any of them matches.
    Union(Vec<(TypeId, &'static str)>),
    /// An optional wrapper; `Nil` also matches.
    Optional(Box<TypeExpect>),
}

impl TypeExpect {
    /// Expectation for one concrete type.
    pub fn of<T: 'static>() -> Self {
        TypeExpect::Exact {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Widens the expectation with another alternative.
    pub fn or<T: 'static>(self) -> Self {
        let alt = (TypeId::of::<T>(), type_name::<T>());
        match self {
            TypeExpect::Any => TypeExpect::Any,
            TypeExpect::Exact { id, name } => TypeExpect::Union(vec![(id, name), alt]),
            TypeExpect::Union(mut alts) => {
                if !alts.iter().any(|(id, _)| *id == alt.0) {
                    alts.push(alt);
                }
                TypeExpect::Union(alts)
            }
            TypeExpect::Optional(inner) => TypeExpect::Optional(Box::new(inner.or::<T>())),
        }
    }

    /// True when a value of the given concrete type satisfies the expectation.
    pub fn accepts_type(&self, id: TypeId) -> bool {
        match self {
            TypeExpect::Any => true,
            TypeExpect::Exact { id: want, .. } => *want == id,
            TypeExpect::Union(alts) => alts.iter().any(|(want, _)| *want == id),
            TypeExpect::Optional(inner) => {
                id == TypeId::of::<crate::context::Nil>() || inner.accepts_type(id)
            }
        }
    }

    /// True when the value's concrete type satisfies the expectation.
    pub fn accepts(&self, v: &CtxValue) -> bool {
        self.accepts_type((**v).type_id())
    }

    /// Like [`accepts_type`](TypeExpect::accepts_type), but an undeclared
    /// type names nothing. Used where a match must be explicit (the typed
    /// event provider, collector indexing).
    pub fn names_type(&self, id: TypeId) -> bool {
        match self {
            TypeExpect::Any => false,
            TypeExpect::Optional(inner) => inner.names_type(id),
            other => other.accepts_type(id),
        }
    }

    /// All concrete alternatives, for exact-type indexing (unions expanded).
    pub(crate) fn alternatives(&self) -> Vec<TypeId> {
        match self {
            TypeExpect::Any => Vec::new(),
            TypeExpect::Exact { id, .. } => vec![*id],
            TypeExpect::Union(alts) => alts.iter().map(|(id, _)| *id).collect(),
            TypeExpect::Optional(inner) => inner.alternatives(),
        }
    }

    /// Rendered form used in parameter signatures.
    pub fn render(&self) -> String {
        match self {
            TypeExpect::Any => "_".to_string(),
            TypeExpect::Exact { name, .. } => (*name).to_string(),
            TypeExpect::Union(alts) => alts
                .iter()
                .map(|(_, n)| *n)
                .collect::<Vec<_>>()
                .join(" | "),
            TypeExpect::Optional(inner) => format!("Option<{}>", inner.render()),
        }
    }
}

impl std::fmt::Debug for TypeExpect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// A declared handler parameter.
#[derive(Clone)]
pub struct Param {
    name: Arc<str>,
    expect: TypeExpect,
    default: Option<CtxValue>,
    providers: Vec<Arc<dyn Provider>>,
    depends: Option<Depends>,
}

impl Param {
    /// Untyped parameter; any value satisfies it.
    pub fn any(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            expect: TypeExpect::Any,
            default: None,
            providers: Vec::new(),
            depends: None,
        }
    }

    /// Parameter declared with one concrete type.
    pub fn of<T: 'static>(name: impl Into<Arc<str>>) -> Self {
        let mut p = Self::any(name);
        p.expect = TypeExpect::of::<T>();
        p
    }

    /// Widens the declared type with another union alternative.
    pub fn or<T: 'static>(mut self) -> Self {
        self.expect = self.expect.or::<T>();
        self
    }

    /// Marks the declared type optional (`Nil` satisfies it).
    pub fn optional(mut self) -> Self {
        self.expect = TypeExpect::Optional(Box::new(self.expect));
        self
    }

    /// Sets a default used when no provider supplies the parameter.
    pub fn default_value<T: Send + Sync + 'static>(mut self, v: T) -> Self {
        self.default = Some(crate::context::val(v));
        self
    }

    /// Derives the parameter from a plain context key.
    pub fn from_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.providers
            .push(Arc::new(crate::providers::KeyProvider::new(key)));
        self
    }

    /// Derives the parameter from a selector walk.
    pub fn via(mut self, selector: Selector) -> Self {
        self.providers
            .push(Arc::new(crate::providers::SelectorProvider::new(selector)));
        self
    }

    /// Attaches an explicit provider instance (highest precedence).
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Marks the parameter dependency-injected.
    pub fn depends(mut self, depends: Depends) -> Self {
        self.depends = Some(depends);
        self
    }

    /// The declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared type expectation.
    pub fn expect(&self) -> &TypeExpect {
        &self.expect
    }

    /// The declared default, if any.
    pub fn default(&self) -> Option<&CtxValue> {
        self.default.as_ref()
    }

    /// Whether the parameter is dependency-injected.
    pub fn is_dependent(&self) -> bool {
        self.depends.is_some()
    }

    /// Textual signature used in unresolved-requirement reports.
    pub fn signature(&self) -> String {
        format!("{}: {}", self.name, self.expect.render())
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Param({})", self.signature())
    }
}

/// Memo sentinel: no provider has succeeded yet.
const MEMO_UNSET: usize = usize::MAX;

/// A parameter after compilation: ordered providers plus the hot-path memo.
pub struct CompiledParam {
    param: Param,
    providers: Vec<Arc<dyn Provider>>,
    depend: Option<Arc<CompiledDepend>>,
    memo: AtomicUsize,
}

impl CompiledParam {
    /// Compiles a parameter against the layered provider sources.
    ///
    /// `layers` are ordered highest-precedence first (handler, event type,
    /// registration, scope + global); `factories` mint extra providers when
    /// they recognize the parameter. Param-level providers come first; the
    /// final list is priority-sorted with a stable sort so layer order breaks
    /// ties.
    pub(crate) fn compile(
        param: Param,
        layers: &[&[Arc<dyn Provider>]],
        factories: &[Arc<dyn ProviderFactory>],
    ) -> Self {
        let mut providers: Vec<Arc<dyn Provider>> = param.providers.clone();
        for layer in layers {
            for p in *layer {
                if p.validate(&param) {
                    providers.push(Arc::clone(p));
                }
            }
        }
        for factory in factories {
            if let Some(p) = factory.provide(&param) {
                providers.push(p);
            }
        }
        providers.sort_by_key(|p| p.priority());

        let depend = param.depends.clone().map(|d| {
            Arc::new(CompiledDepend::compile(d, layers, factories))
        });

        Self {
            param,
            providers,
            depend,
            memo: AtomicUsize::new(MEMO_UNSET),
        }
    }

    /// The declared parameter.
    pub fn param(&self) -> &Param {
        &self.param
    }

    /// Number of accepted providers (diagnostics).
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Resolves the parameter against one dispatch's context.
    pub(crate) async fn resolve(&self, ctx: &Context) -> Result<CtxValue, HandlerError> {
        // 1. Direct context hit by name.
        if let Some(v) = ctx.get_cloned(self.param.name()) {
            return Ok(v);
        }

        // 2. Dependency-injected parameter.
        if let Some(depend) = &self.depend {
            return depend.resolve(ctx).await;
        }

        // 3. Hot path: the most recently successful provider.
        let memo = self.memo.load(Ordering::Relaxed);
        if memo != MEMO_UNSET {
            if let Some(p) = self.providers.get(memo) {
                if let Some(v) = p.supply(ctx).await?.into_hit() {
                    return Ok(v);
                }
            }
        }

        // 4. Full scan in priority order.
        for (i, p) in self.providers.iter().enumerate() {
            if i == memo {
                continue;
            }
            if let Some(v) = p.supply(ctx).await?.into_hit() {
                self.memo.store(i, Ordering::Relaxed);
                return Ok(v);
            }
        }

        // 5. Declared default.
        if let Some(d) = &self.param.default {
            return Ok(d.clone());
        }

        // 6. Unresolved.
        Err(HandlerError::UnresolvedRequirement {
            param: self.param.signature(),
            providers: self.providers.iter().map(|p| p.describe()).collect(),
            snapshot: ctx.snapshot(),
        })
    }
}

impl std::fmt::Debug for CompiledParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CompiledParam({}, {} providers)",
            self.param.signature(),
            self.providers.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{nil, val};
    use crate::providers::{KeyProvider, ValueProvider};

    fn compiled(param: Param, layer: Vec<Arc<dyn Provider>>) -> CompiledParam {
        CompiledParam::compile(param, &[&layer], &[])
    }

    #[tokio::test]
    async fn test_context_name_wins_over_providers() {
        let mut ctx = Context::new();
        ctx.insert("foo", val(1_i32));
        let cp = compiled(
            Param::of::<i32>("foo"),
            vec![Arc::new(ValueProvider::new(val(2_i32)))],
        );
        let v = cp.resolve(&ctx).await.unwrap();
        assert_eq!(*v.downcast::<i32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_priority_order_decides_first_hit() {
        let ctx = Context::new();
        let cp = compiled(
            Param::any("x"),
            vec![
                Arc::new(ValueProvider::new(val(10_i32)).priority(25)),
                Arc::new(ValueProvider::new(val(20_i32)).priority(5)),
            ],
        );
        let v = cp.resolve(&ctx).await.unwrap();
        assert_eq!(*v.downcast::<i32>().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_memo_skips_earlier_misses() {
        let mut ctx = Context::new();
        ctx.insert("src", val(7_i32));
        let cp = compiled(
            Param::any("x"),
            vec![
                Arc::new(KeyProvider::new("absent").priority(1)),
                Arc::new(KeyProvider::new("src").priority(2)),
            ],
        );
        // First resolution scans and memoizes the hit.
        let first = cp.resolve(&ctx).await.unwrap();
        assert_eq!(*first.downcast::<i32>().unwrap(), 7);
        assert_eq!(cp.memo.load(Ordering::Relaxed), 1);
        // Second resolution is served by the memo and stays identical.
        let second = cp.resolve(&ctx).await.unwrap();
        assert_eq!(*second.downcast::<i32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_default_then_unresolved() {
        let ctx = Context::new();
        let with_default = compiled(Param::any("x").default_value(3_i32), vec![]);
        let v = with_default.resolve(&ctx).await.unwrap();
        assert_eq!(*v.downcast::<i32>().unwrap(), 3);

        let bare = compiled(Param::of::<i32>("x"), vec![]);
        match bare.resolve(&ctx).await {
            Err(HandlerError::UnresolvedRequirement { param, .. }) => {
                assert_eq!(param, "x: i32");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_nil_misses_forced_nil_hits() {
        let ctx = Context::new();
        let missed = compiled(
            Param::any("x").default_value(9_i32),
            vec![Arc::new(ValueProvider::new(nil()))],
        );
        // Nil supply is a miss, so the default applies.
        let v = missed.resolve(&ctx).await.unwrap();
        assert_eq!(*v.downcast::<i32>().unwrap(), 9);

        let forced = compiled(
            Param::any("x").default_value(9_i32),
            vec![Arc::new(ValueProvider::new(nil()).forced())],
        );
        let v = forced.resolve(&ctx).await.unwrap();
        assert!(crate::context::is_nil(&v));
    }

    #[test]
    fn test_union_expansion_and_matching() {
        let expect = TypeExpect::of::<i32>().or::<String>();
        assert!(expect.accepts_type(TypeId::of::<i32>()));
        assert!(expect.accepts_type(TypeId::of::<String>()));
        assert!(!expect.accepts_type(TypeId::of::<bool>()));
        assert_eq!(expect.alternatives().len(), 2);
    }
}
