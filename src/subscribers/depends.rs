//! # Depends: dependency-injected parameter defaults.
//!
//! A [`Depends`] wraps another handler; the parameter it defaults is resolved
//! at injection time by compiling that handler into an inner subscriber with
//! the **same** provider layers as the outer one, invoking it against the
//! same dispatch context.
//!
//! With [`Depends::cached`], the result is memoized in the per-dispatch
//! dependency cache keyed by handler identity, so every parameter defaulting
//! to the same handler observes one invocation per dispatch.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::{nil, Context, CtxValue};
use crate::error::HandlerError;
use crate::flow::{ExitFlow, Flow};
use crate::providers::{Provider, ProviderFactory};
use crate::subscribers::handler::{Args, Handle};
use crate::subscribers::param::CompiledParam;

/// Marks a parameter as dependency-injected.
#[derive(Clone)]
pub struct Depends {
    handler: Arc<dyn Handle>,
    cache: bool,
}

impl Depends {
    /// Dependency on the given handler, uncached.
    pub fn new(handler: Arc<dyn Handle>) -> Self {
        Self {
            handler,
            cache: false,
        }
    }

    /// Memoizes the result per dispatch, keyed by handler identity.
    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    /// Whether the dependency result is memoized per dispatch.
    pub fn is_cached(&self) -> bool {
        self.cache
    }
}

impl std::fmt::Debug for Depends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Depends({}, cache={})",
            self.handler.name(),
            self.cache
        )
    }
}

/// A dependency compiled against the outer subscriber's provider layers.
pub(crate) struct CompiledDepend {
    handler: Arc<dyn Handle>,
    cache: bool,
    params: Vec<CompiledParam>,
}

impl CompiledDepend {
    /// Compiles the wrapped handler's parameters with the outer layers.
    pub(crate) fn compile(
        depends: Depends,
        layers: &[&[Arc<dyn Provider>]],
        factories: &[Arc<dyn ProviderFactory>],
    ) -> Self {
        let params = depends
            .handler
            .params()
            .iter()
            .cloned()
            .map(|p| CompiledParam::compile(p, layers, factories))
            .collect();
        Self {
            handler: depends.handler,
            cache: depends.cache,
            params,
        }
    }

    /// Identity key for the per-dispatch cache.
    fn cache_key(&self) -> usize {
        Arc::as_ptr(&self.handler) as *const () as usize
    }

    /// Resolves the dependency against the dispatch context.
    ///
    /// Boxed because dependency parameters may themselves be dependent.
    pub(crate) fn resolve<'a>(
        &'a self,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<CtxValue, HandlerError>> {
        Box::pin(async move {
            let cache = if self.cache { ctx.depend_cache() } else { None };
            if let Some(cache) = &cache {
                let hit = cache
                    .lock()
                    .expect("depend cache poisoned")
                    .get(&self.cache_key())
                    .cloned();
                if let Some(v) = hit {
                    return Ok(v);
                }
            }

            let mut values = Vec::with_capacity(self.params.len());
            for cp in &self.params {
                let v = cp.resolve(ctx).await?;
                values.push((Arc::from(cp.param().name()), v));
            }
            let cleanup = ctx.cleanup().unwrap_or_default();
            let args = Args::new(values, cleanup);

            let value = match self.handler.handle(args).await {
                Ok(Flow::Value(v)) => v,
                Ok(Flow::Nothing) => nil(),
                Ok(Flow::Stop) => return Err(HandlerError::Exit(ExitFlow::Stop)),
                Ok(Flow::Block) => return Err(HandlerError::Exit(ExitFlow::Block)),
                // Exit sentinels pass through untouched; real failures are
                // wrapped so the outer frame reports the original error
                // without tangling its own identity.
                Err(e) if e.is_exit() => return Err(e),
                Err(e) => return Err(HandlerError::Inner(Box::new(e))),
            };

            if let Some(cache) = &cache {
                cache
                    .lock()
                    .expect("depend cache poisoned")
                    .insert(self.cache_key(), value.clone());
            }
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;
    use crate::subscribers::handler::HandlerFn;
    use crate::subscribers::param::Param;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_handler(hits: Arc<AtomicU32>) -> Arc<dyn Handle> {
        HandlerFn::arc("counter", Vec::new(), move |_args| {
            let hits = Arc::clone(&hits);
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                Ok(Flow::value(n))
            }
        })
    }

    #[tokio::test]
    async fn test_cached_depend_invokes_once_per_dispatch() {
        let hits = Arc::new(AtomicU32::new(0));
        let dep = CompiledDepend::compile(
            Depends::new(counting_handler(Arc::clone(&hits))).cached(),
            &[],
            &[],
        );
        let mut ctx = Context::new();
        ctx.ensure_depend_cache();

        let a = dep.resolve(&ctx).await.unwrap();
        let b = dep.resolve(&ctx).await.unwrap();
        assert_eq!(*a.downcast::<u32>().unwrap(), *b.downcast::<u32>().unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncached_depend_invokes_every_time() {
        let hits = Arc::new(AtomicU32::new(0));
        let dep = CompiledDepend::compile(
            Depends::new(counting_handler(Arc::clone(&hits))),
            &[],
            &[],
        );
        let mut ctx = Context::new();
        ctx.ensure_depend_cache();

        dep.resolve(&ctx).await.unwrap();
        dep.resolve(&ctx).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inner_failure_is_wrapped() {
        let failing: Arc<dyn Handle> = HandlerFn::arc("boom", Vec::new(), |_args| async {
            Err(HandlerError::Failure("boom".into()))
        });
        let dep = CompiledDepend::compile(Depends::new(failing), &[], &[]);
        let ctx = Context::new();
        match dep.resolve(&ctx).await {
            Err(HandlerError::Inner(inner)) => {
                assert_eq!(inner.as_label(), "handler_failure");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_depend_parameter_resolves_from_context() {
        let h: Arc<dyn Handle> = HandlerFn::arc(
            "double",
            vec![Param::of::<i32>("n")],
            |args: Args| async move {
                let n = *args.get::<i32>("n")?;
                Ok(Flow::value(n * 2))
            },
        );
        let dep = CompiledDepend::compile(Depends::new(h), &[], &[]);
        let mut ctx = Context::new();
        ctx.insert("n", val(21_i32));
        let v = dep.resolve(&ctx).await.unwrap();
        assert_eq!(*v.downcast::<i32>().unwrap(), 42);
    }
}
