//! # Subscriber: a compiled handler attached to one publisher.
//!
//! Each invocation:
//! 1. installs itself under `$subscriber` and a fresh cleanup stack under
//!    `$cleanup`;
//! 2. runs pre-propagators (context seeding, stop/block short-circuit);
//! 3. resolves every compiled parameter (dependencies included);
//! 4. runs the body with panic isolation;
//! 5. writes `$result` and runs post-propagators;
//! 6. drains the cleanup stack on **every** exit path;
//! 7. disposes itself when temporary.
//!
//! ## Rules
//! - Thrown exit sentinels are translated into the same [`Flow`] variants the
//!   engine would see from a plain return.
//! - With `skip_req_missing`, an unresolved requirement yields `Flow::Stop`
//!   instead of an error.
//! - Disposal flips `available` (checked at enumeration time), runs the
//!   dispose hooks, severs propagators this subscriber planted elsewhere,
//!   and removes it from its owning scope. In-flight invocations finish.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::FutureExt;

use crate::context::{nil, val, Context, RESULT, SUBSCRIBER};
use crate::error::HandlerError;
use crate::flow::Flow;
use crate::scopes::Scope;
use crate::subscribers::handler::{Args, Handle};
use crate::subscribers::param::CompiledParam;
use crate::subscribers::propagator::{Direction, Propagate, PropagateFn, Spread};

/// Global sequence counter for subscriber ids.
static SUB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Lightweight identity of a subscriber, stored under `$subscriber` and
/// carried by exception events.
#[derive(Clone, Debug)]
pub struct SubscriberInfo {
    /// Globally unique, monotonically increasing id.
    pub id: u64,
    /// The handler's stable name.
    pub name: Arc<str>,
}

/// A compiled handler bound into a scope.
pub struct Subscriber {
    id: u64,
    name: Arc<str>,
    handler: Arc<dyn Handle>,
    priority: AtomicU16,
    params: Vec<CompiledParam>,
    before: RwLock<Vec<Arc<dyn Propagate>>>,
    after: RwLock<Vec<Arc<dyn Propagate>>>,
    temporary: bool,
    skip_req_missing: bool,
    available: AtomicBool,
    owner: Mutex<Option<Weak<Scope>>>,
    on_dispose: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Subscriber {
    /// Builds a subscriber; used by the register builder.
    pub(crate) fn new(
        handler: Arc<dyn Handle>,
        params: Vec<CompiledParam>,
        propagators: Vec<Arc<dyn Propagate>>,
        priority: u16,
        temporary: bool,
        skip_req_missing: bool,
    ) -> Arc<Self> {
        let mut before = Vec::new();
        let mut after = Vec::new();
        for p in propagators {
            match p.direction() {
                Direction::Before => before.push(p),
                Direction::After => after.push(p),
            }
        }
        Arc::new(Self {
            id: SUB_SEQ.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(handler.name()),
            handler,
            priority: AtomicU16::new(priority),
            params,
            before: RwLock::new(before),
            after: RwLock::new(after),
            temporary,
            skip_req_missing,
            available: AtomicBool::new(true),
            owner: Mutex::new(None),
            on_dispose: Mutex::new(Vec::new()),
        })
    }

    /// Unique subscriber id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The handler's stable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity snapshot for `$subscriber` and exception events.
    pub fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            id: self.id,
            name: Arc::clone(&self.name),
        }
    }

    /// Current priority (smaller runs earlier).
    pub fn priority(&self) -> u16 {
        self.priority.load(Ordering::SeqCst)
    }

    /// Adjusts the priority; used by the breakpoint facility to boost a
    /// wrapped subscriber temporarily.
    pub fn set_priority(&self, priority: u16) {
        self.priority.store(priority, Ordering::SeqCst);
    }

    /// True until disposed.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// True when the subscriber disposes itself after one invocation.
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Attaches a propagator on its declared side.
    pub fn propagate(&self, p: Arc<dyn Propagate>) {
        match p.direction() {
            Direction::Before => self.before.write().expect("propagators poisoned").push(p),
            Direction::After => self.after.write().expect("propagators poisoned").push(p),
        }
    }

    /// Prepends a post-propagator so it observes `$result` first.
    pub fn prepend_after(&self, p: Arc<dyn Propagate>) {
        self.after
            .write()
            .expect("propagators poisoned")
            .insert(0, p);
    }

    /// Detaches a propagator by identity.
    pub fn detach(&self, p: &Arc<dyn Propagate>) {
        self.before
            .write()
            .expect("propagators poisoned")
            .retain(|q| !Arc::ptr_eq(q, p));
        self.after
            .write()
            .expect("propagators poisoned")
            .retain(|q| !Arc::ptr_eq(q, p));
    }

    /// Registers a one-shot post-propagator.
    pub fn defer<F, Fut>(&self, f: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Spread, HandlerError>> + Send + 'static,
    {
        self.propagate(PropagateFn::after_once(f).arc());
    }

    /// Registers a hook run once when the subscriber is disposed.
    pub fn on_dispose(&self, f: impl FnOnce() + Send + 'static) {
        self.on_dispose
            .lock()
            .expect("dispose hooks poisoned")
            .push(Box::new(f));
    }

    /// Records the owning scope so disposal can unregister.
    pub(crate) fn bind_owner(&self, scope: &Arc<Scope>) {
        *self.owner.lock().expect("owner poisoned") = Some(Arc::downgrade(scope));
    }

    /// Disposes the subscriber: flips `available`, runs dispose hooks, and
    /// removes it from its owning scope. Idempotent.
    pub fn dispose(&self) {
        if !self.available.swap(false, Ordering::SeqCst) {
            return;
        }
        let hooks: Vec<_> = self
            .on_dispose
            .lock()
            .expect("dispose hooks poisoned")
            .drain(..)
            .collect();
        for hook in hooks {
            hook();
        }
        let owner = self.owner.lock().expect("owner poisoned").take();
        if let Some(scope) = owner.and_then(|w| w.upgrade()) {
            scope.remove_subscriber(self.id);
        }
    }

    /// Invokes the subscriber against its private context copy.
    pub(crate) async fn invoke(self: Arc<Self>, mut ctx: Context) -> Result<Flow, HandlerError> {
        let cleanup = ctx.install_cleanup();
        let out = self.run(&mut ctx).await;
        cleanup.drain().await;
        if self.temporary {
            self.dispose();
        }
        out
    }

    async fn run(&self, ctx: &mut Context) -> Result<Flow, HandlerError> {
        ctx.insert(SUBSCRIBER, val(self.info()));

        if let Some(early) = self.run_before(ctx).await? {
            return Ok(early);
        }

        let args = match self.resolve_args(ctx).await {
            Ok(args) => args,
            Err(e) if e.is_exit() => {
                return Ok(match e {
                    HandlerError::Exit(x) => x.into(),
                    _ => unreachable!(),
                })
            }
            Err(
                HandlerError::UnresolvedRequirement { .. }
                | HandlerError::ProviderUnsatisfied { .. },
            ) if self.skip_req_missing => return Ok(Flow::Stop),
            Err(e) => return Err(e),
        };

        let body = self.handler.handle(args);
        let flow = match std::panic::AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok(flow)) => flow,
            Ok(Err(HandlerError::Exit(x))) => x.into(),
            Ok(Err(e)) => return Err(e),
            Err(panic) => return Err(HandlerError::Panicked(panic_message(panic))),
        };

        if flow.is_exit() {
            return Ok(flow);
        }
        self.run_after(ctx, flow).await
    }

    async fn run_before(&self, ctx: &mut Context) -> Result<Option<Flow>, HandlerError> {
        let pres: Vec<_> = self
            .before
            .read()
            .expect("propagators poisoned")
            .clone();
        for p in pres {
            let spread = p.apply(ctx).await;
            if p.once() {
                self.detach(&p);
            }
            match spread {
                Ok(Spread::Nothing) => {}
                Ok(Spread::Merge(pairs)) => ctx.extend(pairs),
                // A value from a pre-propagator has nothing to transform yet.
                Ok(Spread::Value(_)) => {}
                Ok(Spread::Stop) => return Ok(Some(Flow::Stop)),
                Ok(Spread::Block) => return Ok(Some(Flow::Block)),
                Err(HandlerError::Exit(x)) => return Ok(Some(x.into())),
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn resolve_args(&self, ctx: &Context) -> Result<Args, HandlerError> {
        let mut values = Vec::with_capacity(self.params.len());
        for cp in &self.params {
            let v = cp.resolve(ctx).await?;
            values.push((Arc::from(cp.param().name()), v));
        }
        Ok(Args::new(values, ctx.cleanup().unwrap_or_default()))
    }

    async fn run_after(&self, ctx: &mut Context, flow: Flow) -> Result<Flow, HandlerError> {
        let posts: Vec<_> = self.after.read().expect("propagators poisoned").clone();
        if posts.is_empty() {
            return Ok(flow);
        }

        ctx.insert(
            RESULT,
            match &flow {
                Flow::Value(v) => v.clone(),
                _ => nil(),
            },
        );

        let mut current = flow;
        for p in posts {
            let spread = p.apply(ctx).await;
            if p.once() {
                self.detach(&p);
            }
            match spread {
                Ok(Spread::Nothing) => {}
                Ok(Spread::Merge(pairs)) => ctx.extend(pairs),
                Ok(Spread::Value(v)) => {
                    ctx.insert(RESULT, v.clone());
                    current = Flow::Value(v);
                }
                Ok(Spread::Stop) => return Ok(Flow::Stop),
                Ok(Spread::Block) => return Ok(Flow::Block),
                Err(HandlerError::Exit(x)) => return Ok(x.into()),
                Err(e) => return Err(e),
            }
        }
        Ok(current)
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Subscriber(#{} `{}` p={})",
            self.id,
            self.name,
            self.priority()
        )
    }
}

/// Extracts a printable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let any = &*payload;
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
