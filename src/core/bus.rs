//! # EventBus: the runtime handle.
//!
//! The bus owns the publisher registry, the scope registry, global providers
//! and factories, and the lifecycle machinery (task tracker + cancellation
//! token). It is a cheap-clone handle; clones share one runtime.
//!
//! ## High-level architecture
//! ```text
//! publish(event) ──► spawn on TaskTracker ──► dispatch
//!                                               │
//!                    resolve publishers ────────┤ tagged: the event's id
//!                                               │ external: predicates
//!                    gather ctx per publisher ──┤ supplier runs once
//!                                               │
//!                    enumerate enabled scopes ──┤ ($global + named)
//!                                               │
//!                    (priority, publisher) ─────┤ cohorts, ascending
//!                    cohorts run concurrently ──┤ join_all barrier
//!                                               │
//!                    outcomes ──────────────────┘ Stop / Block / Value
//!                                                 failures → ExceptionEvent
//!
//! shutdown(): cancel token ─► close tracker ─► wait up to cfg.grace
//! ```
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use eventvisor::{val, Args, Context, Event, EventBus, Flow, HandlerError, HandlerFn, Param};
//!
//! struct Ping {
//!     msg: String,
//! }
//!
//! #[async_trait]
//! impl Event for Ping {
//!     async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
//!         ctx.insert("msg", val(self.msg.clone()));
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::default();
//! bus.on::<Ping>(HandlerFn::arc(
//!     "echo",
//!     vec![Param::of::<String>("msg")],
//!     |args: Args| async move {
//!         println!("{}", args.get::<String>("msg")?);
//!         Ok(Flow::Nothing)
//!     },
//! ))
//! .attach()?;
//!
//! bus.publish(Ping { msg: "hello".into() }).join().await;
//! # Ok(())
//! # }
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::context::{Context, CtxValue};
use crate::core::config::BusConfig;
use crate::core::dispatch::{dispatch, Published};
use crate::core::fetch;
use crate::error::BusError;
use crate::events::{Event, Predicate, Publisher, PublisherRegistry, BACKEND_PUBLISHER};
use crate::providers::{
    CtxProvider, EventProvider, Provider, ProviderFactory, SubscriberProvider,
};
use crate::scopes::{Scope, Slot, GLOBAL_SCOPE};
use crate::subscribers::{Handle, RegisterBuilder, Target};

/// Handle to a scheduled fire-and-forget dispatch.
///
/// Dropping the handle detaches it; the dispatch keeps running. Aborting
/// propagates cancellation into the running cohort.
pub struct DispatchHandle {
    handle: JoinHandle<Option<CtxValue>>,
}

impl DispatchHandle {
    /// Cancels the dispatch task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// True once the dispatch has settled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the dispatch to finish.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Handle to a first-result (`post`) dispatch.
pub struct PostHandle {
    handle: JoinHandle<Option<CtxValue>>,
}

impl PostHandle {
    /// Cancels the dispatch task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the winning value, if any subscriber produced one.
    pub async fn result(self) -> Option<CtxValue> {
        self.handle.await.ok().flatten()
    }

    /// Typed form of [`result`](PostHandle::result); a type mismatch yields
    /// `None`.
    pub async fn result_as<T: Send + Sync + 'static>(self) -> Option<Arc<T>> {
        self.result().await.and_then(|v| v.downcast::<T>().ok())
    }
}

struct BusInner {
    cfg: BusConfig,
    publishers: PublisherRegistry,
    scopes: RwLock<HashMap<Arc<str>, Arc<Scope>>>,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    factories: RwLock<Vec<Arc<dyn ProviderFactory>>>,
    tracker: TaskTracker,
    token: CancellationToken,
}

/// The event bus runtime; cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    /// Creates a bus with the given configuration.
    ///
    /// The `$global` scope and the reserved `ctx` / `event` / `subscriber`
    /// providers are installed up front.
    pub fn new(cfg: BusConfig) -> Self {
        let mut scopes: HashMap<Arc<str>, Arc<Scope>> = HashMap::new();
        scopes.insert(Arc::from(GLOBAL_SCOPE), Scope::new(GLOBAL_SCOPE));

        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(CtxProvider),
            Arc::new(SubscriberProvider),
            Arc::new(EventProvider::by_name()),
        ];

        Self {
            inner: Arc::new(BusInner {
                cfg,
                publishers: PublisherRegistry::new(),
                scopes: RwLock::new(scopes),
                providers: RwLock::new(providers),
                factories: RwLock::new(Vec::new()),
                tracker: TaskTracker::new(),
                token: CancellationToken::new(),
            }),
        }
    }

    /// The runtime configuration.
    pub fn config(&self) -> &BusConfig {
        &self.inner.cfg
    }

    /// The runtime cancellation token; child tokens inherit shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    // ---- scopes ----

    /// The always-present global scope.
    pub fn global_scope(&self) -> Arc<Scope> {
        self.scope(GLOBAL_SCOPE)
    }

    /// Returns the named scope, creating it on first use.
    pub fn scope(&self, id: &str) -> Arc<Scope> {
        if let Some(s) = self.inner.scopes.read().expect("scopes poisoned").get(id) {
            return Arc::clone(s);
        }
        let mut scopes = self.inner.scopes.write().expect("scopes poisoned");
        Arc::clone(
            scopes
                .entry(Arc::from(id))
                .or_insert_with(|| Scope::new(id)),
        )
    }

    /// Disposes a named scope and removes it from the registry.
    ///
    /// The global scope is emptied but never removed.
    pub fn dispose_scope(&self, id: &str) {
        let scope = {
            let mut scopes = self.inner.scopes.write().expect("scopes poisoned");
            if id == GLOBAL_SCOPE {
                scopes.get(id).cloned()
            } else {
                scopes.remove(id)
            }
        };
        if let Some(scope) = scope {
            scope.dispose();
            if id == GLOBAL_SCOPE {
                scope.enable();
            }
        }
    }

    // ---- providers ----

    /// Registers a global provider considered by every compilation.
    pub fn add_provider(&self, p: Arc<dyn Provider>) {
        self.inner
            .providers
            .write()
            .expect("providers poisoned")
            .push(p);
    }

    /// Registers a global provider factory.
    pub fn add_factory(&self, f: Arc<dyn ProviderFactory>) {
        self.inner
            .factories
            .write()
            .expect("factories poisoned")
            .push(f);
    }

    pub(crate) fn global_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.inner
            .providers
            .read()
            .expect("providers poisoned")
            .clone()
    }

    pub(crate) fn global_factories(&self) -> Vec<Arc<dyn ProviderFactory>> {
        self.inner
            .factories
            .read()
            .expect("factories poisoned")
            .clone()
    }

    // ---- publishers ----

    /// Looks up a publisher by id.
    pub fn publisher(&self, id: &str) -> Option<Arc<Publisher>> {
        self.inner.publishers.get(id)
    }

    /// The tagged publisher for an event type, created on first use.
    pub fn publisher_of<E: Event>(&self) -> Arc<Publisher> {
        self.inner
            .publishers
            .ensure_tagged(E::id(), TypeId::of::<E>())
    }

    /// Registers an external publisher over non-event values.
    ///
    /// Registering an existing id rebinds it.
    pub fn define<F>(&self, id: &str, predicate: F) -> Arc<Publisher>
    where
        F: Fn(&CtxValue) -> bool + Send + Sync + 'static,
    {
        self.inner
            .publishers
            .define(Arc::from(id), Arc::new(predicate) as Predicate)
    }

    /// Registers an external publisher with a pull queue attached
    /// (capacity from [`BusConfig::queue_capacity`]).
    pub fn define_queued<F>(&self, id: &str, predicate: F) -> Arc<Publisher>
    where
        F: Fn(&CtxValue) -> bool + Send + Sync + 'static,
    {
        let p = self.define(id, predicate);
        p.with_queue(self.inner.cfg.queue_capacity);
        p
    }

    pub(crate) fn ensure_tagged_publisher(&self, id: Arc<str>, type_id: TypeId) -> Arc<Publisher> {
        self.inner.publishers.ensure_tagged(id, type_id)
    }

    pub(crate) fn resolve_structural(&self, value: &CtxValue) -> Vec<Arc<Publisher>> {
        self.inner.publishers.resolve_structural(value)
    }

    pub(crate) fn all_publishers(&self) -> Vec<Arc<Publisher>> {
        self.inner.publishers.all()
    }

    // ---- registration ----

    /// Registers a handler for a tagged event type in the global scope.
    pub fn on<E: Event>(&self, handler: Arc<dyn Handle>) -> RegisterBuilder {
        self.on_in::<E>(&self.global_scope(), handler)
    }

    /// Registers a handler for a tagged event type in the given scope.
    pub fn on_in<E: Event>(&self, scope: &Arc<Scope>, handler: Arc<dyn Handle>) -> RegisterBuilder {
        RegisterBuilder::new(
            self.clone(),
            Arc::clone(scope),
            Target::Tagged {
                id: E::id(),
                type_id: TypeId::of::<E>(),
                providers: E::providers(),
            },
            handler,
        )
    }

    /// Registers a backend handler, invoked on every dispatch regardless of
    /// the event (but never for exception events).
    pub fn on_global(&self, handler: Arc<dyn Handle>) -> RegisterBuilder {
        RegisterBuilder::new(
            self.clone(),
            self.global_scope(),
            Target::Backend,
            handler,
        )
    }

    /// Registers a handler on an already-registered publisher id.
    pub fn use_publisher(&self, id: &str, handler: Arc<dyn Handle>) -> RegisterBuilder {
        self.use_publisher_in(&self.global_scope(), id, handler)
    }

    /// Scope-targeted form of [`use_publisher`](EventBus::use_publisher).
    pub fn use_publisher_in(
        &self,
        scope: &Arc<Scope>,
        id: &str,
        handler: Arc<dyn Handle>,
    ) -> RegisterBuilder {
        RegisterBuilder::new(
            self.clone(),
            Arc::clone(scope),
            Target::Existing { id: Arc::from(id) },
            handler,
        )
    }

    // ---- publishing ----

    /// Publishes a tagged event to all enabled scopes (fire-and-forget).
    pub fn publish<E: Event>(&self, event: E) -> DispatchHandle {
        DispatchHandle {
            handle: self.spawn_dispatch(Published::from_event(event), None, None, false),
        }
    }

    /// Publishes a tagged event to one scope only.
    pub fn publish_scoped<E: Event>(&self, event: E, scope: &Arc<Scope>) -> DispatchHandle {
        DispatchHandle {
            handle: self.spawn_dispatch(Published::from_event(event), Some(scope), None, false),
        }
    }

    /// Publishes a tagged event with an inherited parent context.
    pub fn publish_inherit<E: Event>(&self, event: E, inherit: Context) -> DispatchHandle {
        DispatchHandle {
            handle: self.spawn_dispatch(Published::from_event(event), None, Some(inherit), false),
        }
    }

    /// Publishes an external value routed by structural predicates.
    pub fn publish_external<T: Send + Sync + 'static>(&self, value: T) -> DispatchHandle {
        DispatchHandle {
            handle: self.spawn_dispatch(
                Published::External {
                    value: crate::context::val(value),
                },
                None,
                None,
                false,
            ),
        }
    }

    /// Publishes a value on a specific publisher (pull mode).
    pub(crate) fn publish_pinned(
        &self,
        publisher: Arc<Publisher>,
        value: CtxValue,
    ) -> DispatchHandle {
        DispatchHandle {
            handle: self.spawn_dispatch(Published::Pinned { publisher, value }, None, None, false),
        }
    }

    /// Publishes a tagged event in first-result mode.
    pub fn post<E: Event>(&self, event: E) -> PostHandle {
        PostHandle {
            handle: self.spawn_dispatch(Published::from_event(event), None, None, true),
        }
    }

    /// First-result mode limited to one scope.
    pub fn post_scoped<E: Event>(&self, event: E, scope: &Arc<Scope>) -> PostHandle {
        PostHandle {
            handle: self.spawn_dispatch(Published::from_event(event), Some(scope), None, true),
        }
    }

    /// Publishes an external value in first-result mode.
    pub fn post_external<T: Send + Sync + 'static>(&self, value: T) -> PostHandle {
        PostHandle {
            handle: self.spawn_dispatch(
                Published::External {
                    value: crate::context::val(value),
                },
                None,
                None,
                true,
            ),
        }
    }

    fn spawn_dispatch(
        &self,
        event: Published,
        scope: Option<&Arc<Scope>>,
        inherit: Option<Context>,
        first_result: bool,
    ) -> JoinHandle<Option<CtxValue>> {
        let slots = self.enumerate_slots(scope);
        let bus = self.clone();
        let token = self.inner.token.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => None,
                out = dispatch(bus, event, slots, inherit, first_result) => out,
            }
        })
    }

    /// Snapshot of live slots: one scope when given, otherwise every enabled
    /// scope in id order (registration order within a scope).
    pub(crate) fn enumerate_slots(&self, scope: Option<&Arc<Scope>>) -> Vec<Slot> {
        match scope {
            Some(s) if s.is_enabled() => s.live_slots(),
            Some(_) => Vec::new(),
            None => {
                let scopes = self.inner.scopes.read().expect("scopes poisoned");
                let mut ordered: Vec<&Arc<Scope>> = scopes.values().collect();
                ordered.sort_by(|a, b| a.id().cmp(b.id()));
                ordered
                    .into_iter()
                    .filter(|s| s.is_enabled())
                    .flat_map(|s| s.live_slots())
                    .collect()
            }
        }
    }

    /// Slots eligible for exception events: every enabled scope, backend
    /// subscribers excluded (they never receive exception events).
    pub(crate) fn exception_slots(&self) -> Vec<Slot> {
        self.enumerate_slots(None)
            .into_iter()
            .filter(|s| &*s.publisher != BACKEND_PUBLISHER)
            .collect()
    }

    /// Renders a diagnostic to stderr when enabled in the configuration.
    pub(crate) fn report(&self, message: &str) {
        if self.inner.cfg.report_errors {
            eprintln!("eventvisor: {message}");
        }
    }

    // ---- lifecycle ----

    /// Spawns the pull loop for every publisher with a queue or a fetcher.
    pub fn setup_fetch(&self) {
        fetch::spawn_fetch_loops(self);
    }

    /// Cancels outstanding dispatch tasks and waits up to
    /// [`BusConfig::grace`] for them to settle.
    pub async fn shutdown(&self) -> Result<(), BusError> {
        let grace = self.inner.cfg.grace;
        self.inner.token.cancel();
        self.inner.tracker.close();

        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(BusError::GraceExceeded {
                grace,
                pending: self.inner.tracker.len(),
            }),
        }
    }

    /// Runs until a termination signal arrives, then shuts down gracefully.
    pub async fn run_until_signal(&self) -> Result<(), BusError> {
        let _ = crate::core::shutdown::wait_for_shutdown_signal().await;
        self.shutdown().await
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scopes = self.inner.scopes.read().expect("scopes poisoned").len();
        write!(f, "EventBus({scopes} scopes)")
    }
}
