//! # Publisher: binds an event shape to a context-gather function.
//!
//! A publisher owns an id, an optional supplier (how to turn an event value
//! into gathered context), an optional structural predicate (for external
//! events), event-local providers, an optional registration gate, and an
//! optional bounded queue for pull mode.
//!
//! ## Rules
//! - The supplier runs **once per dispatch** per matched publisher; every
//!   subscriber then receives its own copy of the gathered context.
//! - A `check` gate may reject a subscriber at registration time (or mutate
//!   it, e.g. inject propagators). Rejection is not an error.
//! - `push` never blocks: a full queue drops the value; slow consumers lose
//!   events instead of stalling publishers.

use std::any::TypeId;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::{Context, CtxValue};
use crate::error::HandlerError;
use crate::providers::Provider;
use crate::subscribers::Subscriber;

/// Structural predicate over an external event value.
pub type Predicate = Arc<dyn Fn(&CtxValue) -> bool + Send + Sync>;

/// Registration gate: may reject or mutate a subscriber being attached.
pub type CheckGate = Arc<dyn Fn(&Publisher, &Subscriber) -> bool + Send + Sync>;

/// First-result validator for `post` mode.
pub type ResultCheck = Arc<dyn Fn(&CtxValue) -> bool + Send + Sync>;

/// Turns an external event value into gathered context.
#[async_trait]
pub trait Gather: Send + Sync + 'static {
    /// Writes the event's attributes into the context.
    async fn supply(&self, event: &CtxValue, ctx: &mut Context) -> Result<(), HandlerError>;
}

/// Function-backed supplier.
///
/// The closure receives the event value and the context by value and returns
/// the updated context.
pub struct GatherFn<F> {
    f: F,
}

impl<F, Fut> GatherFn<F>
where
    F: Fn(CtxValue, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, HandlerError>> + Send + 'static,
{
    /// Wraps a closure as a supplier.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Gather for GatherFn<F>
where
    F: Fn(CtxValue, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context, HandlerError>> + Send + 'static,
{
    async fn supply(&self, event: &CtxValue, ctx: &mut Context) -> Result<(), HandlerError> {
        let out = (self.f)(event.clone(), std::mem::take(ctx)).await?;
        *ctx = out;
        Ok(())
    }
}

/// Async producer polled by the fetch loop in pull mode.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// Produces the next event value, or `None` when drained.
    async fn fetch(&self) -> Option<CtxValue>;
}

/// Function-backed fetcher.
pub struct FetchFn<F> {
    f: F,
}

impl<F, Fut> FetchFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<CtxValue>> + Send + 'static,
{
    /// Wraps a closure as a fetcher.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Fetch for FetchFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<CtxValue>> + Send + 'static,
{
    async fn fetch(&self) -> Option<CtxValue> {
        (self.f)().await
    }
}

/// Binds an event shape (tagged type or structural predicate) to a gather
/// function and event-local providers.
pub struct Publisher {
    id: Arc<str>,
    /// Concrete type for tagged publishers; `None` for structural ones.
    tagged: Option<TypeId>,
    supplier: RwLock<Option<Arc<dyn Gather>>>,
    predicate: RwLock<Option<Predicate>>,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    check: RwLock<Option<CheckGate>>,
    check_result: RwLock<Option<ResultCheck>>,
    fetcher: RwLock<Option<Arc<dyn Fetch>>>,
    queue_tx: Mutex<Option<mpsc::Sender<CtxValue>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<CtxValue>>>,
}

impl Publisher {
    /// Creates a publisher for a tagged event type.
    pub(crate) fn tagged(id: Arc<str>, type_id: TypeId) -> Arc<Self> {
        Arc::new(Self {
            id,
            tagged: Some(type_id),
            supplier: RwLock::new(None),
            predicate: RwLock::new(None),
            providers: RwLock::new(Vec::new()),
            check: RwLock::new(None),
            check_result: RwLock::new(None),
            fetcher: RwLock::new(None),
            queue_tx: Mutex::new(None),
            queue_rx: Mutex::new(None),
        })
    }

    /// Creates a structural publisher over external event values.
    pub(crate) fn external(id: Arc<str>, predicate: Predicate) -> Arc<Self> {
        Arc::new(Self {
            id,
            tagged: None,
            supplier: RwLock::new(None),
            predicate: RwLock::new(Some(predicate)),
            providers: RwLock::new(Vec::new()),
            check: RwLock::new(None),
            check_result: RwLock::new(None),
            fetcher: RwLock::new(None),
            queue_tx: Mutex::new(None),
            queue_rx: Mutex::new(None),
        })
    }

    /// The publisher id.
    pub fn id(&self) -> &Arc<str> {
        &self.id
    }

    /// Concrete event type for tagged publishers.
    pub fn event_type(&self) -> Option<TypeId> {
        self.tagged
    }

    /// Sets the context supplier (the `gather` decorator).
    pub fn gather(&self, supplier: Arc<dyn Gather>) {
        *self.supplier.write().expect("publisher poisoned") = Some(supplier);
    }

    /// Installs a registration gate (the `check` decorator).
    pub fn check(&self, gate: CheckGate) {
        *self.check.write().expect("publisher poisoned") = Some(gate);
    }

    /// Installs a first-result validator.
    pub fn check_result(&self, check: ResultCheck) {
        *self.check_result.write().expect("publisher poisoned") = Some(check);
    }

    /// Adds an event-local provider inherited by subscribers of this
    /// publisher.
    pub fn add_provider(&self, p: Arc<dyn Provider>) {
        self.providers.write().expect("publisher poisoned").push(p);
    }

    /// Snapshot of event-local providers.
    pub(crate) fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.read().expect("publisher poisoned").clone()
    }

    /// Runs the registration gate; `true` when the subscriber may bind.
    pub(crate) fn admit(&self, sub: &Subscriber) -> bool {
        match &*self.check.read().expect("publisher poisoned") {
            Some(gate) => gate(self, sub),
            None => true,
        }
    }

    /// Whether the structural predicate matches an external value.
    pub(crate) fn matches(&self, value: &CtxValue) -> bool {
        match &*self.predicate.read().expect("publisher poisoned") {
            Some(p) => p(value),
            None => false,
        }
    }

    /// Validates a first-result candidate.
    pub(crate) fn validate_result(&self, value: &CtxValue) -> bool {
        match &*self.check_result.read().expect("publisher poisoned") {
            Some(check) => check(value),
            None => true,
        }
    }

    /// Runs the supplier once for this dispatch.
    pub(crate) async fn supply_context(
        &self,
        event: &CtxValue,
        ctx: &mut Context,
    ) -> Result<(), HandlerError> {
        let supplier = self.supplier.read().expect("publisher poisoned").clone();
        if let Some(s) = supplier {
            s.supply(event, ctx).await?;
        }
        Ok(())
    }

    // ---- pull mode ----

    /// Attaches a bounded queue; pushed values are published by the fetch
    /// loop. Capacity is clamped to a minimum of 1.
    pub fn with_queue(&self, capacity: usize) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.queue_tx.lock().expect("publisher poisoned") = Some(tx);
        *self.queue_rx.lock().expect("publisher poisoned") = Some(rx);
    }

    /// Sets an async producer polled by the fetch loop.
    pub fn supply(&self, fetcher: Arc<dyn Fetch>) {
        *self.fetcher.write().expect("publisher poisoned") = Some(fetcher);
    }

    /// Enqueues a value for the fetch loop. Non-blocking; returns `false`
    /// when the queue is full, closed, or absent (the value is dropped).
    pub fn push(&self, value: CtxValue) -> bool {
        match &*self.queue_tx.lock().expect("publisher poisoned") {
            Some(tx) => tx.try_send(value).is_ok(),
            None => false,
        }
    }

    /// Takes the queue receiver; the fetch loop claims it once.
    pub(crate) fn take_queue(&self) -> Option<mpsc::Receiver<CtxValue>> {
        self.queue_rx.lock().expect("publisher poisoned").take()
    }

    /// Snapshot of the pull-mode producer, if any.
    pub(crate) fn fetcher(&self) -> Option<Arc<dyn Fetch>> {
        self.fetcher.read().expect("publisher poisoned").clone()
    }

    /// True when the publisher participates in the fetch loop.
    pub(crate) fn is_pull(&self) -> bool {
        self.fetcher.read().expect("publisher poisoned").is_some()
            || self.queue_rx.lock().expect("publisher poisoned").is_some()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Publisher(`{}`, {})",
            self.id,
            if self.tagged.is_some() {
                "tagged"
            } else {
                "structural"
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;

    #[tokio::test]
    async fn test_supplier_gathers_into_context() {
        let p = Publisher::external(
            Arc::from("ints"),
            Arc::new(|v: &CtxValue| (**v).is::<i32>()),
        );
        p.gather(GatherFn::arc(|event, mut ctx: Context| async move {
            ctx.insert("n", event);
            Ok(ctx)
        }));

        let mut ctx = Context::new();
        p.supply_context(&val(5_i32), &mut ctx).await.unwrap();
        assert_eq!(*ctx.get_as::<i32>("n").unwrap(), 5);
    }

    #[test]
    fn test_predicate_gates_matching() {
        let p = Publisher::external(
            Arc::from("ints"),
            Arc::new(|v: &CtxValue| (**v).is::<i32>()),
        );
        assert!(p.matches(&val(1_i32)));
        assert!(!p.matches(&val(String::from("nope"))));
    }

    #[test]
    fn test_push_requires_queue() {
        let p = Publisher::external(Arc::from("q"), Arc::new(|_| true));
        assert!(!p.push(val(1_i32)));
        p.with_queue(2);
        assert!(p.push(val(1_i32)));
        assert!(p.push(val(2_i32)));
        // Full queue drops.
        assert!(!p.push(val(3_i32)));
    }
}
