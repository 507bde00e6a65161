//! # StepOut: suspend a handler until a later event satisfies a condition.
//!
//! A [`StepOut`] wraps a subscriber — an existing one, or a fresh temporary
//! one created per wait — and turns its next non-empty result into the
//! completion of a future:
//!
//! 1. [`wait`](StepOut::wait) creates a one-shot future and **prepends** a
//!    temporary post-propagator to the wrapped subscriber: on each event it
//!    reads `$result` and, when non-empty, completes the future (returning
//!    `Block` too when the step-out was built with [`block`](StepOut::block));
//! 2. the wrapped subscriber's priority is raised to the step-out's for the
//!    duration of the wait;
//! 3. the future is awaited with an optional timeout;
//! 4. teardown **always** restores the original priority, detaches the
//!    temporary propagator, and disposes thunk-created subscribers — on
//!    completion, timeout, and cancellation alike (guard-based).
//!
//! After [`dispose`](StepOut::dispose), any `wait` fails with
//! [`BusError::Disposed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::context::{is_nil, Context, CtxValue, RESULT};
use crate::core::bus::EventBus;
use crate::error::{BusError, HandlerError};
use crate::events::Event;
use crate::scopes::Scope;
use crate::subscribers::{
    Direction, Handle, Propagate, Spread, Subscriber,
};

/// Priority a step-out boosts its subscriber to while waiting.
const STEP_PRIORITY: u16 = 0;

/// Completes the wait future from `$result`.
struct StepPropagator {
    tx: Mutex<Option<oneshot::Sender<CtxValue>>>,
    block: bool,
}

#[async_trait]
impl Propagate for StepPropagator {
    fn direction(&self) -> Direction {
        Direction::After
    }

    async fn apply(&self, ctx: &mut Context) -> Result<Spread, HandlerError> {
        let Some(result) = ctx.get_cloned(RESULT) else {
            return Ok(Spread::Nothing);
        };
        if is_nil(&result) {
            return Ok(Spread::Nothing);
        }
        let sender = self.tx.lock().expect("step-out poisoned").take();
        if let Some(tx) = sender {
            let _ = tx.send(result);
            if self.block {
                return Ok(Spread::Block);
            }
        }
        Ok(Spread::Nothing)
    }
}

enum TargetKind {
    /// An already-registered subscriber, wrapped for the wait's duration.
    Existing(Arc<Subscriber>),
    /// Builds a fresh temporary subscriber per wait.
    Thunk(Box<dyn Fn() -> Result<Arc<Subscriber>, BusError> + Send + Sync>),
}

/// Restores the wrapped subscriber when the wait ends — on every path,
/// cancellation included.
struct Teardown {
    sub: Arc<Subscriber>,
    propagator: Arc<dyn Propagate>,
    original_priority: u16,
    dispose_sub: bool,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.sub.set_priority(self.original_priority);
        self.sub.detach(&self.propagator);
        if self.dispose_sub {
            self.sub.dispose();
        }
    }
}

/// A cooperative breakpoint: wait until a wrapped subscriber produces a
/// value for some future event.
pub struct StepOut {
    priority: u16,
    block: bool,
    target: TargetKind,
    disposed: AtomicBool,
}

impl StepOut {
    /// Wraps an existing subscriber.
    pub fn wrap(sub: Arc<Subscriber>) -> Self {
        Self {
            priority: STEP_PRIORITY,
            block: false,
            target: TargetKind::Existing(sub),
            disposed: AtomicBool::new(false),
        }
    }

    /// Builds a fresh temporary subscriber for the event type on each wait.
    ///
    /// The subscriber is registered in the global scope when the wait starts
    /// and disposed when it ends.
    pub fn on<E: Event>(bus: &EventBus, handler: Arc<dyn Handle>) -> Self {
        let bus = bus.clone();
        Self {
            priority: STEP_PRIORITY,
            block: false,
            target: TargetKind::Thunk(Box::new(move || {
                bus.on::<E>(Arc::clone(&handler)).attach()
            })),
            disposed: AtomicBool::new(false),
        }
    }

    /// Scope-targeted form of [`on`](StepOut::on).
    pub fn on_in<E: Event>(bus: &EventBus, scope: &Arc<Scope>, handler: Arc<dyn Handle>) -> Self {
        let bus = bus.clone();
        let scope = Arc::clone(scope);
        Self {
            priority: STEP_PRIORITY,
            block: false,
            target: TargetKind::Thunk(Box::new(move || {
                bus.on_in::<E>(&scope, Arc::clone(&handler)).attach()
            })),
            disposed: AtomicBool::new(false),
        }
    }

    /// Priority the wrapped subscriber is boosted to while waiting.
    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Blocks further propagation of the event that completes a wait.
    pub fn block(mut self) -> Self {
        self.block = true;
        self
    }

    /// True once disposed; all subsequent waits fail.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Permanently ends the step-out.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// Waits until the wrapped subscriber produces a value, the timeout
    /// elapses (→ `default`), or the step-out is disposed.
    pub async fn wait(
        &self,
        timeout: Option<Duration>,
        default: Option<CtxValue>,
    ) -> Result<Option<CtxValue>, BusError> {
        if self.is_disposed() {
            return Err(BusError::Disposed { what: "step_out" });
        }

        let (sub, dispose_sub) = match &self.target {
            TargetKind::Existing(sub) => {
                if !sub.is_available() {
                    return Err(BusError::Disposed { what: "subscriber" });
                }
                (Arc::clone(sub), false)
            }
            TargetKind::Thunk(build) => (build()?, true),
        };

        let (tx, rx) = oneshot::channel::<CtxValue>();
        let propagator: Arc<dyn Propagate> = Arc::new(StepPropagator {
            tx: Mutex::new(Some(tx)),
            block: self.block,
        });

        let original_priority = sub.priority();
        sub.set_priority(self.priority);
        sub.prepend_after(Arc::clone(&propagator));

        // Teardown runs when this guard drops — value, timeout, and
        // cancellation paths all restore the subscriber.
        let _teardown = Teardown {
            sub,
            propagator,
            original_priority,
            dispose_sub,
        };

        let received = match timeout {
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(done) => done.ok(),
                Err(_elapsed) => None,
            },
            None => rx.await.ok(),
        };

        Ok(received.or(default))
    }

    /// Typed form of [`wait`](StepOut::wait).
    pub async fn wait_as<T: Send + Sync + 'static>(
        &self,
        timeout: Option<Duration>,
        default: Option<T>,
    ) -> Result<Option<Arc<T>>, BusError> {
        let default = default.map(|v| crate::context::val(v));
        let out = self.wait(timeout, default).await?;
        Ok(out.and_then(|v| v.downcast::<T>().ok()))
    }

    /// Repeated-wait form: each `next()` is one `wait`, yielding its value
    /// (or the default on timeout); `None` ends the loop once the step-out
    /// is disposed or a wait settles with nothing.
    pub fn iter(&self, timeout: Option<Duration>, default: Option<CtxValue>) -> StepIter<'_> {
        StepIter {
            step: self,
            timeout,
            default,
        }
    }
}

/// Async iteration over repeated waits; see [`StepOut::iter`].
pub struct StepIter<'a> {
    step: &'a StepOut,
    timeout: Option<Duration>,
    default: Option<CtxValue>,
}

impl StepIter<'_> {
    /// Awaits the next wait; `None` terminates the loop.
    pub async fn next(&mut self) -> Option<CtxValue> {
        if self.step.is_disposed() {
            return None;
        }
        match self.step.wait(self.timeout, self.default.clone()).await {
            Ok(Some(v)) => Some(v),
            Ok(None) | Err(_) => None,
        }
    }
}
