//! # Dispatch engine: priority-grouped, concurrently fanned-out delivery.
//!
//! One dispatch:
//! 1. resolves the event to its publisher(s) — tagged events name one,
//!    external values match every structural predicate, pulled values are
//!    pinned to their owning publisher;
//! 2. gathers **one context per matched publisher** (the supplier runs once);
//! 3. buckets `(subscriber, publisher)` slots by `(priority, publisher-id)`,
//!    dropping slots bound to publishers that are neither `$backend` nor
//!    matched;
//! 4. walks buckets in ascending order, cloning the publisher context per
//!    subscriber and joining the whole cohort concurrently;
//! 5. processes outcomes in registration order: `Block` ends the dispatch
//!    after its cohort, `Stop` is local, failures are republished as
//!    [`ExceptionEvent`]s, values win in first-result mode.
//!
//! ## Ordering guarantees
//! - Subscribers at priority *p* observe the settled effects of every
//!   priority < *p* (the cohort join is a barrier).
//! - Within one cohort there is no order beyond concurrent fan-out.
//! - A `Block` from cohort *p* prevents cohort *p+1* from running; the
//!   blocking cohort itself always completes.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::context::{Context, CtxValue};
use crate::core::bus::EventBus;
use crate::error::HandlerError;
use crate::events::{AnyEvent, Event, ExceptionEvent, Publisher, BACKEND_PUBLISHER};
use crate::flow::{ExitFlow, Flow};
use crate::scopes::Slot;
use crate::subscribers::{panic_message, Subscriber};

/// An event on its way through dispatch.
#[derive(Clone)]
pub(crate) enum Published {
    /// A tagged event; its type names the sole publisher.
    Tagged {
        event: Arc<dyn AnyEvent>,
        value: CtxValue,
    },
    /// An external value; structural predicates select the publishers.
    External { value: CtxValue },
    /// A pulled value bound to its owning publisher (fetch loop).
    Pinned {
        publisher: Arc<Publisher>,
        value: CtxValue,
    },
}

impl Published {
    /// Wraps a tagged event.
    pub(crate) fn from_event<E: Event>(event: E) -> Self {
        let ev: Arc<E> = Arc::new(event);
        let value: CtxValue = ev.clone();
        Published::Tagged { event: ev, value }
    }

    /// The event as stored under `$event`.
    pub(crate) fn value(&self) -> &CtxValue {
        match self {
            Published::Tagged { value, .. } => value,
            Published::External { value } => value,
            Published::Pinned { value, .. } => value,
        }
    }

    /// True when this dispatch carries the exception channel's own event;
    /// failures inside it are swallowed instead of re-routed.
    pub(crate) fn is_exception(&self) -> bool {
        matches!(
            self,
            Published::Tagged { event, .. }
                if &*event.publisher_id() == crate::events::EXCEPTION_PUBLISHER
        )
    }
}

/// Runs one dispatch to completion.
///
/// Returns the winning value in first-result mode, `None` otherwise.
pub(crate) fn dispatch(
    bus: EventBus,
    event: Published,
    slots: Vec<Slot>,
    inherit: Option<Context>,
    first_result: bool,
) -> BoxFuture<'static, Option<CtxValue>> {
    // Type-erased at this boundary so the recursive dispatch →
    // route_failure → dispatch cycle has a concrete `Send` future to bottom
    // out on, keeping the recursive future's auto traits computable.
    Box::pin(dispatch_inner(bus, event, slots, inherit, first_result))
}

async fn dispatch_inner(
    bus: EventBus,
    event: Published,
    slots: Vec<Slot>,
    inherit: Option<Context>,
    first_result: bool,
) -> Option<CtxValue> {
    // 1. Resolve publishers.
    let matched: Vec<Arc<Publisher>> = match &event {
        Published::Tagged { event: ev, .. } => {
            vec![bus.ensure_tagged_publisher(ev.publisher_id(), ev.event_type())]
        }
        Published::External { value } => bus.resolve_structural(value),
        Published::Pinned { publisher, .. } => vec![Arc::clone(publisher)],
    };

    // 2. Gather one context per matched publisher.
    let mut contexts: BTreeMap<Arc<str>, Context> = BTreeMap::new();
    for publisher in &matched {
        let mut ctx = base_context(&event, &inherit);
        if let Err(e) = gather_into(&event, publisher, &mut ctx).await {
            bus.report(&format!("gather failed for `{}`: {e}", publisher.id()));
            continue;
        }
        contexts.insert(Arc::clone(publisher.id()), ctx);
    }

    // Backend subscribers join every dispatch; they see the first matched
    // publisher's context, or a bare event context when nothing matched.
    let backend_ctx = contexts
        .values()
        .next()
        .cloned()
        .unwrap_or_else(|| base_context(&event, &inherit));

    // 3. Bucket live slots by (priority, publisher-id).
    let mut buckets: BTreeMap<(u16, Arc<str>), Vec<Arc<Subscriber>>> = BTreeMap::new();
    for slot in slots {
        let is_backend = &*slot.publisher == BACKEND_PUBLISHER;
        if !is_backend && !contexts.contains_key(&slot.publisher) {
            continue;
        }
        if !slot.sub.is_available() {
            continue;
        }
        buckets
            .entry((slot.sub.priority(), slot.publisher))
            .or_default()
            .push(slot.sub);
    }

    // 4. Walk buckets ascending; each cohort fans out concurrently.
    for ((_priority, pub_id), subs) in buckets {
        let is_backend = &*pub_id == BACKEND_PUBLISHER;
        let base = if is_backend {
            &backend_ctx
        } else {
            &contexts[&pub_id]
        };
        let publisher = matched.iter().find(|p| *p.id() == pub_id);

        let cohort = subs.iter().map(|sub| {
            let ctx = base.clone();
            let sub = Arc::clone(sub);
            // Panics anywhere in the invocation (providers and propagators
            // included) are isolated here so one subscriber cannot take the
            // cohort down.
            std::panic::AssertUnwindSafe(sub.invoke(ctx)).catch_unwind()
        });
        let outcomes = join_all(cohort).await;

        // 5. Process outcomes in registration order.
        let mut blocked = false;
        for (sub, joined) in subs.iter().zip(outcomes) {
            let outcome = match joined {
                Ok(res) => res,
                Err(panic) => Err(HandlerError::Panicked(panic_message(panic))),
            };
            match outcome {
                Ok(Flow::Nothing) | Ok(Flow::Stop) => {}
                Ok(Flow::Block) => {
                    if first_result {
                        // BLOCK terminates first-result mode with no result.
                        return None;
                    }
                    blocked = true;
                }
                Ok(Flow::Value(v)) => {
                    if first_result && !blocked {
                        let event_ok = match &event {
                            Published::Tagged { event: ev, .. } => ev.validate_result(&v),
                            _ => true,
                        };
                        let publisher_ok =
                            publisher.map(|p| p.validate_result(&v)).unwrap_or(true);
                        if event_ok && publisher_ok {
                            return Some(v);
                        }
                        bus.report(&format!(
                            "result from `{}` rejected by check_result of `{pub_id}`",
                            sub.name()
                        ));
                    }
                }
                Err(HandlerError::Exit(ExitFlow::Stop)) => {}
                Err(HandlerError::Exit(ExitFlow::Block)) => {
                    if first_result {
                        return None;
                    }
                    blocked = true;
                }
                Err(e) => route_failure(&bus, &event, &pub_id, sub, e).await,
            }
        }
        if blocked {
            return None;
        }
    }
    None
}

/// Base context for one matched publisher: inherited pairs, the event value,
/// and the shared dependency cache.
fn base_context(event: &Published, inherit: &Option<Context>) -> Context {
    let mut ctx = inherit.clone().unwrap_or_default();
    ctx.set_event(event.value().clone());
    ctx.ensure_depend_cache();
    ctx
}

/// Runs the gather step: the publisher's supplier when set, the tagged
/// event's own `gather` otherwise.
async fn gather_into(
    event: &Published,
    publisher: &Arc<Publisher>,
    ctx: &mut Context,
) -> Result<(), HandlerError> {
    match event {
        Published::Tagged { event: ev, .. } => {
            ev.write_attrs(ctx).await?;
            publisher.supply_context(event.value(), ctx).await
        }
        Published::External { value } | Published::Pinned { value, .. } => {
            publisher.supply_context(value, ctx).await
        }
    }
}

/// Converts a handler failure into an `ExceptionEvent` and re-enters
/// dispatch with it, unless the failing dispatch *is* the exception channel.
async fn route_failure(
    bus: &EventBus,
    event: &Published,
    origin: &Arc<str>,
    sub: &Arc<Subscriber>,
    error: HandlerError,
) {
    // Dependency wrappers are unwrapped at this outermost frame so reports
    // carry the original failure.
    let error = error.unwrap_inner();

    if event.is_exception() {
        // Swallow to prevent recursive error loops.
        bus.report(&format!(
            "exception subscriber `{}` failed: {error}",
            sub.name()
        ));
        return;
    }

    let exc = ExceptionEvent::new(Arc::clone(origin), sub.info(), error);
    bus.report(&exc.render());

    let slots = bus.exception_slots();
    if slots.is_empty() {
        return;
    }
    // Boxed and type-erased: dispatch re-enters itself here, and the erasure
    // keeps the recursive future's auto traits computable.
    let republish: BoxFuture<'static, Option<CtxValue>> = dispatch(
        bus.clone(),
        Published::from_event(exc),
        slots,
        None,
        false,
    );
    republish.await;
}
