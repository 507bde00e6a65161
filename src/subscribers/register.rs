//! # Registration builder: the fluent attach chain.
//!
//! Produced by [`EventBus::on`](crate::EventBus::on) and friends; collects
//! priority, providers, propagators and flags, then `attach()` compiles the
//! handler's parameters against the layered provider sources and binds the
//! subscriber into its scope.
//!
//! ## Provider layering (highest precedence first)
//! 1. providers bound to the handler itself ([`Handle::providers`]);
//! 2. providers declared on the event type / publisher;
//! 3. providers given at registration ([`RegisterBuilder::provider`]);
//! 4. scope providers, then global providers and factories (the typed event
//!    provider for the registered event type is appended here).
//!
//! Param-level providers (`from_key`, `via`, `with_provider`, defaults) come
//! before all layers; the final list is priority-sorted (stable).
//!
//! ## Example
//! ```rust,no_run
//! # use eventvisor::*;
//! # use std::sync::Arc;
//! # async fn demo(bus: EventBus, handler: Arc<dyn Handle>, flagged: Selector) {
//! let sub = bus
//!     .use_publisher("metrics/sample", handler)
//!     .priority(8)
//!     .enter_if(flagged)
//!     .once()
//!     .attach()
//!     .unwrap();
//! # }
//! ```

use std::any::TypeId;
use std::sync::Arc;

use crate::core::bus::EventBus;
use crate::error::BusError;
use crate::events::{Publisher, BACKEND_PUBLISHER};
use crate::providers::{EventProvider, Provider};
use crate::scopes::Scope;
use crate::selector::Selector;
use crate::subscribers::handler::Handle;
use crate::subscribers::param::CompiledParam;
use crate::subscribers::propagator::{Propagate, PropagateFn, Spread};
use crate::subscribers::subscriber::Subscriber;

/// What a registration binds to.
pub enum Target {
    /// A tagged event type (publisher auto-created).
    Tagged {
        /// The event type's publisher id.
        id: Arc<str>,
        /// The concrete event type.
        type_id: TypeId,
        /// Providers declared on the event type.
        providers: Vec<Arc<dyn Provider>>,
    },
    /// An already-registered publisher id.
    Existing {
        /// The publisher id to bind to.
        id: Arc<str>,
    },
    /// No publisher: the subscriber joins every dispatch.
    Backend,
}

/// Fluent registration chain; finish with [`attach`](RegisterBuilder::attach).
pub struct RegisterBuilder {
    bus: EventBus,
    scope: Arc<Scope>,
    target: Target,
    handler: Arc<dyn Handle>,
    priority: u16,
    once: bool,
    skip_req_missing: bool,
    providers: Vec<Arc<dyn Provider>>,
    propagators: Vec<Arc<dyn Propagate>>,
}

impl RegisterBuilder {
    pub(crate) fn new(
        bus: EventBus,
        scope: Arc<Scope>,
        target: Target,
        handler: Arc<dyn Handle>,
    ) -> Self {
        let priority = bus.config().default_priority;
        Self {
            bus,
            scope,
            target,
            handler,
            priority,
            once: false,
            skip_req_missing: false,
            providers: Vec::new(),
            propagators: Vec::new(),
        }
    }

    /// Sets the subscriber priority (smaller runs earlier).
    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Disposes the subscriber after its first invocation.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Turns unresolved requirements into `Flow::Stop` instead of errors.
    pub fn skip_req_missing(mut self) -> Self {
        self.skip_req_missing = true;
        self
    }

    /// Adds a registration-layer provider.
    pub fn provider(mut self, p: Arc<dyn Provider>) -> Self {
        self.providers.push(p);
        self
    }

    /// Attaches a propagator to the subscriber.
    pub fn propagate(mut self, p: Arc<dyn Propagate>) -> Self {
        self.propagators.push(p);
        self
    }

    /// Runs the body only when the selector is truthy for the dispatch.
    pub fn enter_if(self, selector: Selector) -> Self {
        self.gate(selector, false)
    }

    /// Skips the body when the selector is truthy for the dispatch.
    pub fn bypass_if(self, selector: Selector) -> Self {
        self.gate(selector, true)
    }

    fn gate(mut self, selector: Selector, invert: bool) -> Self {
        let p = PropagateFn::before(move |ctx| {
            let hit = selector.check(&ctx);
            async move {
                if hit != invert {
                    Ok(Spread::Nothing)
                } else {
                    Ok(Spread::Stop)
                }
            }
        })
        .arc();
        self.propagators.push(p);
        self
    }

    /// Compiles the handler and binds the subscriber into the scope.
    ///
    /// Fails with [`BusError::PublisherNotFound`] for an unknown publisher
    /// id, or [`BusError::Rejected`] when the publisher's `check` gate turns
    /// the subscriber away (the subscriber is simply not bound; this is not
    /// routed as an exception).
    pub fn attach(self) -> Result<Arc<Subscriber>, BusError> {
        let (publisher, publisher_id, event_type, event_providers): (
            Option<Arc<Publisher>>,
            Arc<str>,
            Option<TypeId>,
            Vec<Arc<dyn Provider>>,
        ) = match &self.target {
            Target::Tagged {
                id,
                type_id,
                providers,
            } => {
                let publisher = self
                    .bus
                    .ensure_tagged_publisher(Arc::clone(id), *type_id);
                let mut evp = providers.clone();
                evp.extend(publisher.providers());
                (Some(publisher), Arc::clone(id), Some(*type_id), evp)
            }
            Target::Existing { id } => {
                let publisher =
                    self.bus
                        .publisher(id)
                        .ok_or_else(|| BusError::PublisherNotFound {
                            id: id.to_string(),
                        })?;
                let evp = publisher.providers();
                let event_type = publisher.event_type();
                (Some(publisher), Arc::clone(id), event_type, evp)
            }
            Target::Backend => (None, Arc::from(BACKEND_PUBLISHER), None, Vec::new()),
        };

        // Layered provider sources, highest precedence first.
        let handler_layer = self.handler.providers();
        let registration_layer = self.providers;
        let mut ambient_layer = self.scope.providers();
        ambient_layer.extend(self.bus.global_providers());
        if let Some(type_id) = event_type {
            ambient_layer.push(Arc::new(EventProvider::of_type(type_id)));
        }
        let mut factories = self.scope.factories();
        factories.extend(self.bus.global_factories());

        let layers: [&[Arc<dyn Provider>]; 4] = [
            &handler_layer,
            &event_providers,
            &registration_layer,
            &ambient_layer,
        ];
        let params: Vec<CompiledParam> = self
            .handler
            .params()
            .to_vec()
            .into_iter()
            .map(|p| CompiledParam::compile(p, &layers, &factories))
            .collect();

        let mut propagators = self.scope.propagators();
        propagators.extend(self.propagators);

        let sub = Subscriber::new(
            self.handler,
            params,
            propagators,
            self.priority,
            self.once,
            self.skip_req_missing,
        );

        if let Some(publisher) = &publisher {
            if !publisher.admit(&sub) {
                return Err(BusError::Rejected {
                    id: publisher.id().to_string(),
                });
            }
        }

        self.scope.add_slot(Arc::clone(&sub), publisher_id);
        Ok(sub)
    }
}
