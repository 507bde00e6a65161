//! # Scope: a named, enable-able collection of subscribers.
//!
//! A scope owns `(subscriber, publisher-id)` slots in registration order and
//! contributes inherited providers/propagators to every subscriber registered
//! through it. The process-wide `$global` scope always exists; additional
//! scopes are created through the bus and addressed by explicit handles.
//!
//! ## Rules
//! - Disabling a scope hides all its slots from enumeration; the flag is
//!   checked per dispatch, so in-flight cohorts finish undisturbed.
//! - Disposing empties the scope and disposes every subscriber (their
//!   dispose hooks run).
//! - Slot enumeration filters out disposed subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::providers::{Provider, ProviderFactory};
use crate::subscribers::{Propagate, Subscriber};

/// Id of the always-present global scope.
pub const GLOBAL_SCOPE: &str = "$global";

/// One registration: a subscriber bound to a publisher id.
#[derive(Clone)]
pub(crate) struct Slot {
    pub(crate) sub: Arc<Subscriber>,
    pub(crate) publisher: Arc<str>,
}

/// Named bucket of subscribers with inherited providers and propagators.
pub struct Scope {
    id: Arc<str>,
    enabled: AtomicBool,
    slots: RwLock<Vec<Slot>>,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    factories: RwLock<Vec<Arc<dyn ProviderFactory>>>,
    propagators: RwLock<Vec<Arc<dyn Propagate>>>,
}

impl Scope {
    /// Creates an enabled, empty scope.
    pub(crate) fn new(id: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            enabled: AtomicBool::new(true),
            slots: RwLock::new(Vec::new()),
            providers: RwLock::new(Vec::new()),
            factories: RwLock::new(Vec::new()),
            propagators: RwLock::new(Vec::new()),
        })
    }

    /// The scope id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the scope participates in dispatch.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Re-enables the scope.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Hides the scope from subsequent dispatches.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Adds an inherited provider prepended to future registrations.
    pub fn add_provider(&self, p: Arc<dyn Provider>) {
        self.providers.write().expect("scope poisoned").push(p);
    }

    /// Adds an inherited provider factory.
    pub fn add_factory(&self, f: Arc<dyn ProviderFactory>) {
        self.factories.write().expect("scope poisoned").push(f);
    }

    /// Adds an inherited propagator attached to future registrations.
    pub fn add_propagator(&self, p: Arc<dyn Propagate>) {
        self.propagators.write().expect("scope poisoned").push(p);
    }

    /// Snapshot of inherited providers.
    pub(crate) fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.read().expect("scope poisoned").clone()
    }

    /// Snapshot of inherited factories.
    pub(crate) fn factories(&self) -> Vec<Arc<dyn ProviderFactory>> {
        self.factories.read().expect("scope poisoned").clone()
    }

    /// Snapshot of inherited propagators.
    pub(crate) fn propagators(&self) -> Vec<Arc<dyn Propagate>> {
        self.propagators.read().expect("scope poisoned").clone()
    }

    /// Binds a subscriber to a publisher id within this scope.
    pub(crate) fn add_slot(self: &Arc<Self>, sub: Arc<Subscriber>, publisher: Arc<str>) {
        sub.bind_owner(self);
        self.slots
            .write()
            .expect("scope poisoned")
            .push(Slot { sub, publisher });
    }

    /// Removes a subscriber by id (no dispose; the subscriber drives that).
    pub(crate) fn remove_subscriber(&self, id: u64) {
        self.slots
            .write()
            .expect("scope poisoned")
            .retain(|s| s.sub.id() != id);
    }

    /// Registration-ordered snapshot of live slots.
    pub(crate) fn live_slots(&self) -> Vec<Slot> {
        self.slots
            .read()
            .expect("scope poisoned")
            .iter()
            .filter(|s| s.sub.is_available())
            .cloned()
            .collect()
    }

    /// Looks up a live subscriber by id.
    pub fn subscriber(&self, id: u64) -> Option<Arc<Subscriber>> {
        self.slots
            .read()
            .expect("scope poisoned")
            .iter()
            .find(|s| s.sub.id() == id && s.sub.is_available())
            .map(|s| Arc::clone(&s.sub))
    }

    /// Number of registered slots (disposed ones are pruned lazily).
    pub fn len(&self) -> usize {
        self.slots.read().expect("scope poisoned").len()
    }

    /// True when no subscribers are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.read().expect("scope poisoned").is_empty()
    }

    /// Disables the scope, then disposes and drops every subscriber.
    pub fn dispose(&self) {
        self.disable();
        let drained: Vec<Slot> = {
            let mut slots = self.slots.write().expect("scope poisoned");
            slots.drain(..).collect()
        };
        for slot in drained {
            slot.sub.dispose();
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scope(`{}`, {} slots, enabled={})",
            self.id,
            self.len(),
            self.is_enabled()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::subscribers::HandlerFn;

    fn noop_subscriber() -> Arc<Subscriber> {
        let h = HandlerFn::arc("noop", Vec::new(), |_args| async { Ok(Flow::Nothing) });
        Subscriber::new(h, Vec::new(), Vec::new(), 16, false, false)
    }

    #[test]
    fn test_enable_disable() {
        let scope = Scope::new("test");
        assert!(scope.is_enabled());
        scope.disable();
        assert!(!scope.is_enabled());
        scope.enable();
        assert!(scope.is_enabled());
    }

    #[test]
    fn test_dispose_empties_and_severs_subscribers() {
        let scope = Scope::new("test");
        let sub = noop_subscriber();
        scope.add_slot(Arc::clone(&sub), Arc::from("$backend"));
        assert_eq!(scope.len(), 1);

        scope.dispose();
        assert!(scope.is_empty());
        assert!(!sub.is_available());
        assert!(!scope.is_enabled());
    }

    #[test]
    fn test_subscriber_dispose_removes_its_slot() {
        let scope = Scope::new("test");
        let sub = noop_subscriber();
        scope.add_slot(Arc::clone(&sub), Arc::from("$backend"));
        sub.dispose();
        assert!(scope.is_empty());
    }

    #[test]
    fn test_live_slots_filter_disposed() {
        let scope = Scope::new("test");
        let a = noop_subscriber();
        let b = noop_subscriber();
        scope.add_slot(Arc::clone(&a), Arc::from("$backend"));
        scope.add_slot(Arc::clone(&b), Arc::from("$backend"));
        // Flip availability without going through dispose to mimic an
        // in-flight disposal observed mid-enumeration.
        b.dispose();
        let live = scope.live_slots();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].sub.id(), a.id());
    }
}
