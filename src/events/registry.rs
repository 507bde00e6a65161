//! # Publisher registry: id → publisher, with two resolution modes.
//!
//! - *Tagged*: the event's type advertises its publisher id; that publisher
//!   is the sole match (auto-created on first use).
//! - *Structural*: every registered publisher whose predicate accepts the
//!   external value matches.
//!
//! Registering an id that already exists **rebinds** it.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::context::CtxValue;
use crate::events::publisher::{Predicate, Publisher};

/// Process-wide (per bus) publisher registry.
#[derive(Default)]
pub(crate) struct PublisherRegistry {
    map: RwLock<HashMap<Arc<str>, Arc<Publisher>>>,
}

impl PublisherRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers (or rebinds) a publisher under its id.
    pub(crate) fn insert(&self, publisher: Arc<Publisher>) {
        self.map
            .write()
            .expect("registry poisoned")
            .insert(Arc::clone(publisher.id()), publisher);
    }

    /// Looks up a publisher by id.
    pub(crate) fn get(&self, id: &str) -> Option<Arc<Publisher>> {
        self.map.read().expect("registry poisoned").get(id).cloned()
    }

    /// Returns the tagged publisher for an event type, creating it on first
    /// use.
    pub(crate) fn ensure_tagged(&self, id: Arc<str>, type_id: TypeId) -> Arc<Publisher> {
        if let Some(p) = self.get(&id) {
            return p;
        }
        let p = Publisher::tagged(Arc::clone(&id), type_id);
        self.insert(Arc::clone(&p));
        p
    }

    /// Registers a structural publisher over external values.
    pub(crate) fn define(&self, id: Arc<str>, predicate: Predicate) -> Arc<Publisher> {
        let p = Publisher::external(id, predicate);
        self.insert(Arc::clone(&p));
        p
    }

    /// All publishers whose structural predicate accepts the value.
    pub(crate) fn resolve_structural(&self, value: &CtxValue) -> Vec<Arc<Publisher>> {
        self.map
            .read()
            .expect("registry poisoned")
            .values()
            .filter(|p| p.matches(value))
            .cloned()
            .collect()
    }

    /// Snapshot of every registered publisher (fetch-loop setup).
    pub(crate) fn all(&self) -> Vec<Arc<Publisher>> {
        self.map
            .read()
            .expect("registry poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;

    #[test]
    fn test_rebind_replaces_publisher() {
        let reg = PublisherRegistry::new();
        let first = reg.define(Arc::from("x"), Arc::new(|_| true));
        let second = Publisher::external(Arc::from("x"), Arc::new(|_| false));
        reg.insert(Arc::clone(&second));
        let got = reg.get("x").unwrap();
        assert!(!Arc::ptr_eq(&got, &first));
        assert!(Arc::ptr_eq(&got, &second));
    }

    #[test]
    fn test_structural_resolution_matches_all_predicates() {
        let reg = PublisherRegistry::new();
        reg.define(Arc::from("ints"), Arc::new(|v| (**v).is::<i32>()));
        reg.define(Arc::from("any"), Arc::new(|_| true));
        reg.define(Arc::from("strings"), Arc::new(|v| (**v).is::<String>()));

        let matched = reg.resolve_structural(&val(3_i32));
        let mut ids: Vec<_> = matched.iter().map(|p| p.id().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["any", "ints"]);
    }

    #[test]
    fn test_ensure_tagged_is_idempotent() {
        let reg = PublisherRegistry::new();
        let a = reg.ensure_tagged(Arc::from("$event:T"), TypeId::of::<i32>());
        let b = reg.ensure_tagged(Arc::from("$event:T"), TypeId::of::<i32>());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
