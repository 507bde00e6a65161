//! # Collector: multiple declared signatures behind one synthetic publisher.
//!
//! A [`CollectGroup`] registers one structural publisher whose predicate
//! accepts a [`FieldMap`] (named fields) or an [`ArgList`] (positional
//! values convertible by declared parameter order) when **any** collected
//! signature matches its shape:
//! - every required (non-defaulted) parameter name is present, and
//! - each present value's concrete type satisfies the declared expectation
//!   (union alternatives included).
//!
//! On match, the supplier writes each field under the synthetic key
//! `{group-id}_{name}`; collected subscribers read their parameters from
//! those keys through type-checked key providers, so a subscriber whose own
//! signature does not fit the incoming shape quietly stops instead of
//! erroring (`skip_req_missing`).
//!
//! Signatures with union-typed parameters are also expanded into every
//! exact-type combination so [`CollectGroup::matches_types`] lookups by
//! concrete tuple find the group.
//!
//! ## Example
//! ```rust,no_run
//! # use eventvisor::*;
//! # use std::sync::Arc;
//! # fn demo(bus: EventBus, handler: Arc<dyn Handle>) {
//! let group = CollectGroup::new(&bus, "calc/add");
//! group.collect(handler).unwrap();
//! group.publish_args(ArgList::new().with(val(2_i32)).with(val(String::from("2"))));
//! # }
//! ```

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::context::{Context, CtxValue};
use crate::core::{DispatchHandle, EventBus};
use crate::error::BusError;
use crate::events::GatherFn;
use crate::providers::KeyProvider;
use crate::subscribers::{Handle, Subscriber, TypeExpect};

/// Collected signatures index at most this many exact-type expansions each.
const MAX_EXPANSIONS: usize = 64;

/// A named-field event value for collected publishers.
#[derive(Clone, Default)]
pub struct FieldMap {
    fields: HashMap<String, CtxValue>,
}

impl FieldMap {
    /// Creates an empty field map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field (builder form).
    pub fn with(mut self, name: impl Into<String>, value: CtxValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Looks up a field.
    pub fn get(&self, name: &str) -> Option<&CtxValue> {
        self.fields.get(name)
    }

    /// Field iteration in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CtxValue)> {
        self.fields.iter()
    }

    /// True when the field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

/// A positional event value for collected publishers.
#[derive(Clone, Default)]
pub struct ArgList {
    values: Vec<CtxValue>,
}

impl ArgList {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value (builder form).
    pub fn with(mut self, value: CtxValue) -> Self {
        self.values.push(value);
        self
    }

    /// The positional values in order.
    pub fn values(&self) -> &[CtxValue] {
        &self.values
    }

    /// Number of positional values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<CtxValue>> for ArgList {
    fn from(values: Vec<CtxValue>) -> Self {
        Self { values }
    }
}

/// One collected signature: names, expectations, and which are required.
struct Signature {
    params: Vec<(Arc<str>, TypeExpect, bool)>,
}

impl Signature {
    fn required(&self) -> usize {
        self.params.iter().filter(|(_, _, req)| *req).count()
    }

    fn matches_map(&self, map: &FieldMap) -> bool {
        for (name, expect, required) in &self.params {
            match map.get(name) {
                Some(v) => {
                    if !expect.accepts(v) {
                        return false;
                    }
                }
                None => {
                    if *required {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn matches_list(&self, list: &ArgList) -> bool {
        if list.len() < self.required() || list.len() > self.params.len() {
            return false;
        }
        self.params
            .iter()
            .zip(list.values())
            .all(|((_, expect, _), v)| expect.accepts(v))
    }

    /// Every exact-type tuple this signature answers to (unions expanded).
    fn expansions(&self) -> Vec<Vec<TypeId>> {
        let mut combos: Vec<Vec<TypeId>> = vec![Vec::new()];
        for (_, expect, _) in &self.params {
            let alts = expect.alternatives();
            if alts.is_empty() {
                // An undeclared type cannot be indexed by exact tuple.
                return Vec::new();
            }
            let mut next = Vec::new();
            for combo in &combos {
                for alt in &alts {
                    let mut c = combo.clone();
                    c.push(*alt);
                    next.push(c);
                    if next.len() > MAX_EXPANSIONS {
                        return next;
                    }
                }
            }
            combos = next;
        }
        combos
    }
}

struct GroupState {
    id: Arc<str>,
    signatures: RwLock<Vec<Arc<Signature>>>,
    index: RwLock<HashSet<Vec<TypeId>>>,
}

impl GroupState {
    fn matches(&self, value: &CtxValue) -> bool {
        let signatures = self.signatures.read().expect("collector poisoned");
        if let Some(map) = value.downcast_ref::<FieldMap>() {
            return signatures.iter().any(|s| s.matches_map(map));
        }
        if let Some(list) = value.downcast_ref::<ArgList>() {
            return signatures.iter().any(|s| s.matches_list(list));
        }
        false
    }

    /// First signature matching a positional list decides the field order.
    fn zip_list(&self, list: &ArgList) -> Option<Vec<(Arc<str>, CtxValue)>> {
        let signatures = self.signatures.read().expect("collector poisoned");
        let sig = signatures.iter().find(|s| s.matches_list(list))?;
        Some(
            sig.params
                .iter()
                .zip(list.values())
                .map(|((name, _, _), v)| (Arc::clone(name), v.clone()))
                .collect(),
        )
    }
}

/// A family of declared signatures sharing one dispatch entry point.
pub struct CollectGroup {
    bus: EventBus,
    state: Arc<GroupState>,
}

impl CollectGroup {
    /// Creates the group and registers its synthetic publisher.
    pub fn new(bus: &EventBus, id: &str) -> Self {
        let state = Arc::new(GroupState {
            id: Arc::from(id),
            signatures: RwLock::new(Vec::new()),
            index: RwLock::new(HashSet::new()),
        });

        let for_predicate = Arc::clone(&state);
        let publisher = bus.define(id, move |value| for_predicate.matches(value));

        let for_supplier = Arc::clone(&state);
        publisher.gather(GatherFn::arc(move |event, mut ctx: Context| {
            let state = Arc::clone(&for_supplier);
            async move {
                if let Some(map) = event.downcast_ref::<FieldMap>() {
                    for (name, value) in map.iter() {
                        ctx.insert(format!("{}_{}", state.id, name), value.clone());
                    }
                } else if let Some(list) = event.downcast_ref::<ArgList>() {
                    if let Some(pairs) = state.zip_list(list) {
                        for (name, value) in pairs {
                            ctx.insert(format!("{}_{}", state.id, name), value);
                        }
                    }
                }
                Ok(ctx)
            }
        }));

        Self {
            bus: bus.clone(),
            state,
        }
    }

    /// The synthetic publisher id.
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Collects a handler signature into the group and registers it.
    pub fn collect(&self, handler: Arc<dyn Handle>) -> Result<Arc<Subscriber>, BusError> {
        let signature = Arc::new(Signature {
            params: handler
                .params()
                .iter()
                .map(|p| {
                    let required = p.default().is_none() && !p.is_dependent();
                    (Arc::from(p.name()), p.expect().clone(), required)
                })
                .collect(),
        });

        {
            let mut index = self.state.index.write().expect("collector poisoned");
            for combo in signature.expansions() {
                index.insert(combo);
            }
            self.state
                .signatures
                .write()
                .expect("collector poisoned")
                .push(Arc::clone(&signature));
        }

        // Each parameter reads its synthetic key, type-checked so a value of
        // the wrong shape is a quiet miss for this subscriber only.
        let mut builder = self
            .bus
            .use_publisher(&self.state.id, handler)
            .skip_req_missing();
        for (name, expect, _) in &signature.params {
            let key = format!("{}_{}", self.state.id, name);
            let alternatives = expect.alternatives();
            let mut provider = KeyProvider::new(key).for_param(Arc::clone(name)).priority(10);
            if !alternatives.is_empty() {
                provider = provider.expecting(alternatives);
            }
            builder = builder.provider(Arc::new(provider));
        }
        builder.attach()
    }

    /// Exact-type tuple lookup over the expanded signature index.
    pub fn matches_types(&self, types: &[TypeId]) -> bool {
        self.state
            .index
            .read()
            .expect("collector poisoned")
            .contains(types)
    }

    /// Publishes a named-field value through the group's publisher.
    pub fn publish_map(&self, map: FieldMap) -> DispatchHandle {
        self.bus.publish_external(map)
    }

    /// Publishes a positional value through the group's publisher.
    pub fn publish_args(&self, args: ArgList) -> DispatchHandle {
        self.bus.publish_external(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;
    use crate::subscribers::Param;

    fn sig(params: Vec<Param>) -> Signature {
        Signature {
            params: params
                .iter()
                .map(|p| {
                    (
                        Arc::from(p.name()),
                        p.expect().clone(),
                        p.default().is_none(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_map_matching_requires_all_required_names() {
        let s = sig(vec![Param::of::<i32>("a"), Param::of::<i32>("b").or::<String>()]);
        let ok = FieldMap::new()
            .with("a", val(2_i32))
            .with("b", val(String::from("2")));
        assert!(s.matches_map(&ok));

        let missing_b = FieldMap::new().with("a", val(4_i32)).with("c", val(4_i32));
        assert!(!s.matches_map(&missing_b));
    }

    #[test]
    fn test_map_matching_checks_types() {
        let s = sig(vec![Param::of::<i32>("a")]);
        let wrong = FieldMap::new().with("a", val(String::from("x")));
        assert!(!s.matches_map(&wrong));
    }

    #[test]
    fn test_list_matching_by_order() {
        let s = sig(vec![Param::of::<i32>("a"), Param::of::<i32>("b").or::<String>()]);
        let ok = ArgList::new().with(val(2_i32)).with(val(String::from("2")));
        assert!(s.matches_list(&ok));

        let too_many = ArgList::new()
            .with(val(1_i32))
            .with(val(2_i32))
            .with(val(3_i32));
        assert!(!s.matches_list(&too_many));

        let wrong_order = ArgList::new().with(val(String::from("2"))).with(val(2_i32));
        assert!(!s.matches_list(&wrong_order));
    }

    #[test]
    fn test_union_expansion_indexes_all_alternatives() {
        let s = sig(vec![Param::of::<i32>("a"), Param::of::<i32>("b").or::<String>()]);
        let combos = s.expansions();
        assert_eq!(combos.len(), 2);
        assert!(combos.contains(&vec![TypeId::of::<i32>(), TypeId::of::<i32>()]));
        assert!(combos.contains(&vec![TypeId::of::<i32>(), TypeId::of::<String>()]));
    }
}
