//! # Typed key/value bag shared through a single dispatch.
//!
//! A [`Context`] is built once per matched publisher (its supplier gathers
//! the event's attributes into it) and then **copied per subscriber**, so
//! mutations never cross subscriber boundaries except through the reserved
//! slots the engine writes back.
//!
//! ## Reserved keys
//! | Key | Contents |
//! |---|---|
//! | `$event` | the published event value |
//! | `$subscriber` | the currently invoked subscriber |
//! | `$result` | result slot written before post-propagators run |
//! | `$error` | error slot for the exception channel |
//! | `$depend_cache` | per-dispatch memo for cached `Depends` parameters |
//! | `$cleanup` | the invocation's async cleanup stack |
//!
//! ## Rules
//! - Lookup by parameter name is the **first** step of parameter resolution.
//! - The dependency cache is shared by every subscriber copy of one dispatch
//!   (it sits behind an `Arc` that cloning preserves).
//! - `snapshot()` renders sorted keys with best-effort type labels; it is the
//!   context part of unresolved-requirement reports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::cleanup::CleanupStack;
use super::value::{type_label, CtxValue};

/// Key under which the published event value is stored.
pub const EVENT: &str = "$event";
/// Key under which the active subscriber is stored.
pub const SUBSCRIBER: &str = "$subscriber";
/// Result slot, written before post-propagators run.
pub const RESULT: &str = "$result";
/// Error slot used by the exception channel.
pub const ERROR: &str = "$error";
/// Per-dispatch dependency cache slot.
pub const DEPEND_CACHE: &str = "$depend_cache";
/// Per-invocation async cleanup stack slot.
pub const CLEANUP: &str = "$cleanup";

/// Per-dispatch memo for cached dependency results, keyed by handler identity.
pub(crate) type DependCache = Mutex<HashMap<usize, CtxValue>>;

/// Key/value bag scoped to one dispatch.
#[derive(Clone, Default)]
pub struct Context {
    map: HashMap<Arc<str>, CtxValue>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<Arc<str>>, value: CtxValue) {
        self.map.insert(key.into(), value);
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&CtxValue> {
        self.map.get(key)
    }

    /// Looks up and clones the value handle (cheap: `Arc` clone).
    pub fn get_cloned(&self, key: &str) -> Option<CtxValue> {
        self.map.get(key).cloned()
    }

    /// Typed lookup; `None` when the key is absent or the type differs.
    pub fn get_as<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.map
            .get(key)
            .and_then(|v| Arc::clone(v).downcast::<T>().ok())
    }

    /// True when `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&mut self, key: &str) -> Option<CtxValue> {
        self.map.remove(key)
    }

    /// Merges `pairs` into the context (later keys win).
    pub fn extend<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (Arc<str>, CtxValue)>,
    {
        self.map.extend(pairs);
    }

    /// Number of stored keys (reserved slots included).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // ---- reserved slots ----

    /// The published event value, if the dispatch installed one.
    pub fn event(&self) -> Option<&CtxValue> {
        self.get(EVENT)
    }

    /// Installs the published event value.
    pub(crate) fn set_event(&mut self, event: CtxValue) {
        self.insert(EVENT, event);
    }

    /// The invocation's cleanup stack, when installed.
    pub(crate) fn cleanup(&self) -> Option<CleanupStack> {
        self.get_as::<CleanupStack>(CLEANUP).map(|s| (*s).clone())
    }

    /// Installs a fresh cleanup stack and returns a handle to it.
    pub(crate) fn install_cleanup(&mut self) -> CleanupStack {
        let stack = CleanupStack::new();
        self.insert(CLEANUP, Arc::new(stack.clone()));
        stack
    }

    /// The per-dispatch dependency cache, when installed.
    pub(crate) fn depend_cache(&self) -> Option<Arc<DependCache>> {
        self.get_as::<Arc<DependCache>>(DEPEND_CACHE)
            .map(|v| Arc::clone(&*v))
    }

    /// Installs the per-dispatch dependency cache (idempotent).
    pub(crate) fn ensure_depend_cache(&mut self) -> Arc<DependCache> {
        if let Some(cache) = self.depend_cache() {
            return cache;
        }
        let cache: Arc<DependCache> = Arc::new(Mutex::new(HashMap::new()));
        self.insert(DEPEND_CACHE, Arc::new(Arc::clone(&cache)));
        cache
    }

    /// Renders sorted keys with best-effort type labels.
    ///
    /// This is the context half of an unresolved-requirement report.
    pub fn snapshot(&self) -> String {
        let mut keys: Vec<&Arc<str>> = self.map.keys().collect();
        keys.sort();
        let body = keys
            .into_iter()
            .map(|k| format!("{k}: {}", type_label(&self.map[k])))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{body}}}")
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Context{}", self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;

    #[test]
    fn test_insert_get_typed() {
        let mut ctx = Context::new();
        ctx.insert("foo", val(String::from("f")));
        assert!(ctx.contains("foo"));
        assert_eq!(*ctx.get_as::<String>("foo").unwrap(), "f");
        assert!(ctx.get_as::<i32>("foo").is_none());
    }

    #[test]
    fn test_copies_do_not_leak_mutations() {
        let mut base = Context::new();
        base.insert("n", val(1_i32));
        let mut copy = base.clone();
        copy.insert("n", val(2_i32));
        copy.insert("extra", val(true));
        assert_eq!(*base.get_as::<i32>("n").unwrap(), 1);
        assert!(!base.contains("extra"));
    }

    #[test]
    fn test_depend_cache_shared_across_copies() {
        let mut base = Context::new();
        let cache = base.ensure_depend_cache();
        let copy = base.clone();
        cache.lock().unwrap().insert(7, val(42_i32));
        let seen = copy.depend_cache().expect("cache present");
        assert!(seen.lock().unwrap().contains_key(&7));
    }

    #[test]
    fn test_snapshot_sorted_and_labeled() {
        let mut ctx = Context::new();
        ctx.insert("b", val(2_i32));
        ctx.insert("a", val(String::from("x")));
        assert_eq!(ctx.snapshot(), "{a: String, b: i32}");
    }
}
