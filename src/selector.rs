//! # Selector: a recorded path over the gathered event context.
//!
//! The dynamic original records attribute access on a proxy object; the
//! statically-typed equivalent is an explicit path builder. A [`Selector`]
//! records steps — gathered-attribute lookups, typed accessors, and terminal
//! tests — and [`Selector::generate`] turns the recording into a plain
//! `Fn(&Context) -> Option<CtxValue>` that walks it per dispatch.
//!
//! Attribute steps read the keys the event's `gather` wrote (falling through
//! to plain context keys, which is the same namespace); typed steps run
//! against the current value; terminal steps short-circuit into a boolean.
//!
//! ## Example
//! ```rust
//! use eventvisor::Selector;
//!
//! // "event.flag == true" without writing a closure at the call site:
//! let sel = Selector::event().key("flag").eq(true);
//! ```
//!
//! Used by `enter_if` / `bypass_if` on the register builder, and available to
//! parameters via `Param::via`.

use std::sync::Arc;

use crate::context::{cast, val, Context, CtxValue};

type MapFn = Arc<dyn Fn(&CtxValue) -> Option<CtxValue> + Send + Sync>;
type TestFn = Arc<dyn Fn(&CtxValue) -> bool + Send + Sync>;

enum Step {
    /// Gathered attribute / context key lookup.
    Key(Arc<str>),
    /// Typed accessor applied to the current value.
    Map(MapFn),
    /// Terminal predicate; the walk short-circuits to a boolean.
    Test(TestFn),
}

/// A recorded path over the event's gathered attributes.
///
/// Cheap to clone; cloning shares the recorded steps.
#[derive(Clone, Default)]
pub struct Selector {
    steps: Vec<Arc<Step>>,
}

impl Selector {
    /// Starts a recording rooted at the published event.
    ///
    /// The root value is `ctx[$event]`; the first [`key`](Selector::key) step
    /// reads the gathered attribute of that event.
    pub fn event() -> Self {
        Self::default()
    }

    /// Walks to a gathered attribute (or plain context key) by name.
    pub fn key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.steps.push(Arc::new(Step::Key(key.into())));
        self
    }

    /// Applies a typed accessor to the current value.
    ///
    /// Misses (wrong type or `None` result) make the whole walk yield nothing.
    pub fn map<T, U, F>(mut self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> Option<U> + Send + Sync + 'static,
    {
        let map: MapFn = Arc::new(move |v| cast::<T>(v).and_then(|t| f(&t)).map(val));
        self.steps.push(Arc::new(Step::Map(map)));
        self
    }

    /// Terminal: current value equals `rhs`.
    pub fn eq<T>(self, rhs: T) -> Self
    where
        T: PartialEq + Send + Sync + 'static,
    {
        self.test(move |v: &T| *v == rhs)
    }

    /// Terminal: current value differs from `rhs`.
    pub fn ne<T>(self, rhs: T) -> Self
    where
        T: PartialEq + Send + Sync + 'static,
    {
        self.test(move |v: &T| *v != rhs)
    }

    /// Terminal: arbitrary typed predicate over the current value.
    ///
    /// A value of the wrong concrete type fails the test.
    pub fn test<T, F>(mut self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let test: TestFn = Arc::new(move |v| cast::<T>(v).map(|t| f(&t)).unwrap_or(false));
        self.steps.push(Arc::new(Step::Test(test)));
        self
    }

    /// Compiles the recording into a walker over one dispatch's context.
    ///
    /// The walker returns `None` when any step misses; terminal steps return
    /// the boolean they produced.
    pub fn generate(&self) -> impl Fn(&Context) -> Option<CtxValue> + Send + Sync + 'static {
        let steps = self.steps.clone();
        move |ctx: &Context| {
            let mut current: Option<CtxValue> = ctx.event().cloned();
            for step in &steps {
                match &**step {
                    Step::Key(key) => {
                        // Gathered attributes and context keys share one
                        // namespace; absent keys end the walk.
                        current = ctx.get_cloned(key);
                        current.as_ref()?;
                    }
                    Step::Map(f) => {
                        let v = current.as_ref()?;
                        current = f(v);
                        current.as_ref()?;
                    }
                    Step::Test(f) => {
                        let v = current.as_ref()?;
                        return Some(val(f(v)));
                    }
                }
            }
            current
        }
    }

    /// Evaluates the selector as a truthy predicate against a context.
    ///
    /// A missing walk, a `false` terminal, or a `false` boolean value are all
    /// falsy; any other produced value is truthy.
    pub fn check(&self, ctx: &Context) -> bool {
        match self.generate()(ctx) {
            None => false,
            Some(v) => cast::<bool>(&v).map(|b| *b).unwrap_or(true),
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Selector({} steps)", self.steps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::val;

    fn ctx_with(key: &str, v: CtxValue) -> Context {
        let mut ctx = Context::new();
        ctx.insert(key, v);
        ctx
    }

    #[test]
    fn test_key_walk_reads_gathered_attribute() {
        let ctx = ctx_with("flag", val(true));
        let sel = Selector::event().key("flag");
        let out = sel.generate()(&ctx).expect("hit");
        assert_eq!(*cast::<bool>(&out).unwrap(), true);
    }

    #[test]
    fn test_terminal_eq_short_circuits() {
        let ctx = ctx_with("flag", val(true));
        assert!(Selector::event().key("flag").eq(true).check(&ctx));
        assert!(!Selector::event().key("flag").eq(false).check(&ctx));
    }

    #[test]
    fn test_missing_key_is_falsy() {
        let ctx = Context::new();
        assert!(!Selector::event().key("absent").eq(1_i32).check(&ctx));
    }

    #[test]
    fn test_map_applies_typed_accessor() {
        let ctx = ctx_with("msg", val(String::from("continue!")));
        let sel = Selector::event()
            .key("msg")
            .map(|s: &String| Some(s.len()))
            .eq(9_usize);
        assert!(sel.check(&ctx));
    }

    #[test]
    fn test_wrong_type_fails_test() {
        let ctx = ctx_with("flag", val(1_i32));
        assert!(!Selector::event().key("flag").eq(true).check(&ctx));
    }
}
