//! Dynamic values flowing through a dispatch.
//!
//! A [`CtxValue`] is a cheaply clonable, type-erased handle. Typed access
//! goes through `Arc::downcast`; [`Nil`] is the designated empty value so the
//! engine can tell "supplied an empty value on purpose" apart from "could not
//! supply anything".

use std::any::Any;
use std::sync::Arc;

/// A type-erased, shareable value stored in a [`Context`](super::Context).
pub type CtxValue = Arc<dyn Any + Send + Sync>;

/// The designated empty value.
///
/// A provider result carrying `Nil` is treated as a miss during parameter
/// resolution unless it arrives wrapped in `Supply::Force`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nil;

/// Wraps a concrete value into a [`CtxValue`].
///
/// ## Example
/// ```rust
/// use eventvisor::val;
///
/// let v = val(42_i32);
/// assert_eq!(*v.downcast::<i32>().unwrap(), 42);
/// ```
pub fn val<T: Send + Sync + 'static>(v: T) -> CtxValue {
    Arc::new(v)
}

/// Returns the shared `Nil` value.
pub fn nil() -> CtxValue {
    Arc::new(Nil)
}

/// True when the value is the designated empty value.
#[inline]
pub fn is_nil(v: &CtxValue) -> bool {
    (**v).is::<Nil>()
}

/// Attempts a typed view of the value.
pub fn cast<T: Send + Sync + 'static>(v: &CtxValue) -> Option<Arc<T>> {
    Arc::clone(v).downcast::<T>().ok()
}

/// Name of the concrete type behind the value, best effort.
///
/// Used only for diagnostics (context snapshots, type-mismatch reports);
/// unknown types render as their `TypeId`.
pub fn type_label(v: &CtxValue) -> String {
    macro_rules! probe {
        ($($t:ty),+ $(,)?) => {
            $(if (**v).is::<$t>() { return stringify!($t).to_string(); })+
        };
    }
    probe!(
        Nil, bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, usize, isize, f32, f64,
        char, String, &'static str,
    );
    format!("{:?}", (**v).type_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_is_detectable() {
        assert!(is_nil(&nil()));
        assert!(!is_nil(&val(0_i32)));
    }

    #[test]
    fn test_cast_matches_concrete_type() {
        let v = val(String::from("x"));
        assert_eq!(*cast::<String>(&v).unwrap(), "x");
        assert!(cast::<i32>(&v).is_none());
    }

    #[test]
    fn test_type_label_known_types() {
        assert_eq!(type_label(&val(1_u64)), "u64");
        assert_eq!(type_label(&val(String::new())), "String");
    }
}
