//! # Provider: a capability that can supply a value for a named parameter.
//!
//! Providers are validated once per parameter at subscriber compile time
//! ([`Provider::validate`]) and invoked once per dispatch while resolving that
//! parameter ([`Provider::supply`]). A parameter keeps its accepted providers
//! sorted by [`Provider::priority`] ascending and memoizes the most recently
//! successful one, so the hot path usually runs a single provider.
//!
//! ## Supply semantics
//! - [`Supply::Miss`] — cannot supply; the resolver tries the next provider.
//! - [`Supply::Value`] — supplies a value; a [`Nil`](crate::Nil) payload is
//!   still treated as a miss (the value is "empty").
//! - [`Supply::Force`] — supplies the payload verbatim, `Nil` included. This
//!   is how "supply an empty value on purpose" stays distinguishable from a
//!   failing provider.

use async_trait::async_trait;

use crate::context::{is_nil, Context, CtxValue};
use crate::error::HandlerError;
use crate::subscribers::Param;

/// Default provider priority when none is declared.
pub const DEFAULT_PROVIDER_PRIORITY: u32 = 20;

/// Result of one provider invocation.
#[derive(Clone)]
pub enum Supply {
    /// The provider cannot supply this parameter; try the next one.
    Miss,
    /// A supplied value. `Nil` payloads count as a miss.
    Value(CtxValue),
    /// A supplied value used verbatim, even when the payload is `Nil`.
    Force(CtxValue),
}

impl Supply {
    /// Collapses the supply into a usable value, honoring the
    /// `Value(Nil) == Miss` rule.
    #[inline]
    pub fn into_hit(self) -> Option<CtxValue> {
        match self {
            Supply::Miss => None,
            Supply::Value(v) => {
                if is_nil(&v) {
                    None
                } else {
                    Some(v)
                }
            }
            Supply::Force(v) => Some(v),
        }
    }
}

impl std::fmt::Debug for Supply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Supply::Miss => write!(f, "Supply::Miss"),
            Supply::Value(_) => write!(f, "Supply::Value(..)"),
            Supply::Force(_) => write!(f, "Supply::Force(..)"),
        }
    }
}

/// Per-parameter value source.
///
/// Implementations should be cheap to validate; `supply` may await freely
/// (the resolver is async end to end).
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Ordering hint; smaller runs earlier. Defaults to 20.
    fn priority(&self) -> u32 {
        DEFAULT_PROVIDER_PRIORITY
    }

    /// Whether this provider can serve the given parameter.
    ///
    /// Called once at subscriber compile time.
    fn validate(&self, param: &Param) -> bool;

    /// Attempts to supply a value for the parameter from the context.
    async fn supply(&self, ctx: &Context) -> Result<Supply, HandlerError>;

    /// Human-readable description used in unresolved-requirement reports.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}
