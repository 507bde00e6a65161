//! # ProviderFactory: runtime-inspected provider construction.
//!
//! A factory is shown each parameter at subscriber compile time and may mint
//! a [`Provider`] for it (or decline). Use a factory when the decision needs
//! more than a name/priority check — e.g. matching on the parameter's
//! declared type expectation.

use std::sync::Arc;

use crate::providers::Provider;
use crate::subscribers::Param;

/// Mints providers for parameters it recognizes.
pub trait ProviderFactory: Send + Sync + 'static {
    /// Returns a provider for `param`, or `None` to decline.
    fn provide(&self, param: &Param) -> Option<Arc<dyn Provider>>;
}

/// Function-backed factory.
///
/// ## Example
/// ```rust
/// use eventvisor::{FactoryFn, KeyProvider, Param, Provider};
/// use std::sync::Arc;
///
/// // Serve every `*_id` parameter from the `session_id` context key.
/// let factory = FactoryFn::new(|param: &Param| -> Option<Arc<dyn Provider>> {
///     param
///         .name()
///         .ends_with("_id")
///         .then(|| Arc::new(KeyProvider::new("session_id")) as Arc<dyn Provider>)
/// });
/// ```
pub struct FactoryFn<F> {
    f: F,
}

impl<F> FactoryFn<F>
where
    F: Fn(&Param) -> Option<Arc<dyn Provider>> + Send + Sync + 'static,
{
    /// Wraps a closure as a factory.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F> ProviderFactory for FactoryFn<F>
where
    F: Fn(&Param) -> Option<Arc<dyn Provider>> + Send + Sync + 'static,
{
    fn provide(&self, param: &Param) -> Option<Arc<dyn Provider>> {
        (self.f)(param)
    }
}
