//! # Global bus configuration.
//!
//! Provides [`BusConfig`], centralized settings for the dispatch runtime.
//!
//! ## Sentinel values
//! - `grace = 0s` → shutdown cancels outstanding dispatches without waiting
//! - `queue_capacity` is clamped to a minimum of 1 by pull-mode publishers

use std::time::Duration;

/// Global configuration for the event bus runtime.
///
/// Defines:
/// - **Shutdown behavior**: grace period for outstanding dispatch tasks
/// - **Registration defaults**: subscriber priority when none is given
/// - **Pull mode**: queue capacity for queued publishers
/// - **Diagnostics**: stderr reporting of routed failures
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Maximum time to wait for in-flight dispatch tasks during shutdown.
    ///
    /// When the grace expires, remaining tasks are cancelled and
    /// `BusError::GraceExceeded` is returned.
    pub grace: Duration,

    /// Default subscriber priority (smaller runs earlier).
    pub default_priority: u16,

    /// Capacity of the bounded queue attached to pull-mode publishers
    /// created through the bus. Minimum value is 1 (enforced per publisher).
    pub queue_capacity: usize,

    /// When set, failures routed to the exception channel (and failures
    /// raised *by* exception subscribers, which are otherwise swallowed) are
    /// also rendered to stderr.
    pub report_errors: bool,
}

impl Default for BusConfig {
    /// Default configuration:
    ///
    /// - `grace = 60s`
    /// - `default_priority = 16`
    /// - `queue_capacity = 1024`
    /// - `report_errors = false`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            default_priority: 16,
            queue_capacity: 1024,
            report_errors: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.grace, Duration::from_secs(60));
        assert_eq!(cfg.default_priority, 16);
        assert_eq!(cfg.queue_capacity, 1024);
        assert!(!cfg.report_errors);
    }
}
