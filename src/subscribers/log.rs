//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] attaches a subscriber to the exception channel and prints
//! routed failures to stdout in a human-readable format. Primarily useful
//! for development, debugging, and the demo programs.
//!
//! ## Output format
//! ```text
//! [exception] origin=$event:demo::Ping subscriber=greet err="handler failed: boom"
//! ```
//!
//! Not intended for production use — register a custom handler on
//! [`ExceptionEvent`](crate::ExceptionEvent) for structured logging or
//! metrics collection.

use std::sync::Arc;

use crate::core::bus::EventBus;
use crate::error::{BusError, HandlerError};
use crate::events::ExceptionEvent;
use crate::flow::Flow;
use crate::subscribers::handler::HandlerFn;
use crate::subscribers::param::Param;
use crate::subscribers::subscriber::{Subscriber, SubscriberInfo};

/// Stdout reporter for the exception channel.
///
/// Enabled via the `logging` feature.
pub struct LogWriter;

impl LogWriter {
    /// Registers the reporter on the bus's global scope.
    pub fn attach(bus: &EventBus) -> Result<Arc<Subscriber>, BusError> {
        bus.on::<ExceptionEvent>(HandlerFn::arc(
            "log-writer",
            vec![
                Param::any("origin"),
                Param::of::<SubscriberInfo>("subscriber"),
                Param::any("exception"),
            ],
            |args| async move {
                let origin = args
                    .opt::<Arc<str>>("origin")
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "?".into());
                let sub = args.get::<SubscriberInfo>("subscriber")?;
                let err = args
                    .opt::<Arc<HandlerError>>("exception")
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "?".into());
                println!(
                    "[exception] origin={origin} subscriber={} err={err:?}",
                    sub.name
                );
                Ok(Flow::Nothing)
            },
        ))
        .attach()
    }
}
