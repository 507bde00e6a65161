//! Cooperative breakpoints over future events.
//!
//! ## Contents
//! - [`StepOut`] — temporary priority-boosted subscriber wrapped around a
//!   one-shot future, with timeout, block, and dispose
//! - [`StepIter`] — repeated-wait iteration

mod step_out;

pub use step_out::{StepIter, StepOut};
