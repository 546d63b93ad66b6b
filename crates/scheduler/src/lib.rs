//! # Loomflow Scheduler
//!
//! Executes a built [`loomflow_ir::Ir`] against a [`loomflow_registry::Registry`]
//! and a variable store: resolving node inputs, branching/fanning
//! out/looping over the IR's node tree, retrying failed tool invocations,
//! detecting tool-initiated suspension, and streaming progress as events.
//!
//! This crate stops at capturing a [`suspend::SuspensionRecord`] — turning
//! that into a persisted, opaque [`suspend::SuspensionKey`] and emitting
//! `FlowSuspended` is the host facade's job, once it has a persistence
//! backend to hand the record to.

pub mod events;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod suspend;

pub use events::{Event, EventBus};
pub use resolver::{InputResolver, StateVariableResolver};
pub use retry::{with_retry, RetryPolicy};
pub use scheduler::{ExecutionOutcome, Outcome, Scheduler};
pub use suspend::{ExecutionPosition, SuspensionContext, SuspensionKey, SuspensionKeyFormat, SuspensionRecord};

/// Common imports for code that drives an execution.
pub mod prelude {
    pub use crate::events::{Event, EventBus};
    pub use crate::resolver::{InputResolver, StateVariableResolver};
    pub use crate::retry::{with_retry, RetryPolicy};
    pub use crate::scheduler::{ExecutionOutcome, Outcome, Scheduler};
    pub use crate::suspend::{ExecutionPosition, SuspensionContext, SuspensionKey, SuspensionKeyFormat, SuspensionRecord};
}
