//! # Loomflow Core
//!
//! Shared identifiers and primitives used by every Loomflow crate: the
//! engine proper (IR, registry, state, scheduler, persistence) as well as
//! anything embedding it.
//!
//! Nothing in this crate depends on any other Loomflow crate — it sits at
//! the bottom of the dependency graph.

pub mod id;

pub use id::{ExecutionId, FlowId, NodeId};

/// Wall-clock timestamp used throughout the engine's data model.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Common prelude for downstream Loomflow crates.
pub mod prelude {
    pub use crate::id::{ExecutionId, FlowId, NodeId};
    pub use crate::Timestamp;
}
