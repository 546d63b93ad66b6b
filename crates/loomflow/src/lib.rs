//! Loomflow: a workflow orchestration engine built around a typed,
//! serializable intermediate representation, a scheduler that walks it,
//! and a suspend/resume pipeline that lets a flow pause for external
//! input and continue later, possibly on a different process.
//!
//! [`Engine`] is the single entry point a host program needs: build a
//! flow from JSON or in-process, run or stream it, resume it from a
//! persisted suspension key, and observe or cancel it while it runs.
//! Everything else in this crate configures that one type.

pub mod config;
pub mod engine;
pub mod stats;

pub use config::{CircuitBreakerConfig, EngineConfig, Environment, ExecutionConfig, LogDestination, LogFormat, LoggingConfig};
pub use engine::{keyring_from_env, Engine, FlowOutcome, FlowStream};
pub use stats::EngineStats;

/// Common imports for a host program embedding the engine.
pub mod prelude {
    pub use crate::config::{EngineConfig, Environment, ExecutionConfig, LogFormat, LoggingConfig};
    pub use crate::engine::{keyring_from_env, Engine, FlowOutcome, FlowStream};
    pub use crate::stats::EngineStats;

    pub use loomflow_core::{ExecutionId, FlowId, NodeId};
    pub use loomflow_error::EngineError;
    pub use loomflow_ir::{Ir, IrBuilder};
    pub use loomflow_registry::{Registry, Tool, ToolMetadata};
    pub use loomflow_scheduler::Event;
}
