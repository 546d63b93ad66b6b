//! # Loomflow IR
//!
//! The typed intermediate representation workflows compile to: [`Value`],
//! [`Condition`], [`Node`], [`Edge`], [`Graph`] and the top-level [`Ir`].
//!
//! This crate knows nothing about tool execution, variable resolution, or
//! scheduling — it only defines the shape of a flow and validates its
//! structure ([`Graph::validate`]). The [`graph::ToolCatalog`] trait is the
//! one seam into the registry crate, kept as a trait so this crate does not
//! need to depend on it.

pub mod builder;
pub mod compile;
pub mod condition;
pub mod edge;
pub mod graph;
pub mod ir;
pub mod node;
pub mod value;

pub use builder::IrBuilder;
pub use compile::compile;
pub use condition::{Condition, ConditionKind, Operator};
pub use edge::Edge;
pub use graph::{Graph, PermissiveToolCatalog, ToolCatalog};
pub use ir::{FlowSource, Ir, IrMetadata};
pub use node::{JoinStrategy, LoopType, Node, NodeConfig};
pub use value::Value;

/// Common imports for code that builds or walks an [`Ir`].
pub mod prelude {
    pub use crate::builder::IrBuilder;
    pub use crate::compile::compile;
    pub use crate::condition::{Condition, ConditionKind, Operator};
    pub use crate::edge::Edge;
    pub use crate::graph::{Graph, PermissiveToolCatalog, ToolCatalog};
    pub use crate::ir::{FlowSource, Ir, IrMetadata};
    pub use crate::node::{JoinStrategy, LoopType, Node, NodeConfig};
    pub use crate::value::Value;
}
