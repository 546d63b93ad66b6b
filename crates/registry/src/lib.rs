//! # Loomflow Registry
//!
//! The tool registry and join layer: where [`Tool`] implementations
//! are registered, looked up, and invoked, and where [`Join`]s bridge a
//! producer tool's output shape to a consumer tool's input shape.
//!
//! [`Registry`] implements `loomflow_ir::ToolCatalog`, the seam the IR
//! builder uses to check that every `Tool` node names a registered tool
//! without this crate's dependants needing to depend on `loomflow-ir`
//! themselves.

pub mod join;
pub mod registry;
pub mod tool;

pub use join::Join;
pub use registry::Registry;
pub use tool::{Tool, ToolMetadata};

/// Common imports for code that registers or invokes tools.
pub mod prelude {
    pub use crate::join::Join;
    pub use crate::registry::Registry;
    pub use crate::tool::{Tool, ToolMetadata};
}
