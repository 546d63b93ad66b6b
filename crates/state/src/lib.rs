//! # Loomflow State
//!
//! The variable/scope store a running flow reads and writes
//! through: a global map overlaid by a stack of nested scopes, dotted-path
//! projection, and snapshot/restore for suspend/resume.

pub mod path;
pub mod store;

pub use path::{get_path, set_path};
pub use store::{StateSnapshot, StateStore, VariableMeta};
