//! [`Edge`]: an explicit data/control dependency between two nodes.
//!
//! Most graphs never need explicit edges — `Sequence`, `Conditional`,
//! `Parallel` and `Loop` already encode ordering by nesting. Edges exist for
//! the remaining case: two otherwise-unrelated top-level nodes where one
//! must run before the other.

use loomflow_core::NodeId;
use serde::{Deserialize, Serialize};

/// A directed edge from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// The upstream node.
    pub from: NodeId,
    /// The downstream node, which may not run until `from` completes.
    pub to: NodeId,
}

impl Edge {
    /// Construct an edge from `from` to `to`.
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_carries_direction() {
        let e = Edge::new("a", "b");
        assert_eq!(e.from.as_str(), "a");
        assert_eq!(e.to.as_str(), "b");
    }
}
