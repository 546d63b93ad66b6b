//! [`Graph`]: a validated collection of [`Node`]s, and the [`ToolCatalog`]
//! seam used to check tool references without this crate depending on the
//! registry crate.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use loomflow_core::NodeId;
use loomflow_error::IrValidationError;

use crate::edge::Edge;
use crate::node::Node;

/// What [`Graph::validate`] needs to know about registered tools, without
/// pulling in the full registry type. `loomflow-registry`'s `Registry`
/// implements this.
pub trait ToolCatalog {
    /// Whether a tool id is currently registered.
    fn contains_tool(&self, tool_id: &str) -> bool;
}

/// A catalog that accepts every tool id, for building and testing graphs
/// without wiring up a real registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveToolCatalog;

impl ToolCatalog for PermissiveToolCatalog {
    fn contains_tool(&self, _tool_id: &str) -> bool {
        true
    }
}

/// A typed computation graph: nodes plus the explicit edges between
/// otherwise-unrelated top-level nodes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Graph {
    /// Every node, keyed by its own id. Insertion order is preserved and is
    /// significant for diagnostics (first-seen ordering) but not for
    /// execution, which follows structural nesting and edges.
    pub nodes: IndexMap<NodeId, Node>,
    /// Explicit dependencies between top-level nodes not already ordered by
    /// nesting.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// The node execution starts from.
    pub entry_point: NodeId,
}

impl Graph {
    /// Build a graph from its parts without validating it. Prefer
    /// [`crate::builder::IrBuilder`] for constructing graphs from scratch;
    /// this is for decoding already-built graphs (e.g. from persisted
    /// state) where validation happens separately.
    #[must_use]
    pub fn new(nodes: IndexMap<NodeId, Node>, edges: Vec<Edge>, entry_point: NodeId) -> Self {
        Self { nodes, edges, entry_point }
    }

    /// Look up a node by id.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Validate structural soundness:
    ///
    /// 1. the entry point exists,
    /// 2. every id a node or edge refers to exists,
    /// 3. no two nodes share an id with a different definition (guaranteed
    ///    by the `IndexMap` key, checked here for internal consistency),
    /// 4. the graph (structural nesting plus edges) has no cycles,
    /// 5. every tool node's `tool_id` is registered in `catalog`.
    ///
    /// Nodes unreachable from the entry point are not an error — they are
    /// returned as warnings, since a node may be legitimately unreferenced
    /// until a future edit wires it in.
    pub fn validate(&self, catalog: &dyn ToolCatalog) -> Result<Vec<String>, IrValidationError> {
        let mut errors = Vec::new();

        if !self.nodes.contains_key(&self.entry_point) {
            errors.push(format!("entry point '{}' is not a known node", self.entry_point));
        }

        for (id, node) in &self.nodes {
            if node.id() != id {
                errors.push(format!(
                    "node stored under key '{id}' has mismatched id '{}'",
                    node.id()
                ));
            }
            for child in node.child_ids() {
                if !self.nodes.contains_key(child) {
                    errors.push(format!("node '{id}' refers to unknown node '{child}'"));
                }
            }
            if let Node::Tool { tool_id, .. } = node {
                if !catalog.contains_tool(tool_id) {
                    errors.push(format!("node '{id}' refers to unregistered tool '{tool_id}'"));
                }
            }
        }
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                errors.push(format!("edge refers to unknown node '{}'", edge.from));
            }
            if !self.nodes.contains_key(&edge.to) {
                errors.push(format!("edge refers to unknown node '{}'", edge.to));
            }
        }

        if errors.is_empty() {
            if let Some(cycle_node) = self.find_cycle() {
                errors.push(format!("graph contains a cycle reachable through '{cycle_node}'"));
            }
        }

        if !errors.is_empty() {
            return Err(IrValidationError { errors });
        }

        Ok(self.unreachable_nodes())
    }

    /// DFS-based cycle detection over structural containment plus edges.
    /// Returns the id of a node found mid-recursion (on the current
    /// DFS stack) when a cycle exists.
    fn find_cycle(&self) -> Option<&NodeId> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: std::collections::HashMap<&NodeId, Mark> = std::collections::HashMap::new();

        fn visit<'a>(
            graph: &'a Graph,
            id: &'a NodeId,
            marks: &mut std::collections::HashMap<&'a NodeId, Mark>,
        ) -> Option<&'a NodeId> {
            match marks.get(id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(id),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(node) = graph.nodes.get(id) {
                for child in node.child_ids() {
                    if let Some(found) = visit(graph, child, marks) {
                        return Some(found);
                    }
                }
            }
            for edge in &graph.edges {
                if &edge.from == id {
                    if let Some(found) = visit(graph, &edge.to, marks) {
                        return Some(found);
                    }
                }
            }
            marks.insert(id, Mark::Done);
            None
        }

        for id in self.nodes.keys() {
            if let Some(found) = visit(self, id, &mut marks) {
                return Some(found);
            }
        }
        None
    }

    /// Node ids not reachable from `entry_point` via structural nesting or
    /// edges.
    fn unreachable_nodes(&self) -> Vec<String> {
        let mut reached: HashSet<&NodeId> = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(&self.entry_point);
        reached.insert(&self.entry_point);

        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(id) else { continue };
            for child in node.child_ids() {
                if reached.insert(child) {
                    queue.push_back(child);
                }
            }
            for edge in &self.edges {
                if &edge.from == id && reached.insert(&edge.to) {
                    queue.push_back(&edge.to);
                }
            }
        }

        self.nodes
            .keys()
            .filter(|id| !reached.contains(id))
            .map(|id| format!("node '{id}' is unreachable from the entry point"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::value::Value;

    fn tool(id: &str) -> Node {
        Node::Tool {
            id: NodeId::from(id),
            tool_id: "noop".into(),
            inputs: IndexMap::new(),
            output_var: None,
            config: None,
        }
    }

    #[test]
    fn validate_rejects_missing_entry_point() {
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId::from("a"), tool("a"));
        let graph = Graph::new(nodes, Vec::new(), NodeId::from("missing"));
        let err = graph.validate(&PermissiveToolCatalog).unwrap_err();
        assert!(err.errors.iter().any(|e| e.contains("entry point")));
    }

    #[test]
    fn validate_rejects_dangling_child_reference() {
        let mut nodes = IndexMap::new();
        nodes.insert(
            NodeId::from("seq"),
            Node::Sequence { id: NodeId::from("seq"), steps: vec![NodeId::from("ghost")], config: None },
        );
        let graph = Graph::new(nodes, Vec::new(), NodeId::from("seq"));
        let err = graph.validate(&PermissiveToolCatalog).unwrap_err();
        assert!(err.errors.iter().any(|e| e.contains("ghost")));
    }

    #[test]
    fn validate_rejects_unregistered_tool() {
        struct EmptyCatalog;
        impl ToolCatalog for EmptyCatalog {
            fn contains_tool(&self, _tool_id: &str) -> bool {
                false
            }
        }
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId::from("a"), tool("a"));
        let graph = Graph::new(nodes, Vec::new(), NodeId::from("a"));
        let err = graph.validate(&EmptyCatalog).unwrap_err();
        assert!(err.errors.iter().any(|e| e.contains("unregistered tool")));
    }

    #[test]
    fn validate_detects_edge_cycle() {
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId::from("a"), tool("a"));
        nodes.insert(NodeId::from("b"), tool("b"));
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "a")];
        let graph = Graph::new(nodes, edges, NodeId::from("a"));
        let err = graph.validate(&PermissiveToolCatalog).unwrap_err();
        assert!(err.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn validate_reports_unreachable_nodes_as_warnings_not_errors() {
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId::from("a"), tool("a"));
        nodes.insert(NodeId::from("orphan"), tool("orphan"));
        let graph = Graph::new(nodes, Vec::new(), NodeId::from("a"));
        let warnings = graph.validate(&PermissiveToolCatalog).unwrap();
        assert!(warnings.iter().any(|w| w.contains("orphan")));
    }

    #[test]
    fn validate_accepts_a_well_formed_conditional_graph() {
        let mut nodes = IndexMap::new();
        nodes.insert(NodeId::from("then"), tool("then"));
        nodes.insert(NodeId::from("else"), tool("else"));
        nodes.insert(
            NodeId::from("cond"),
            Node::Conditional {
                id: NodeId::from("cond"),
                condition: Condition::variable(Value::variable("x"), crate::condition::Operator::Gt, Value::literal(1)),
                then_branch: vec![NodeId::from("then")],
                else_branch: Some(vec![NodeId::from("else")]),
                config: None,
            },
        );
        let graph = Graph::new(nodes, Vec::new(), NodeId::from("cond"));
        assert_eq!(graph.validate(&PermissiveToolCatalog).unwrap(), Vec::<String>::new());
    }
}
