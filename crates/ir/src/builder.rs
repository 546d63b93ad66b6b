//! [`IrBuilder`]: the in-process way to construct an [`Ir`] without hand
//! writing node ids or JSON.

use indexmap::IndexMap;
use loomflow_core::{NodeId, Timestamp};
use loomflow_error::EngineError;
use serde_json::Value as Json;
use std::collections::HashMap;

use crate::condition::Condition;
use crate::graph::{Graph, ToolCatalog};
use crate::ir::{Ir, IrMetadata};
use crate::node::{JoinStrategy, LoopType, Node, NodeConfig};
use crate::value::Value;

/// The conventional input key a statically compiled step receives its
/// predecessor's output under, when the step does not name its own inputs.
pub const IMPLICIT_INPUT_KEY: &str = "input";

/// Builds a [`Graph`] node by node, generating fresh ids per kind
/// (`<kind>_<monotonic>`, e.g. `tool_1`, `tool_2`, `conditional_1`).
#[derive(Debug, Default)]
pub struct IrBuilder {
    nodes: IndexMap<NodeId, Node>,
    edges: Vec<crate::edge::Edge>,
    entry_point: Option<NodeId>,
    counters: HashMap<&'static str, u64>,
    name: Option<String>,
}

impl IrBuilder {
    /// Start an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a human-readable name to the resulting [`IrMetadata`].
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn fresh_id(&mut self, kind: &'static str) -> NodeId {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        NodeId::from(format!("{kind}_{counter}"))
    }

    /// Add a tool node, returning its generated id.
    pub fn add_tool(
        &mut self,
        tool_id: impl Into<String>,
        inputs: IndexMap<String, Value>,
        output_var: Option<String>,
        config: Option<NodeConfig>,
    ) -> NodeId {
        let id = self.fresh_id("tool");
        self.nodes.insert(
            id.clone(),
            Node::Tool { id: id.clone(), tool_id: tool_id.into(), inputs, output_var, config },
        );
        id
    }

    /// Add a conditional node, returning its generated id. `then_branch`
    /// and `else_branch` must reference ids already added to this builder.
    pub fn add_conditional(
        &mut self,
        condition: Condition,
        then_branch: Vec<NodeId>,
        else_branch: Option<Vec<NodeId>>,
        config: Option<NodeConfig>,
    ) -> NodeId {
        let id = self.fresh_id("conditional");
        self.nodes.insert(
            id.clone(),
            Node::Conditional { id: id.clone(), condition, then_branch, else_branch, config },
        );
        id
    }

    /// Add a parallel node, returning its generated id.
    pub fn add_parallel(
        &mut self,
        branches: Vec<Vec<NodeId>>,
        join_strategy: JoinStrategy,
        output_var: Option<String>,
        config: Option<NodeConfig>,
    ) -> NodeId {
        let id = self.fresh_id("parallel");
        self.nodes.insert(
            id.clone(),
            Node::Parallel { id: id.clone(), branches, join_strategy, output_var, config },
        );
        id
    }

    /// Add a sequence node, returning its generated id.
    pub fn add_sequence(&mut self, steps: Vec<NodeId>, config: Option<NodeConfig>) -> NodeId {
        let id = self.fresh_id("sequence");
        self.nodes.insert(id.clone(), Node::Sequence { id: id.clone(), steps, config });
        id
    }

    /// Add a loop node, returning its generated id.
    #[allow(clippy::too_many_arguments)]
    pub fn add_loop(
        &mut self,
        loop_type: LoopType,
        collection: Option<Value>,
        condition: Option<Condition>,
        iterator_var: Option<String>,
        body: Vec<NodeId>,
        accumulator: Option<Value>,
        output_var: Option<String>,
        config: Option<NodeConfig>,
    ) -> NodeId {
        let id = self.fresh_id("loop");
        self.nodes.insert(
            id.clone(),
            Node::Loop {
                id: id.clone(),
                loop_type,
                collection,
                condition,
                iterator_var,
                body,
                accumulator,
                output_var,
                config,
            },
        );
        id
    }

    /// Record an explicit dependency between two top-level nodes already
    /// added to this builder.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        self.edges.push(crate::edge::Edge::new(from, to));
        self
    }

    /// Mark `id` as the node execution starts from.
    pub fn set_entry_point(&mut self, id: NodeId) -> &mut Self {
        self.entry_point = Some(id);
        self
    }

    /// Validate and assemble the final [`Ir`].
    ///
    /// `catalog` checks that every tool node's `tool_id` is registered;
    /// pass [`crate::graph::PermissiveToolCatalog`] to skip that check
    /// (e.g. in tests).
    pub fn build(self, catalog: &dyn ToolCatalog, now: Timestamp) -> Result<(Ir, Vec<String>), EngineError> {
        let entry_point = self
            .entry_point
            .ok_or_else(|| loomflow_error::IrValidationError { errors: vec!["no entry point set".into()] })?;
        let graph = Graph::new(self.nodes, self.edges, entry_point);
        let warnings = graph.validate(catalog)?;
        let metadata = IrMetadata::new_static(self.name, now);
        Ok((Ir::new(metadata, graph), warnings))
    }

    /// Build a linear pipeline of tool calls ("static-flow
    /// compilation"): each step runs after the previous one completes. A
    /// step that does not specify its own inputs receives the previous
    /// step's full output under [`IMPLICIT_INPUT_KEY`]; the first step
    /// receives no implicit input.
    pub fn linear_pipeline<I>(steps: I, catalog: &dyn ToolCatalog, now: Timestamp) -> Result<(Ir, Vec<String>), EngineError>
    where
        I: IntoIterator<Item = (String, Option<IndexMap<String, Value>>, Option<String>)>,
    {
        let mut builder = Self::new();
        let mut previous: Option<NodeId> = None;
        let mut first: Option<NodeId> = None;

        for (tool_id, inputs, output_var) in steps {
            let resolved_inputs = inputs.unwrap_or_else(|| match &previous {
                Some(prev) => {
                    let mut map = IndexMap::new();
                    map.insert(IMPLICIT_INPUT_KEY.to_string(), Value::reference(prev.clone()));
                    map
                }
                None => IndexMap::new(),
            });
            let id = builder.add_tool(tool_id, resolved_inputs, output_var, None);
            if let Some(prev) = previous.take() {
                builder.connect(prev, id.clone());
            }
            first.get_or_insert_with(|| id.clone());
            previous = Some(id);
        }

        let entry = first.ok_or_else(|| {
            EngineError::from(loomflow_error::IrValidationError { errors: vec!["pipeline has no steps".into()] })
        })?;
        builder.set_entry_point(entry);
        builder.build(catalog, now)
    }
}

/// Convert an authoring-time JSON object (as emitted by an LLM following the
/// flow schema) into typed [`Value`] inputs.
#[must_use]
pub fn inputs_from_json(raw: &serde_json::Map<String, Json>) -> IndexMap<String, Value> {
    raw.iter().map(|(k, v)| (k.clone(), Value::from_authoring_json(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PermissiveToolCatalog;
    use chrono::Utc;

    #[test]
    fn fresh_ids_are_monotonic_per_kind() {
        let mut builder = IrBuilder::new();
        let a = builder.add_tool("noop", IndexMap::new(), None, None);
        let b = builder.add_tool("noop", IndexMap::new(), None, None);
        assert_eq!(a.as_str(), "tool_1");
        assert_eq!(b.as_str(), "tool_2");
    }

    #[test]
    fn build_requires_an_entry_point() {
        let builder = IrBuilder::new();
        let err = builder.build(&PermissiveToolCatalog, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("entry point") || matches!(err, EngineError::IrValidation(_)));
    }

    #[test]
    fn linear_pipeline_wires_implicit_references_between_steps() {
        let (ir, warnings) = IrBuilder::linear_pipeline(
            vec![
                ("fetch".to_string(), None, Some("page".to_string())),
                ("parse".to_string(), None, Some("parsed".to_string())),
            ],
            &PermissiveToolCatalog,
            Utc::now(),
        )
        .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(ir.graph.nodes.len(), 2);
        let Node::Tool { inputs, .. } = ir.graph.get(&NodeId::from("tool_2")).unwrap() else {
            panic!("expected tool node");
        };
        assert_eq!(inputs.get(IMPLICIT_INPUT_KEY), Some(&Value::reference(NodeId::from("tool_1"))));
    }

    #[test]
    fn linear_pipeline_rejects_empty_step_list() {
        let err = IrBuilder::linear_pipeline(Vec::new(), &PermissiveToolCatalog, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("no steps") || matches!(err, EngineError::IrValidation(_)));
    }
}
