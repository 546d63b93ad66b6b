//! Decodes flow-definition JSON into a validated [`Ir`].
//!
//! Two document shapes are accepted: the nested authoring form
//! (`{version?, metadata?, flow:[Step]}`, steps nest their children
//! inline) and the flat form LLM planners emit
//! (`{steps:[Step with id], rootIds:[string]}`, children referenced by
//! id). Unknown step tags fail at `serde` decode time; dangling
//! references and cycles are caught by [`Graph::validate`].

use std::collections::HashMap;

use indexmap::IndexMap;
use loomflow_core::{NodeId, Timestamp};
use loomflow_error::{CompilationError, EngineError};
use serde::Deserialize;
use serde_json::Value as Json;

use crate::builder::inputs_from_json;
use crate::condition::Condition;
use crate::graph::{Graph, ToolCatalog};
use crate::ir::{Ir, IrMetadata};
use crate::node::{JoinStrategy, LoopType, Node, NodeConfig};
use crate::value::Value;

/// The nested authoring document: `{version?, metadata?, flow:[Step]}`.
#[derive(Debug, Deserialize)]
pub struct NestedFlowDocument {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: Option<Json>,
    pub flow: Vec<NestedStep>,
}

/// The flat document LLM output uses: `{steps:[Step with id], rootIds}`.
#[derive(Debug, Deserialize)]
pub struct FlatFlowDocument {
    pub steps: Vec<FlatStep>,
    #[serde(rename = "rootIds")]
    pub root_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NestedStep {
    Tool {
        tool_id: String,
        #[serde(default)]
        inputs: serde_json::Map<String, Json>,
        #[serde(default)]
        output_var: Option<String>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Conditional {
        condition: Condition,
        then_branch: Vec<NestedStep>,
        #[serde(default)]
        else_branch: Option<Vec<NestedStep>>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Parallel {
        branches: Vec<Vec<NestedStep>>,
        #[serde(default)]
        join_strategy: Option<JoinStrategy>,
        #[serde(default)]
        output_var: Option<String>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Sequence {
        steps: Vec<NestedStep>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Loop {
        loop_type: LoopType,
        #[serde(default)]
        collection: Option<Json>,
        #[serde(default)]
        condition: Option<Condition>,
        #[serde(default)]
        iterator_var: Option<String>,
        body: Vec<NestedStep>,
        #[serde(default)]
        accumulator: Option<Json>,
        #[serde(default)]
        output_var: Option<String>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FlatStep {
    Tool {
        id: String,
        tool_id: String,
        #[serde(default)]
        inputs: serde_json::Map<String, Json>,
        #[serde(default)]
        output_var: Option<String>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Conditional {
        id: String,
        condition: Condition,
        then_branch: Vec<String>,
        #[serde(default)]
        else_branch: Option<Vec<String>>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Parallel {
        id: String,
        branches: Vec<Vec<String>>,
        #[serde(default)]
        join_strategy: Option<JoinStrategy>,
        #[serde(default)]
        output_var: Option<String>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Sequence {
        id: String,
        steps: Vec<String>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
    Loop {
        id: String,
        loop_type: LoopType,
        #[serde(default)]
        collection: Option<Json>,
        #[serde(default)]
        condition: Option<Condition>,
        #[serde(default)]
        iterator_var: Option<String>,
        body: Vec<String>,
        #[serde(default)]
        accumulator: Option<Json>,
        #[serde(default)]
        output_var: Option<String>,
        #[serde(default)]
        config: Option<NodeConfig>,
    },
}

/// Parse `raw` as either document shape (detected by which top-level keys
/// are present) and compile it to a validated [`Ir`].
pub fn compile(raw: &Json, catalog: &dyn ToolCatalog, now: Timestamp) -> Result<(Ir, Vec<String>), EngineError> {
    let object = raw.as_object().ok_or_else(|| CompilationError("flow document must be a JSON object".into()))?;
    if object.contains_key("steps") && object.contains_key("rootIds") {
        let document: FlatFlowDocument = serde_json::from_value(raw.clone())
            .map_err(|e| CompilationError(format!("decoding flat flow document: {e}")))?;
        compile_flat(document, catalog, now)
    } else if object.contains_key("flow") {
        let document: NestedFlowDocument = serde_json::from_value(raw.clone())
            .map_err(|e| CompilationError(format!("decoding flow document: {e}")))?;
        compile_nested(document, catalog, now)
    } else {
        Err(CompilationError("flow document has neither a 'flow' nor a 'steps'/'rootIds' shape".into()).into())
    }
}

struct NestedCompiler {
    nodes: IndexMap<NodeId, Node>,
    counters: HashMap<&'static str, u64>,
}

impl NestedCompiler {
    fn fresh_id(&mut self, kind: &'static str) -> NodeId {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        NodeId::from(format!("{kind}_{counter}"))
    }

    fn compile_step(&mut self, step: NestedStep) -> NodeId {
        match step {
            NestedStep::Tool { tool_id, inputs, output_var, config } => {
                let id = self.fresh_id("tool");
                let inputs = inputs_from_json(&inputs);
                self.nodes.insert(id.clone(), Node::Tool { id: id.clone(), tool_id, inputs, output_var, config });
                id
            }
            NestedStep::Conditional { condition, then_branch, else_branch, config } => {
                let then_branch = then_branch.into_iter().map(|s| self.compile_step(s)).collect();
                let else_branch = else_branch.map(|steps| steps.into_iter().map(|s| self.compile_step(s)).collect());
                let id = self.fresh_id("conditional");
                self.nodes
                    .insert(id.clone(), Node::Conditional { id: id.clone(), condition, then_branch, else_branch, config });
                id
            }
            NestedStep::Parallel { branches, join_strategy, output_var, config } => {
                let branches =
                    branches.into_iter().map(|branch| branch.into_iter().map(|s| self.compile_step(s)).collect()).collect();
                let id = self.fresh_id("parallel");
                self.nodes.insert(
                    id.clone(),
                    Node::Parallel {
                        id: id.clone(),
                        branches,
                        join_strategy: join_strategy.unwrap_or(JoinStrategy::All),
                        output_var,
                        config,
                    },
                );
                id
            }
            NestedStep::Sequence { steps, config } => {
                let steps = steps.into_iter().map(|s| self.compile_step(s)).collect();
                let id = self.fresh_id("sequence");
                self.nodes.insert(id.clone(), Node::Sequence { id: id.clone(), steps, config });
                id
            }
            NestedStep::Loop { loop_type, collection, condition, iterator_var, body, accumulator, output_var, config } => {
                let body = body.into_iter().map(|s| self.compile_step(s)).collect();
                let id = self.fresh_id("loop");
                self.nodes.insert(
                    id.clone(),
                    Node::Loop {
                        id: id.clone(),
                        loop_type,
                        collection: collection.as_ref().map(Value::from_authoring_json),
                        condition,
                        iterator_var,
                        body,
                        accumulator: accumulator.as_ref().map(Value::from_authoring_json),
                        output_var,
                        config,
                    },
                );
                id
            }
        }
    }
}

fn compile_nested(document: NestedFlowDocument, catalog: &dyn ToolCatalog, now: Timestamp) -> Result<(Ir, Vec<String>), EngineError> {
    let mut compiler = NestedCompiler { nodes: IndexMap::new(), counters: HashMap::new() };

    let entry_point = if document.flow.is_empty() {
        let id = compiler.fresh_id("sequence");
        compiler.nodes.insert(id.clone(), Node::Sequence { id: id.clone(), steps: Vec::new(), config: None });
        id
    } else {
        let steps: Vec<NodeId> = document.flow.into_iter().map(|step| compiler.compile_step(step)).collect();
        if steps.len() == 1 {
            steps.into_iter().next().expect("checked len == 1")
        } else {
            let id = compiler.fresh_id("sequence");
            compiler.nodes.insert(id.clone(), Node::Sequence { id: id.clone(), steps, config: None });
            id
        }
    };

    let graph = Graph::new(compiler.nodes, Vec::new(), entry_point);
    let warnings = graph.validate(catalog)?;
    let name = document.metadata.as_ref().and_then(|m| m.get("name")).and_then(Json::as_str).map(str::to_owned);
    let metadata = IrMetadata::new_compiled(name, now);
    Ok((Ir::new(metadata, graph), warnings))
}

fn compile_flat(document: FlatFlowDocument, catalog: &dyn ToolCatalog, now: Timestamp) -> Result<(Ir, Vec<String>), EngineError> {
    let mut nodes = IndexMap::new();
    for step in document.steps {
        let node = flat_step_to_node(step);
        nodes.insert(node.id().clone(), node);
    }

    let entry_point = match document.root_ids.as_slice() {
        [] => {
            let id = NodeId::from("sequence_root");
            nodes.insert(id.clone(), Node::Sequence { id: id.clone(), steps: Vec::new(), config: None });
            id
        }
        [single] => NodeId::from(single.clone()),
        many => {
            let id = NodeId::from("sequence_root");
            if nodes.contains_key(&id) {
                return Err(CompilationError(format!(
                    "flat document already defines a step named '{id}', which collides with the synthesized multi-root entry point"
                ))
                .into());
            }
            let steps = many.iter().map(|raw| NodeId::from(raw.clone())).collect();
            nodes.insert(id.clone(), Node::Sequence { id: id.clone(), steps, config: None });
            id
        }
    };

    let graph = Graph::new(nodes, Vec::new(), entry_point);
    let warnings = graph.validate(catalog)?;
    let metadata = IrMetadata::new_compiled(None, now);
    Ok((Ir::new(metadata, graph), warnings))
}

fn flat_step_to_node(step: FlatStep) -> Node {
    match step {
        FlatStep::Tool { id, tool_id, inputs, output_var, config } => {
            Node::Tool { id: NodeId::from(id), tool_id, inputs: inputs_from_json(&inputs), output_var, config }
        }
        FlatStep::Conditional { id, condition, then_branch, else_branch, config } => Node::Conditional {
            id: NodeId::from(id),
            condition,
            then_branch: then_branch.into_iter().map(NodeId::from).collect(),
            else_branch: else_branch.map(|ids| ids.into_iter().map(NodeId::from).collect()),
            config,
        },
        FlatStep::Parallel { id, branches, join_strategy, output_var, config } => Node::Parallel {
            id: NodeId::from(id),
            branches: branches.into_iter().map(|branch| branch.into_iter().map(NodeId::from).collect()).collect(),
            join_strategy: join_strategy.unwrap_or(JoinStrategy::All),
            output_var,
            config,
        },
        FlatStep::Sequence { id, steps, config } => {
            Node::Sequence { id: NodeId::from(id), steps: steps.into_iter().map(NodeId::from).collect(), config }
        }
        FlatStep::Loop { id, loop_type, collection, condition, iterator_var, body, accumulator, output_var, config } => Node::Loop {
            id: NodeId::from(id),
            loop_type,
            collection: collection.as_ref().map(Value::from_authoring_json),
            condition,
            iterator_var,
            body: body.into_iter().map(NodeId::from).collect(),
            accumulator: accumulator.as_ref().map(Value::from_authoring_json),
            output_var,
            config,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PermissiveToolCatalog;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn empty_nested_flow_compiles_to_a_trivial_entry_sequence() {
        let raw = json!({"flow": []});
        let (ir, warnings) = compile(&raw, &PermissiveToolCatalog, Utc::now()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(ir.graph.nodes.len(), 1);
    }

    #[test]
    fn nested_two_tool_flow_wraps_in_a_sequence() {
        let raw = json!({
            "flow": [
                {"type": "tool", "toolId": "fetch", "outputVar": "page"},
                {"type": "tool", "toolId": "parse", "inputs": {"body": "$page"}},
            ]
        });
        let (ir, _) = compile(&raw, &PermissiveToolCatalog, Utc::now()).unwrap();
        let Node::Sequence { steps, .. } = ir.graph.get(&ir.graph.entry_point).unwrap() else {
            panic!("expected a wrapping sequence");
        };
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn unknown_step_tag_fails_to_decode() {
        let raw = json!({"flow": [{"type": "frobnicate"}]});
        assert!(compile(&raw, &PermissiveToolCatalog, Utc::now()).is_err());
    }

    #[test]
    fn flat_document_with_single_root_uses_it_directly() {
        let raw = json!({
            "steps": [
                {"type": "tool", "id": "a", "toolId": "fetch"},
            ],
            "rootIds": ["a"],
        });
        let (ir, _) = compile(&raw, &PermissiveToolCatalog, Utc::now()).unwrap();
        assert_eq!(ir.graph.entry_point.as_str(), "a");
    }

    #[test]
    fn flat_document_with_multiple_roots_is_wrapped_in_a_synthetic_sequence() {
        let raw = json!({
            "steps": [
                {"type": "tool", "id": "a", "toolId": "fetch"},
                {"type": "tool", "id": "b", "toolId": "fetch"},
            ],
            "rootIds": ["a", "b"],
        });
        let (ir, _) = compile(&raw, &PermissiveToolCatalog, Utc::now()).unwrap();
        assert_eq!(ir.graph.entry_point.as_str(), "sequence_root");
    }

    #[test]
    fn flat_document_rejects_a_dangling_reference() {
        let raw = json!({
            "steps": [
                {"type": "sequence", "id": "a", "steps": ["ghost"]},
            ],
            "rootIds": ["a"],
        });
        assert!(compile(&raw, &PermissiveToolCatalog, Utc::now()).is_err());
    }
}
