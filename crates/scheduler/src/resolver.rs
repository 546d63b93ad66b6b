//! The Join/Input Resolver: turns a [`loomflow_ir::Value`] into a
//! concrete JSON value at the moment a node needs it.

use dashmap::DashMap;
use loomflow_core::NodeId;
use loomflow_error::{EngineError, ExecutionError};
use loomflow_expression::VariableResolver;
use loomflow_ir::{Condition, ConditionKind, Operator, Value};
use loomflow_registry::Registry;
use loomflow_state::StateStore;
use parking_lot::RwLock;
use serde_json::Value as Json;

/// Adapts [`StateStore`] to [`VariableResolver`] so the expression
/// evaluator can resolve `$name.path` without depending on the state
/// crate's concrete type.
pub struct StateVariableResolver<'a>(pub &'a StateStore);

impl VariableResolver for StateVariableResolver<'_> {
    fn resolve_variable(&self, name: &str, path: Option<&str>) -> Option<Json> {
        match path {
            Some(path) => self.0.get_path(name, path).cloned(),
            None => self.0.get(name).cloned(),
        }
    }
}

/// Resolves node inputs and evaluates conditions against the current
/// variable store, a registry (for joins), and prior node outputs.
pub struct InputResolver<'a> {
    state: &'a RwLock<StateStore>,
    registry: &'a Registry,
    outputs: &'a DashMap<NodeId, Json>,
    tools_executed: &'a RwLock<Vec<(String, NodeId)>>,
}

impl<'a> InputResolver<'a> {
    /// Build a resolver over the current execution's shared state.
    #[must_use]
    pub fn new(
        state: &'a RwLock<StateStore>,
        registry: &'a Registry,
        outputs: &'a DashMap<NodeId, Json>,
        tools_executed: &'a RwLock<Vec<(String, NodeId)>>,
    ) -> Self {
        Self { state, registry, outputs, tools_executed }
    }

    /// Resolve a single [`Value`] to a concrete JSON value.
    pub fn resolve(&self, value: &Value, current_node: &NodeId) -> Result<Json, EngineError> {
        match value {
            Value::Literal { value } => Ok(value.clone()),
            Value::Variable { name, path } => {
                let state = self.state.read();
                let resolved = match path {
                    Some(path) => state.get_path(name, path).cloned(),
                    None => state.get(name).cloned(),
                };
                Ok(resolved.unwrap_or(Json::Null))
            }
            Value::Expression { src } => {
                let state = self.state.read();
                let resolver = StateVariableResolver(&state);
                loomflow_expression::evaluate(src, &resolver).map_err(|e| {
                    ExecutionError::Failed {
                        node_id: current_node.clone(),
                        node_type: "expression".into(),
                        message: e.to_string(),
                    }
                    .into()
                })
            }
            Value::Reference { node_id, output_field } => self.resolve_reference(node_id, output_field.as_deref(), current_node),
        }
    }

    /// Resolve a map of named inputs, e.g. a `Tool` node's `inputs`. When
    /// `inputs` is empty, falls back to a registered join from the most
    /// recently executed tool whose output is still recorded, and finally
    /// to an empty object if no join applies.
    pub fn resolve_all(
        &self,
        inputs: &indexmap::IndexMap<String, Value>,
        current_node: &NodeId,
        consumer_tool_id: &str,
    ) -> Result<Json, EngineError> {
        if inputs.is_empty() {
            if let Some(joined) = self.resolve_via_join(consumer_tool_id)? {
                return Ok(joined);
            }
            return Ok(Json::Object(serde_json::Map::new()));
        }
        let mut object = serde_json::Map::with_capacity(inputs.len());
        for (key, value) in inputs {
            object.insert(key.clone(), self.resolve(value, current_node)?);
        }
        Ok(Json::Object(object))
    }

    /// Search previously executed tools, most recently executed first, for
    /// one with a registered join into `consumer_tool_id`. Decodes and
    /// schema-validates the first match's output.
    fn resolve_via_join(&self, consumer_tool_id: &str) -> Result<Option<Json>, EngineError> {
        let history = self.tools_executed.read();
        for (producer_tool_id, producer_node) in history.iter().rev() {
            let Some(join) = self.registry.get_join(producer_tool_id, consumer_tool_id) else {
                continue;
            };
            let Some(producer_output) = self.outputs.get(producer_node).map(|entry| entry.value().clone()) else {
                continue;
            };
            let decoded = join.decode(&producer_output)?;
            self.registry.validate_input(consumer_tool_id, &decoded)?;
            return Ok(Some(decoded));
        }
        Ok(None)
    }

    fn resolve_reference(
        &self,
        node_id: &NodeId,
        output_field: Option<&str>,
        current_node: &NodeId,
    ) -> Result<Json, EngineError> {
        let output = self.outputs.get(node_id).map(|entry| entry.value().clone());
        let Some(output) = output else {
            return Err(ExecutionError::Failed {
                node_id: current_node.clone(),
                node_type: "reference".into(),
                message: format!("referenced node '{node_id}' has no recorded output"),
            }
            .into());
        };
        match output_field {
            Some(field) => Ok(loomflow_state::get_path(&output, field).cloned().unwrap_or(Json::Null)),
            None => Ok(output),
        }
    }

    /// Evaluate a [`Condition`] to a boolean.
    pub fn evaluate_condition(&self, condition: &Condition, current_node: &NodeId) -> Result<bool, EngineError> {
        match condition.kind {
            ConditionKind::Literal => Ok(truthy(&self.resolve(&condition.value, current_node)?)),
            ConditionKind::Expression => Ok(truthy(&self.resolve(&condition.value, current_node)?)),
            ConditionKind::Variable => {
                let left = self.resolve(&condition.value, current_node)?;
                let operator = condition.operator.ok_or_else(|| {
                    EngineError::from(ExecutionError::Failed {
                        node_id: current_node.clone(),
                        node_type: "conditional".into(),
                        message: "variable condition is missing its operator".into(),
                    })
                })?;
                let operand = condition
                    .operands
                    .as_ref()
                    .and_then(|operands| operands.first())
                    .ok_or_else(|| {
                        EngineError::from(ExecutionError::Failed {
                            node_id: current_node.clone(),
                            node_type: "conditional".into(),
                            message: "variable condition is missing its operand".into(),
                        })
                    })?;
                let right = self.resolve(operand, current_node)?;
                Ok(apply_operator(operator, &left, &right))
            }
        }
    }
}

fn truthy(value: &Json) -> bool {
    match value {
        Json::Bool(b) => *b,
        Json::Null => false,
        Json::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

fn apply_operator(operator: Operator, left: &Json, right: &Json) -> bool {
    match operator {
        Operator::Eq => left == right,
        Operator::Neq => left != right,
        Operator::Gt => compare(left, right).is_some_and(std::cmp::Ordering::is_gt),
        Operator::Gte => compare(left, right).is_some_and(std::cmp::Ordering::is_ge),
        Operator::Lt => compare(left, right).is_some_and(std::cmp::Ordering::is_lt),
        Operator::Lte => compare(left, right).is_some_and(std::cmp::Ordering::is_le),
        Operator::In => contains(right, left),
        Operator::NotIn => !contains(right, left),
    }
}

fn compare(left: &Json, right: &Json) -> Option<std::cmp::Ordering> {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => left.as_str()?.partial_cmp(right.as_str()?).into(),
    }
}

fn contains(container: &Json, needle: &Json) -> bool {
    match container {
        Json::Array(items) => items.contains(needle),
        Json::String(haystack) => needle.as_str().is_some_and(|n| haystack.contains(n)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomflow_ir::Value as IrValue;
    use serde_json::json;

    fn setup() -> (RwLock<StateStore>, Registry, DashMap<NodeId, Json>, RwLock<Vec<(String, NodeId)>>) {
        (RwLock::new(StateStore::new()), Registry::new(), DashMap::new(), RwLock::new(Vec::new()))
    }

    #[test]
    fn resolves_literal_and_variable() {
        let (state, registry, outputs, tools_executed) = setup();
        state.write().set("count", json!(5));
        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let node = NodeId::from("n1");
        assert_eq!(resolver.resolve(&IrValue::literal(1), &node).unwrap(), json!(1));
        assert_eq!(resolver.resolve(&IrValue::variable("count"), &node).unwrap(), json!(5));
    }

    #[test]
    fn resolves_reference_with_path() {
        let (state, registry, outputs, tools_executed) = setup();
        outputs.insert(NodeId::from("prev"), json!({"body": {"text": "hi"}}));
        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let node = NodeId::from("n1");
        let value = IrValue::reference_field("prev", "body.text");
        assert_eq!(resolver.resolve(&value, &node).unwrap(), json!("hi"));
    }

    #[test]
    fn missing_reference_is_an_execution_error() {
        let (state, registry, outputs, tools_executed) = setup();
        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let node = NodeId::from("n1");
        let err = resolver.resolve(&IrValue::reference("ghost"), &node).unwrap_err();
        assert_eq!(err.code(), loomflow_error::ErrorCode::Execution);
    }

    #[test]
    fn expression_value_evaluates_against_state() {
        let (state, registry, outputs, tools_executed) = setup();
        state.write().set("x", json!(10));
        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let node = NodeId::from("n1");
        let value = IrValue::expression("$x > 5");
        assert_eq!(resolver.resolve(&value, &node).unwrap(), json!(true));
    }

    #[test]
    fn variable_condition_applies_operator() {
        let (state, registry, outputs, tools_executed) = setup();
        state.write().set("score", json!(90));
        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let node = NodeId::from("n1");
        let cond = Condition::variable(IrValue::variable("score"), Operator::Gte, IrValue::literal(80));
        assert!(resolver.evaluate_condition(&cond, &node).unwrap());
    }

    #[test]
    fn in_operator_checks_array_membership() {
        let (state, registry, outputs, tools_executed) = setup();
        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let node = NodeId::from("n1");
        let cond = Condition::variable(IrValue::literal("b"), Operator::In, IrValue::literal(json!(["a", "b"])));
        assert!(resolver.evaluate_condition(&cond, &node).unwrap());
    }

    struct NoopTool(loomflow_registry::tool::ToolMetadata);

    #[async_trait::async_trait]
    impl loomflow_registry::tool::Tool for NoopTool {
        fn metadata(&self) -> &loomflow_registry::tool::ToolMetadata {
            &self.0
        }

        async fn execute(&self, input: Json) -> Result<Json, String> {
            Ok(input)
        }
    }

    struct RenameJoin;

    impl loomflow_registry::join::Join for RenameJoin {
        fn producer_tool_id(&self) -> &str {
            "producer"
        }

        fn consumer_tool_id(&self) -> &str {
            "consumer"
        }

        fn decode(&self, producer_output: &Json) -> Result<Json, EngineError> {
            let body = producer_output.get("body").cloned().unwrap_or(Json::Null);
            Ok(json!({ "text": body }))
        }

        fn encode(&self, consumer_input: &Json) -> Result<Json, EngineError> {
            let text = consumer_input.get("text").cloned().unwrap_or(Json::Null);
            Ok(json!({ "body": text }))
        }
    }

    #[test]
    fn resolve_all_falls_back_to_join_when_inputs_are_empty() {
        use std::sync::Arc;

        let (state, registry, outputs, tools_executed) = setup();
        registry
            .register_tool(Arc::new(NoopTool(loomflow_registry::tool::ToolMetadata::new("consumer", "consumer", "noop"))))
            .unwrap();
        registry.register_join(Arc::new(RenameJoin));
        let producer_node = NodeId::from("p1");
        outputs.insert(producer_node.clone(), json!({"body": "hello"}));
        tools_executed.write().push(("producer".into(), producer_node));

        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let consumer_node = NodeId::from("c1");
        let empty = indexmap::IndexMap::new();
        let resolved = resolver.resolve_all(&empty, &consumer_node, "consumer").unwrap();
        assert_eq!(resolved, json!({"text": "hello"}));
    }

    #[test]
    fn resolve_all_defaults_to_empty_object_without_a_matching_join() {
        let (state, registry, outputs, tools_executed) = setup();
        let resolver = InputResolver::new(&state, &registry, &outputs, &tools_executed);
        let node = NodeId::from("n1");
        let empty = indexmap::IndexMap::new();
        assert_eq!(resolver.resolve_all(&empty, &node, "consumer").unwrap(), json!({}));
    }
}
