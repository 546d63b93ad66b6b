//! [`Registry`]: the concurrent tool/join table the engine is built around.

use std::sync::Arc;

use dashmap::DashMap;
use loomflow_error::{EngineError, RegistrationError, ToolNotFoundError, ValidationError};
use loomflow_ir::ToolCatalog;
use serde_json::Value;

use crate::join::{join_key, Join, JoinKey};
use crate::tool::{Tool, ToolMetadata};

/// Holds every registered [`Tool`] and [`Join`], keyed for fast concurrent
/// lookup from the scheduler's worker tasks.
///
/// Cloning a `Registry` is cheap and shares the same underlying tables
/// (`Arc` internally), matching the scheduler's need to hand a registry
/// handle to every spawned node task.
#[derive(Clone, Default)]
pub struct Registry {
    tools: Arc<DashMap<String, Arc<dyn Tool>>>,
    joins: Arc<DashMap<JoinKey, Arc<dyn Join>>>,
    by_category: Arc<DashMap<String, Vec<String>>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if a tool with the same id is already
    /// registered — callers that want "upsert" semantics should
    /// `unregister_tool` first.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<(), EngineError> {
        let id = tool.metadata().id.clone();
        if self.tools.contains_key(&id) {
            return Err(RegistrationError(format!("tool '{id}' is already registered")).into());
        }
        if let Some(category) = tool.metadata().category.clone() {
            self.by_category.entry(category).or_default().push(id.clone());
        }
        tracing::debug!(tool_id = %id, "tool registered");
        self.tools.insert(id, tool);
        Ok(())
    }

    /// Remove a tool by id. Returns the removed tool, if any. Joins
    /// referencing the removed tool are left in place but become
    /// unreachable through normal resolution once the tool itself is gone.
    pub fn unregister_tool(&self, tool_id: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.remove(tool_id).map(|(_, tool)| tool);
        if let Some(tool) = &removed {
            if let Some(category) = &tool.metadata().category {
                if let Some(mut ids) = self.by_category.get_mut(category) {
                    ids.retain(|id| id != tool_id);
                }
            }
        }
        removed
    }

    /// Look up a tool by id.
    #[must_use]
    pub fn get_tool(&self, tool_id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(tool_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Metadata for every registered tool.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.iter().map(|entry| entry.value().metadata().clone()).collect()
    }

    /// Tool ids registered under `category`.
    #[must_use]
    pub fn list_by_category(&self, category: &str) -> Vec<String> {
        self.by_category.get(category).map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Validate a value against a tool's input contract.
    pub fn validate_input(&self, tool_id: &str, input: &Value) -> Result<(), EngineError> {
        let tool = self.require_tool(tool_id)?;
        tool.validate_input(input).map_err(EngineError::from)
    }

    /// Validate a value against a tool's output contract.
    pub fn validate_output(&self, tool_id: &str, output: &Value) -> Result<(), EngineError> {
        let tool = self.require_tool(tool_id)?;
        tool.validate_output(output).map_err(EngineError::from)
    }

    /// Run a tool end to end: validate input, execute, validate output.
    pub async fn invoke(&self, tool_id: &str, input: Value) -> Result<Value, EngineError> {
        let tool = self.require_tool(tool_id)?;
        tool.validate_input(&input).map_err(EngineError::from)?;
        let output = tool
            .execute(input)
            .await
            .map_err(|message| ValidationError::output(tool_id, message))?;
        tool.validate_output(&output).map_err(EngineError::from)?;
        Ok(output)
    }

    /// Register a join bridging `producer`'s output to `consumer`'s input.
    /// Overwrites any existing join for the same pair.
    pub fn register_join(&self, join: Arc<dyn Join>) {
        let key = join_key(join.producer_tool_id(), join.consumer_tool_id());
        self.joins.insert(key, join);
    }

    /// Look up the join registered for a producer/consumer pair.
    #[must_use]
    pub fn get_join(&self, producer_tool_id: &str, consumer_tool_id: &str) -> Option<Arc<dyn Join>> {
        self.joins.get(&join_key(producer_tool_id, consumer_tool_id)).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the join registered for a producer/consumer pair.
    pub fn unregister_join(&self, producer_tool_id: &str, consumer_tool_id: &str) -> Option<Arc<dyn Join>> {
        self.joins.remove(&join_key(producer_tool_id, consumer_tool_id)).map(|(_, join)| join)
    }

    fn require_tool(&self, tool_id: &str) -> Result<Arc<dyn Tool>, EngineError> {
        self.get_tool(tool_id).ok_or_else(|| ToolNotFoundError(tool_id.to_owned()).into())
    }
}

impl ToolCatalog for Registry {
    fn contains_tool(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tools", &self.tools.len())
            .field("joins", &self.joins.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::test_support::RenameJoin;
    use crate::tool::test_support::EchoTool;
    use serde_json::json;

    #[test]
    fn register_and_get_tool() {
        let registry = Registry::new();
        registry.register_tool(Arc::new(EchoTool::new("echo"))).unwrap();
        assert!(registry.get_tool("echo").is_some());
        assert!(registry.get_tool("missing").is_none());
        assert!(registry.contains_tool("echo"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        registry.register_tool(Arc::new(EchoTool::new("echo"))).unwrap();
        let err = registry.register_tool(Arc::new(EchoTool::new("echo"))).unwrap_err();
        assert_eq!(err.code(), loomflow_error::ErrorCode::Registration);
    }

    #[test]
    fn unregister_removes_tool_and_category_entry() {
        let registry = Registry::new();
        let tool = ToolMetadata::new("echo", "Echo", "").with_category("text");
        struct Categorized(ToolMetadata);
        #[async_trait::async_trait]
        impl Tool for Categorized {
            fn metadata(&self) -> &ToolMetadata {
                &self.0
            }
            async fn execute(&self, input: Value) -> Result<Value, String> {
                Ok(input)
            }
        }
        registry.register_tool(Arc::new(Categorized(tool))).unwrap();
        assert_eq!(registry.list_by_category("text"), vec!["echo".to_string()]);
        registry.unregister_tool("echo");
        assert!(registry.list_by_category("text").is_empty());
        assert!(registry.get_tool("echo").is_none());
    }

    #[tokio::test]
    async fn invoke_runs_validate_execute_validate() {
        let registry = Registry::new();
        registry.register_tool(Arc::new(EchoTool::new("echo"))).unwrap();
        let out = registry.invoke("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(out, json!({"a": 1}));

        let err = registry.invoke("echo", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), loomflow_error::ErrorCode::Validation);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_tool_not_found() {
        let registry = Registry::new();
        let err = registry.invoke("ghost", json!(null)).await.unwrap_err();
        assert_eq!(err.code(), loomflow_error::ErrorCode::ToolNotFound);
    }

    #[test]
    fn join_round_trips_through_decode_and_encode() {
        let registry = Registry::new();
        registry.register_join(Arc::new(RenameJoin { producer: "fetch".into(), consumer: "summarize".into() }));
        let join = registry.get_join("fetch", "summarize").unwrap();
        let decoded = join.decode(&json!({"body": "hello"})).unwrap();
        assert_eq!(decoded, json!({"text": "hello"}));
        let encoded = join.encode(&decoded).unwrap();
        assert_eq!(encoded, json!({"body": "hello"}));
        assert!(registry.get_join("fetch", "other").is_none());
    }
}
