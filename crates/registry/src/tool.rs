//! [`Tool`]: a single callable unit a `Tool` node in the IR invokes.

use loomflow_error::ValidationError;
use serde::{Deserialize, Serialize};

/// Descriptive, non-executable information about a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique id, as referenced by `Node::Tool::tool_id`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Short description of what the tool does.
    #[serde(default)]
    pub description: String,
    /// Optional grouping used by [`crate::registry::Registry::list_by_category`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ToolMetadata {
    /// Construct metadata with no category.
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), description: description.into(), category: None }
    }

    /// Attach a category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// A callable unit the scheduler invokes for `Tool` nodes.
///
/// Implementations own their own execution (HTTP calls, shell commands,
/// LLM completions, whatever the host program wires up); this trait is only
/// the seam the engine calls through. `execute` is synchronous-returning-a-
/// future via `async_trait` so implementations can do real I/O.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Static metadata about this tool.
    fn metadata(&self) -> &ToolMetadata;

    /// Check that `input` is acceptable before invoking [`Self::execute`].
    /// The default implementation accepts anything; tools with a strict
    /// input shape should override this.
    fn validate_input(&self, _input: &serde_json::Value) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Check that a produced output is well-formed. Called by the registry
    /// immediately after [`Self::execute`] returns, so a malformed tool
    /// implementation fails loudly instead of corrupting downstream state.
    fn validate_output(&self, _output: &serde_json::Value) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Run the tool against resolved input, producing its output.
    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, String>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Tool, ToolMetadata};
    use loomflow_error::ValidationError;
    use serde_json::Value;

    pub struct EchoTool(pub ToolMetadata);

    impl EchoTool {
        pub fn new(id: &str) -> Self {
            Self(ToolMetadata::new(id, id, "echoes its input"))
        }
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.0
        }

        fn validate_input(&self, input: &Value) -> Result<(), ValidationError> {
            if input.is_null() {
                return Err(ValidationError::input(&self.0.id, "input must not be null"));
            }
            Ok(())
        }

        async fn execute(&self, input: Value) -> Result<Value, String> {
            Ok(input)
        }
    }
}
