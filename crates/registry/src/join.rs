//! [`Join`]: bridges a producer tool's output schema to a consumer tool's
//! input schema when they were not authored to plug directly into each
//! other.

use loomflow_error::EngineError;
use serde_json::Value;

/// Adapts one tool's output shape into another tool's expected input shape.
///
/// A join is registered for exactly one `(producer, consumer)` pair. The
/// resolver falls back to a join when a `Tool` node's input is left
/// unresolved and the graph wires its predecessor directly into it.
pub trait Join: Send + Sync {
    /// The tool id whose output this join reads.
    fn producer_tool_id(&self) -> &str;

    /// The tool id whose input this join produces.
    fn consumer_tool_id(&self) -> &str;

    /// Adapt a producer output into the consumer's input shape.
    fn decode(&self, producer_output: &Value) -> Result<Value, EngineError>;

    /// The inverse of [`Self::decode`]: adapt a consumer input back into the
    /// producer's output shape. Used when replaying or validating a
    /// round-trip; most joins that are structurally lossy may return an
    /// error here instead of a best-effort guess.
    fn encode(&self, consumer_input: &Value) -> Result<Value, EngineError>;
}

/// A key identifying one producer/consumer pair in the join table.
pub(crate) type JoinKey = (String, String);

pub(crate) fn join_key(producer: &str, consumer: &str) -> JoinKey {
    (producer.to_owned(), consumer.to_owned())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Join;
    use loomflow_error::EngineError;
    use serde_json::{json, Value};

    /// Renames the producer's `body` field to the consumer's expected
    /// `text` field.
    pub struct RenameJoin {
        pub producer: String,
        pub consumer: String,
    }

    impl Join for RenameJoin {
        fn producer_tool_id(&self) -> &str {
            &self.producer
        }

        fn consumer_tool_id(&self) -> &str {
            &self.consumer
        }

        fn decode(&self, producer_output: &Value) -> Result<Value, EngineError> {
            let body = producer_output.get("body").cloned().unwrap_or(Value::Null);
            Ok(json!({ "text": body }))
        }

        fn encode(&self, consumer_input: &Value) -> Result<Value, EngineError> {
            let text = consumer_input.get("text").cloned().unwrap_or(Value::Null);
            Ok(json!({ "body": text }))
        }
    }
}
