//! The streaming event model a running flow emits, and the broadcast bus
//! that fans events out to every subscriber (the `run(stream)` API, and any
//! observability hooks the host program attaches).

use loomflow_core::{ExecutionId, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One point-in-time occurrence during flow execution.
///
/// Events are projections, not the source of truth — a dropped event
/// (e.g. no subscriber was listening) never affects correctness, only
/// observability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    /// Execution has begun.
    FlowStart {
        /// This execution's id.
        execution_id: ExecutionId,
    },
    /// A node has started evaluating.
    NodeStart {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The node that started.
        node_id: NodeId,
    },
    /// A node finished successfully.
    NodeComplete {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The node that completed.
        node_id: NodeId,
        /// Its output, if the node type produces one.
        output: serde_json::Value,
    },
    /// A node failed (possibly before exhausting retries).
    NodeError {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The node that failed.
        node_id: NodeId,
        /// The stable error code.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// A tool invocation has begun.
    ToolStart {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The tool node invoking it.
        node_id: NodeId,
        /// The tool's id in the registry.
        tool_id: String,
    },
    /// A tool invocation produced its output.
    ToolOutput {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The tool node.
        node_id: NodeId,
        /// The tool's output.
        output: serde_json::Value,
    },
    /// A tool invocation failed.
    ToolError {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The tool node.
        node_id: NodeId,
        /// Human-readable detail.
        message: String,
    },
    /// A streaming LLM-backed tool emitted a token. Tools that stream their
    /// output call into the scheduler's event sink directly; the engine
    /// core does not itself talk to any model.
    LlmToken {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The tool node.
        node_id: NodeId,
        /// The emitted token text.
        token: String,
    },
    /// A streaming LLM-backed tool finished emitting tokens.
    LlmCompletion {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The tool node.
        node_id: NodeId,
        /// The full, assembled completion.
        text: String,
    },
    /// Execution suspended pending external input.
    FlowSuspended {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The opaque key needed to resume it.
        suspension_key: String,
    },
    /// Execution completed successfully.
    FlowComplete {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The flow's final output.
        output: serde_json::Value,
    },
    /// Execution ended in failure.
    FlowError {
        /// This execution's id.
        execution_id: ExecutionId,
        /// The stable error code.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },
}

/// Broadcast-based event sink. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given subscriber buffer capacity. Slow
    /// subscribers that fall behind this many events lose the oldest ones
    /// (standard broadcast-channel lag behavior), not the sender.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emit an event. Fire-and-forget: an error here only means no one was
    /// listening.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_events() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        bus.emit(Event::FlowStart { execution_id: ExecutionId::v4() });
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, Event::FlowStart { .. }));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(Event::FlowStart { execution_id: ExecutionId::v4() });
    }
}
