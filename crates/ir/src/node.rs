//! [`Node`]: the tagged union of operations a [`crate::graph::Graph`] is
//! built from.

use indexmap::IndexMap;
use loomflow_core::NodeId;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::value::Value;

/// Per-node runtime tuning, all optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Tool-node execution timeout. On elapse, yields
    /// `ExecutionError::Timeout`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry budget for `EXECUTION`/`TIMEOUT` failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Base delay for exponential retry backoff (default 100ms, capped at
    /// 30s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    /// Whether the node's result may be served from cache (interpreted by
    /// the host program; the engine core does not implement a cache).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    /// Upper bound on fan-out: `Parallel` branches in flight, or `Loop`
    /// iterations in flight under `parallel: true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// For `map`/`filter` loops: whether iterations may run concurrently.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    /// Override for a `while` loop's safety ceiling (default 10,000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_limit: Option<usize>,
}

/// How a [`Node::Parallel`] combines its branches' results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinStrategy {
    /// Wait for every branch; any failure fails the node.
    All,
    /// Return the first success; cancel the rest.
    Race,
    /// Wait for every branch; return each branch's outcome, success or
    /// failure, preserving branch order.
    Settled,
}

/// What kind of iteration a [`Node::Loop`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopType {
    /// Iterate a collection, discarding each iteration's output.
    For,
    /// Re-evaluate `condition` before each iteration.
    While,
    /// Iterate a collection, collecting each iteration's last output.
    Map,
    /// Iterate a collection, keeping items whose body output is truthy.
    Filter,
    /// Iterate a collection, threading an accumulator through the body.
    Reduce,
}

impl LoopType {
    /// Whether this loop type is driven by a `collection` (as opposed to
    /// `while`, which is driven by `condition`).
    #[must_use]
    pub const fn requires_collection(self) -> bool {
        !matches!(self, Self::While)
    }
}

/// A single operation in the IR graph.
///
/// Every variant carries its own `id`; compound variants reference their
/// children by [`NodeId`] — those ids must resolve within the same
/// [`crate::graph::Graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Node {
    /// Invokes a registered tool.
    Tool {
        /// This node's id.
        id: NodeId,
        /// The tool to invoke; must exist in the registry at build time.
        tool_id: String,
        /// Named inputs, each an unevaluated [`Value`].
        #[serde(default)]
        inputs: IndexMap<String, Value>,
        /// Variable name to bind the tool's output under, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        output_var: Option<String>,
        /// Per-node tuning.
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<NodeConfig>,
    },
    /// Branches on a condition.
    Conditional {
        /// This node's id.
        id: NodeId,
        /// The predicate to evaluate.
        condition: Condition,
        /// Nodes to run, in order, when `condition` is true.
        then_branch: Vec<NodeId>,
        /// Nodes to run, in order, when `condition` is false.
        #[serde(skip_serializing_if = "Option::is_none")]
        else_branch: Option<Vec<NodeId>>,
        /// Per-node tuning.
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<NodeConfig>,
    },
    /// Fans out into concurrent branches, then joins per `join_strategy`.
    Parallel {
        /// This node's id.
        id: NodeId,
        /// Each branch is itself an ordered sequence of node ids.
        branches: Vec<Vec<NodeId>>,
        /// How to combine branch outcomes.
        join_strategy: JoinStrategy,
        /// Variable name to bind the combined output under, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        output_var: Option<String>,
        /// Per-node tuning (`concurrency` bounds in-flight branches).
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<NodeConfig>,
    },
    /// Runs child nodes one after another.
    Sequence {
        /// This node's id.
        id: NodeId,
        /// Nodes to run, in order.
        steps: Vec<NodeId>,
        /// Per-node tuning.
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<NodeConfig>,
    },
    /// Iterates, per `loop_type`.
    Loop {
        /// This node's id.
        id: NodeId,
        /// Which iteration strategy applies.
        loop_type: LoopType,
        /// Required for `for`/`map`/`filter`/`reduce`.
        #[serde(skip_serializing_if = "Option::is_none")]
        collection: Option<Value>,
        /// Required for `while`.
        #[serde(skip_serializing_if = "Option::is_none")]
        condition: Option<Condition>,
        /// Variable name the current item is bound to inside `body`.
        #[serde(skip_serializing_if = "Option::is_none")]
        iterator_var: Option<String>,
        /// Nodes to run per iteration.
        body: Vec<NodeId>,
        /// Initial accumulator value for `reduce`.
        #[serde(skip_serializing_if = "Option::is_none")]
        accumulator: Option<Value>,
        /// Variable name to bind the loop's final result under, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        output_var: Option<String>,
        /// Per-node tuning.
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<NodeConfig>,
    },
}

impl Node {
    /// This node's id, regardless of variant.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        match self {
            Self::Tool { id, .. }
            | Self::Conditional { id, .. }
            | Self::Parallel { id, .. }
            | Self::Sequence { id, .. }
            | Self::Loop { id, .. } => id,
        }
    }

    /// The node kind as a lowercase string, for events and diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Tool { .. } => "tool",
            Self::Conditional { .. } => "conditional",
            Self::Parallel { .. } => "parallel",
            Self::Sequence { .. } => "sequence",
            Self::Loop { .. } => "loop",
        }
    }

    /// This node's tuning configuration, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&NodeConfig> {
        match self {
            Self::Tool { config, .. }
            | Self::Conditional { config, .. }
            | Self::Parallel { config, .. }
            | Self::Sequence { config, .. }
            | Self::Loop { config, .. } => config.as_ref(),
        }
    }

    /// All node ids this node structurally refers to (branches, steps,
    /// body) — used for build-time validation and topological ordering.
    /// Does not include `id` itself.
    #[must_use]
    pub fn child_ids(&self) -> Vec<&NodeId> {
        match self {
            Self::Tool { .. } => Vec::new(),
            Self::Conditional { then_branch, else_branch, .. } => {
                let mut ids: Vec<&NodeId> = then_branch.iter().collect();
                if let Some(else_branch) = else_branch {
                    ids.extend(else_branch.iter());
                }
                ids
            }
            Self::Parallel { branches, .. } => branches.iter().flatten().collect(),
            Self::Sequence { steps, .. } => steps.iter().collect(),
            Self::Loop { body, .. } => body.iter().collect(),
        }
    }
}
