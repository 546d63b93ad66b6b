//! [`Ir`]: a validated [`Graph`] plus the metadata the scheduler and
//! persistence layer need about how it was produced.

use loomflow_core::{FlowId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::graph::Graph;

/// How an [`Ir`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowSource {
    /// Built in-process through [`crate::builder::IrBuilder`].
    Static,
    /// Decoded from a flow-definition JSON document, typically
    /// emitted by an LLM.
    Compiled,
}

/// Descriptive metadata carried alongside a [`Graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrMetadata {
    /// Stable identity of this flow definition.
    pub flow_id: FlowId,
    /// Human-readable name, if the author supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// How this IR was produced.
    pub source: FlowSource,
    /// When this IR was built.
    pub created_at: Timestamp,
}

impl IrMetadata {
    /// Metadata for a freshly built, statically authored flow.
    #[must_use]
    pub fn new_static(name: Option<String>, now: Timestamp) -> Self {
        Self { flow_id: FlowId::v4(), name, source: FlowSource::Static, created_at: now }
    }

    /// Metadata for a flow decoded from a compiled JSON document.
    #[must_use]
    pub fn new_compiled(name: Option<String>, now: Timestamp) -> Self {
        Self { flow_id: FlowId::v4(), name, source: FlowSource::Compiled, created_at: now }
    }
}

/// A complete, buildable flow definition: a validated graph plus its
/// metadata. This is what the scheduler executes and the persistence layer
/// serializes alongside execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ir {
    /// Identity and provenance.
    pub metadata: IrMetadata,
    /// The computation graph itself.
    pub graph: Graph,
}

impl Ir {
    /// Pair a graph with its metadata. Does not (re-)validate the graph;
    /// callers build graphs through [`crate::builder::IrBuilder`], which
    /// validates before returning.
    #[must_use]
    pub fn new(metadata: IrMetadata, graph: Graph) -> Self {
        Self { metadata, graph }
    }
}
