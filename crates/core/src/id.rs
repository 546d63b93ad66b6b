//! Identifiers for engine entities.
//!
//! [`NodeId`] is a human-readable string (`<kind>_<monotonic>`, see the IR
//! builder) rather than a UUID, because node ids are authored — by a human
//! writing a static flow or by an LLM emitting a JSON plan — and need to be
//! stable and referenceable across edges, branches, and persisted state.
//! [`FlowId`] and [`ExecutionId`] identify running instances and are UUIDs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a node within a [`crate::graph`]-shaped IR.
///
/// Cheap to clone: internally an `Arc<str>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Wrap an existing string as a node id.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

macro_rules! define_uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from its string form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Borrow the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::v4()
            }
        }
    };
}

define_uuid_id!(FlowId, "Identifier for a built IR (a compiled flow definition).");
define_uuid_id!(ExecutionId, "Identifier for one running (or suspended) execution of a flow.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_displays_as_its_string() {
        let id = NodeId::from("tool_1");
        assert_eq!(id.to_string(), "tool_1");
        assert_eq!(id.as_str(), "tool_1");
    }

    #[test]
    fn node_id_equality_is_value_based() {
        assert_eq!(NodeId::from("a"), NodeId::new("a".to_string()));
        assert_ne!(NodeId::from("a"), NodeId::from("b"));
    }

    #[test]
    fn flow_id_v4_is_not_nil() {
        let id = FlowId::v4();
        assert_ne!(id.as_uuid(), Uuid::nil());
    }

    #[test]
    fn execution_id_roundtrips_through_display_and_parse() {
        let id = ExecutionId::v4();
        let parsed = ExecutionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
