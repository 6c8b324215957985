//! The association data model.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CommandClass, NodeId};

/// A single association destination.
///
/// `endpoint == None` is a plain association; a present endpoint makes it a
/// multi-channel association. Two destinations are equal iff both the node id
/// and the endpoint match exactly, so a plain destination never deduplicates
/// against an endpoint-carrying one for the same node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Association {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<u8>,
}

impl Association {
    /// A plain (node-level) association.
    #[must_use]
    pub const fn plain(node_id: NodeId) -> Self {
        Self {
            node_id,
            endpoint: None,
        }
    }

    /// A multi-channel association targeting a specific endpoint.
    #[must_use]
    pub const fn multi_channel(node_id: NodeId, endpoint: u8) -> Self {
        Self {
            node_id,
            endpoint: Some(endpoint),
        }
    }
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.endpoint {
            Some(endpoint) => write!(f, "{}:{}", self.node_id, endpoint),
            None => write!(f, "{}", self.node_id),
        }
    }
}

/// Semantic profile of an association group, as advertised through the
/// Association Group Information command class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssociationGroupProfile {
    GeneralNa,
    GeneralLifeline,
    Control,
    Sensor,
    Notification,
    Irrigation,
    Meter,
    Other(u16),
}

impl AssociationGroupProfile {
    /// Convert from the raw 16-bit profile identifier.
    #[must_use]
    pub const fn from_id(id: u16) -> Self {
        match id {
            0x0000 => Self::GeneralNa,
            0x0001 => Self::GeneralLifeline,
            0x2000..=0x20FF => Self::Control,
            0x3100..=0x31FF => Self::Sensor,
            0x7100..=0x71FF => Self::Notification,
            0x6B00..=0x6BFF => Self::Irrigation,
            0x3200..=0x32FF => Self::Meter,
            other => Self::Other(other),
        }
    }
}

/// Read model for one association group of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationGroup {
    /// How many destinations the group can hold.
    pub max_nodes: u8,
    /// Whether this group reports state changes to the controller.
    pub is_lifeline: bool,
    /// Whether the group accepts multi-channel destinations.
    pub multi_channel: bool,
    /// Human-readable group label.
    pub label: String,
    /// The advertised group profile, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<AssociationGroupProfile>,
    /// The command classes this group issues, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_commands: Option<BTreeSet<CommandClass>>,
}
