//! Node and network identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The broadcast node id.
pub const NODE_BROADCAST: NodeId = NodeId(0xFF);

/// Identifier of a single node within a Z-Wave network.
///
/// Node ids are assigned by the protocol during inclusion and are stable for
/// the lifetime of the node's membership in the network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(u8);

impl NodeId {
    /// Wrap a raw node id.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// The raw protocol value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Whether this is the broadcast id (`0xFF`).
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == 0xFF
    }

    /// Whether this id refers to an actual node (`0` means "none").
    #[must_use]
    pub const fn is_some_node(self) -> bool {
        self.0 != 0 && !self.is_broadcast()
    }
}

impl From<u8> for NodeId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The 32-bit home id identifying a Z-Wave network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct HomeId(u32);

impl HomeId {
    /// Wrap a raw home id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw protocol value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
