//! Typed serial API payloads: requests, responses, and unsolicited callbacks.
//!
//! These types describe messages at the level the controller reasons about;
//! framing, checksumming and byte-level payload encoding live below the
//! transport boundary and are not modeled here.

use std::fmt;

use crate::{Association, CommandClass, DeviceClass, FunctionType, HomeId, NodeId};

// ─────────────────────────────────────────────────────────────────────────────
// Status codes
// ─────────────────────────────────────────────────────────────────────────────

/// Status reported by the stick during an add-node flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddNodeStatus {
    Ready = 0x01,
    NodeFound = 0x02,
    AddingSlave = 0x03,
    AddingController = 0x04,
    ProtocolDone = 0x05,
    Done = 0x06,
    Failed = 0x07,
}

/// Status reported by the stick during a remove-node flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RemoveNodeStatus {
    Ready = 0x01,
    NodeFound = 0x02,
    RemovingSlave = 0x03,
    RemovingController = 0x04,
    Done = 0x06,
    Failed = 0x07,
}

/// Status reported by the stick during a replace-failed-node flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplaceFailedNodeStatus {
    /// The node answered, it is not failed.
    NodeOk = 0x00,
    /// The stick is ready to include the replacement.
    FailedNodeReplace = 0x03,
    /// The replacement completed.
    FailedNodeReplaceDone = 0x05,
    /// The replacement did not succeed.
    FailedNodeReplaceFailed = 0x0A,
}

/// Status reported in response to a remove-failed-node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RemoveFailedNodeStatus {
    NodeOk = 0x00,
    NodeRemoved = 0x01,
    NodeNotRemoved = 0x02,
}

/// Terminal status of a neighbor update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NeighborUpdateStatus {
    Started = 0x21,
    Done = 0x22,
    Failed = 0x23,
}

/// Decode the start flags of a failed remove/replace request into
/// human-readable lines.
///
/// A zero flag set means the operation started; any set bit names a reason
/// the stick refused to start it.
#[must_use]
pub fn decode_failed_node_start_flags(flags: u8) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    if flags & (1 << 1) != 0 {
        reasons.push("this controller is not the primary controller");
    }
    if flags & (1 << 2) != 0 {
        reasons.push("no callback function could be registered");
    }
    if flags & (1 << 3) != 0 {
        reasons.push("the node was not found in the failed nodes list");
    }
    if flags & (1 << 4) != 0 {
        reasons.push("another removal process is busy");
    }
    if flags & (1 << 5) != 0 {
        reasons.push("the removal process could not be started");
    }
    reasons
}

// ─────────────────────────────────────────────────────────────────────────────
// Library and capability info
// ─────────────────────────────────────────────────────────────────────────────

/// Type of the Z-Wave library running on the stick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LibraryType {
    Unknown = 0x00,
    StaticController = 0x01,
    Controller = 0x02,
    EnhancedSlave = 0x03,
    Slave = 0x04,
    Installer = 0x05,
    RoutingSlave = 0x06,
    BridgeController = 0x07,
}

impl LibraryType {
    /// Convert from the raw protocol value.
    #[must_use]
    pub const fn from_id(id: u8) -> Self {
        match id {
            0x01 => Self::StaticController,
            0x02 => Self::Controller,
            0x03 => Self::EnhancedSlave,
            0x04 => Self::Slave,
            0x05 => Self::Installer,
            0x06 => Self::RoutingSlave,
            0x07 => Self::BridgeController,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::StaticController => "Static Controller",
            Self::Controller => "Controller",
            Self::EnhancedSlave => "Enhanced Slave",
            Self::Slave => "Slave",
            Self::Installer => "Installer",
            Self::RoutingSlave => "Routing Slave",
            Self::BridgeController => "Bridge Controller",
        };
        f.write_str(name)
    }
}

/// Role flags reported by `GetControllerCapabilities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerCapabilities {
    pub is_secondary: bool,
    pub is_using_home_id_from_other_network: bool,
    pub is_sis_present: bool,
    pub was_real_primary: bool,
    pub is_static_update_controller: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Unsolicited callbacks
// ─────────────────────────────────────────────────────────────────────────────

/// Context delivered with an add-node status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddNodeReport {
    pub status: AddNodeStatus,
    pub node_id: NodeId,
    pub device_class: Option<DeviceClass>,
    pub supported_ccs: Vec<CommandClass>,
    pub controlled_ccs: Vec<CommandClass>,
}

impl AddNodeReport {
    /// A report carrying only a status and node id.
    #[must_use]
    pub const fn status_only(status: AddNodeStatus, node_id: NodeId) -> Self {
        Self {
            status,
            node_id,
            device_class: None,
            supported_ccs: Vec::new(),
            controlled_ccs: Vec::new(),
        }
    }
}

/// Context delivered with a remove-node status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveNodeReport {
    pub status: RemoveNodeStatus,
    pub node_id: NodeId,
}

/// An unsolicited status report delivered to a registered request handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    AddNode(AddNodeReport),
    RemoveNode(RemoveNodeReport),
    ReplaceFailedNode(ReplaceFailedNodeStatus),
    HardReset,
}

impl Callback {
    /// The function type this callback belongs to, used for handler dispatch.
    #[must_use]
    pub const fn function_type(&self) -> FunctionType {
        match self {
            Self::AddNode(_) => FunctionType::AddNodeToNetwork,
            Self::RemoveNode(_) => FunctionType::RemoveNodeFromNetwork,
            Self::ReplaceFailedNode(_) => FunctionType::ReplaceFailedNode,
            Self::HardReset => FunctionType::HardReset,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command class sub-protocol payloads
// ─────────────────────────────────────────────────────────────────────────────

/// A typed command-class command sent to a node via `SendData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcCommand {
    NoOperation,
    AssociationGet {
        group: u8,
    },
    AssociationSet {
        group: u8,
        node_ids: Vec<NodeId>,
    },
    AssociationRemove {
        group: u8,
        node_ids: Vec<NodeId>,
    },
    /// Remove the given node ids from every group at once.
    AssociationRemoveFromAllGroups {
        node_ids: Vec<NodeId>,
    },
    MultiChannelAssociationGet {
        group: u8,
    },
    MultiChannelAssociationSet {
        group: u8,
        node_ids: Vec<NodeId>,
        destinations: Vec<Association>,
    },
    /// `group == None` removes the destinations from every group.
    MultiChannelAssociationRemove {
        group: Option<u8>,
        node_ids: Vec<NodeId>,
        destinations: Vec<Association>,
    },
    SecuritySchemeGet,
    SecurityNonceGet {
        store_as_free: bool,
    },
    SecurityNetworkKeySet {
        key: [u8; 16],
    },
    SecurityInheritScheme,
    WakeUpIntervalGet,
    WakeUpIntervalSet {
        interval_secs: u32,
        destination: NodeId,
    },
    VersionCcGet {
        cc: CommandClass,
    },
}

impl CcCommand {
    /// The command class this command belongs to.
    #[must_use]
    pub const fn command_class(&self) -> CommandClass {
        match self {
            Self::NoOperation => CommandClass::NoOperation,
            Self::AssociationGet { .. }
            | Self::AssociationSet { .. }
            | Self::AssociationRemove { .. }
            | Self::AssociationRemoveFromAllGroups { .. } => CommandClass::Association,
            Self::MultiChannelAssociationGet { .. }
            | Self::MultiChannelAssociationSet { .. }
            | Self::MultiChannelAssociationRemove { .. } => CommandClass::MultiChannelAssociation,
            Self::SecuritySchemeGet
            | Self::SecurityNonceGet { .. }
            | Self::SecurityNetworkKeySet { .. }
            | Self::SecurityInheritScheme => CommandClass::Security,
            Self::WakeUpIntervalGet | Self::WakeUpIntervalSet { .. } => CommandClass::WakeUp,
            Self::VersionCcGet { .. } => CommandClass::Version,
        }
    }
}

/// A typed command-class reply received from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcReply {
    /// The command was delivered and needs no payload in return.
    Ack,
    AssociationReport {
        group: u8,
        max_nodes: u8,
        node_ids: Vec<NodeId>,
    },
    MultiChannelAssociationReport {
        group: u8,
        max_nodes: u8,
        destinations: Vec<Association>,
    },
    SecurityScheme {
        scheme: u8,
    },
    SecurityNonce {
        nonce: [u8; 8],
    },
    WakeUpInterval {
        interval_secs: u32,
        destination: NodeId,
    },
    VersionCc {
        cc: CommandClass,
        version: u8,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests and responses
// ─────────────────────────────────────────────────────────────────────────────

/// Scope of an add-node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddNodeMode {
    Any = 0x01,
    Controller = 0x02,
    Slave = 0x03,
    Existing = 0x04,
    Stop = 0x05,
}

/// Scope of a remove-node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RemoveNodeMode {
    Any = 0x01,
    Controller = 0x02,
    Slave = 0x03,
    Stop = 0x05,
}

/// A controller-initiated serial API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetControllerVersion,
    GetControllerId,
    GetControllerCapabilities,
    GetSerialApiCapabilities,
    GetSerialApiInitData,
    SetSerialApiTimeouts {
        ack_timeout_ms: u16,
        byte_timeout_ms: u16,
    },
    GetSucNodeId,
    SetSucNodeId {
        suc_node_id: NodeId,
        enable_suc: bool,
        enable_sis: bool,
    },
    HardReset,
    AddNodeToNetwork {
        mode: AddNodeMode,
        high_power: bool,
        network_wide: bool,
    },
    RemoveNodeFromNetwork {
        mode: RemoveNodeMode,
        high_power: bool,
        network_wide: bool,
    },
    ReplaceFailedNode {
        node_id: NodeId,
    },
    RemoveFailedNode {
        node_id: NodeId,
    },
    IsFailedNode {
        node_id: NodeId,
    },
    RequestNodeNeighborUpdate {
        node_id: NodeId,
    },
    GetRoutingInfo {
        node_id: NodeId,
    },
    DeleteReturnRoute {
        node_id: NodeId,
    },
    AssignReturnRoute {
        node_id: NodeId,
        destination: NodeId,
    },
    AssignSucReturnRoute {
        node_id: NodeId,
    },
    SendData {
        node_id: NodeId,
        command: CcCommand,
    },
}

impl Request {
    /// The function type of this request.
    #[must_use]
    pub const fn function_type(&self) -> FunctionType {
        match self {
            Self::GetControllerVersion => FunctionType::GetControllerVersion,
            Self::GetControllerId => FunctionType::GetControllerId,
            Self::GetControllerCapabilities => FunctionType::GetControllerCapabilities,
            Self::GetSerialApiCapabilities => FunctionType::GetSerialApiCapabilities,
            Self::GetSerialApiInitData => FunctionType::GetSerialApiInitData,
            Self::SetSerialApiTimeouts { .. } => FunctionType::SetSerialApiTimeouts,
            Self::GetSucNodeId => FunctionType::GetSucNodeId,
            Self::SetSucNodeId { .. } => FunctionType::SetSucNodeId,
            Self::HardReset => FunctionType::HardReset,
            Self::AddNodeToNetwork { .. } => FunctionType::AddNodeToNetwork,
            Self::RemoveNodeFromNetwork { .. } => FunctionType::RemoveNodeFromNetwork,
            Self::ReplaceFailedNode { .. } => FunctionType::ReplaceFailedNode,
            Self::RemoveFailedNode { .. } => FunctionType::RemoveFailedNode,
            Self::IsFailedNode { .. } => FunctionType::IsFailedNode,
            Self::RequestNodeNeighborUpdate { .. } => FunctionType::RequestNodeNeighborUpdate,
            Self::GetRoutingInfo { .. } => FunctionType::GetRoutingInfo,
            Self::DeleteReturnRoute { .. } => FunctionType::DeleteReturnRoute,
            Self::AssignReturnRoute { .. } => FunctionType::AssignReturnRoute,
            Self::AssignSucReturnRoute { .. } => FunctionType::AssignSucReturnRoute,
            Self::SendData { .. } => FunctionType::SendData,
        }
    }

    /// Whether this request is part of the routing/heal message family.
    #[must_use]
    pub const fn is_routing_request(&self) -> bool {
        matches!(
            self.function_type(),
            FunctionType::RequestNodeNeighborUpdate
                | FunctionType::GetRoutingInfo
                | FunctionType::DeleteReturnRoute
                | FunctionType::AssignReturnRoute
        )
    }
}

/// Outcome of a remove-failed-node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveFailedNodeResponse {
    /// The operation could not be started; carries the raw start flags.
    StartFailed(u8),
    /// The operation ran and reported a status.
    Status(RemoveFailedNodeStatus),
}

/// A typed serial API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Generic acknowledgement for requests without a payload in return.
    Ack,
    ControllerVersion {
        library_version: String,
        library_type: LibraryType,
    },
    ControllerId {
        home_id: HomeId,
        own_node_id: NodeId,
    },
    ControllerCapabilities(ControllerCapabilities),
    SerialApiCapabilities {
        serial_api_version: String,
        manufacturer_id: u16,
        product_type: u16,
        product_id: u16,
        supported_function_types: Vec<FunctionType>,
    },
    SerialApiInitData {
        node_ids: Vec<NodeId>,
        is_slave: bool,
        supports_timers: bool,
    },
    SerialApiTimeouts {
        ack_timeout_ms: u16,
        byte_timeout_ms: u16,
    },
    SucNodeId {
        suc_node_id: NodeId,
    },
    SetSucNodeId {
        success: bool,
    },
    /// Start flags of a replace-failed-node request; `0` means started.
    ReplaceFailedNode {
        start_flags: u8,
    },
    RemoveFailedNode(RemoveFailedNodeResponse),
    NeighborUpdate(NeighborUpdateStatus),
    RoutingInfo {
        neighbors: Vec<NodeId>,
    },
    /// Terminal callback of a delete/assign return route request.
    ReturnRoute {
        success: bool,
    },
    IsFailedNode {
        failed: bool,
    },
    SendData(CcReply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_function_types() {
        assert_eq!(
            Request::GetControllerVersion.function_type(),
            FunctionType::GetControllerVersion
        );
        assert_eq!(
            Request::SendData {
                node_id: NodeId::new(2),
                command: CcCommand::NoOperation,
            }
            .function_type(),
            FunctionType::SendData
        );
    }

    #[test]
    fn routing_request_family() {
        assert!(Request::RequestNodeNeighborUpdate {
            node_id: NodeId::new(2)
        }
        .is_routing_request());
        assert!(Request::AssignReturnRoute {
            node_id: NodeId::new(2),
            destination: NodeId::new(1),
        }
        .is_routing_request());
        assert!(!Request::HardReset.is_routing_request());
        assert!(!Request::GetSucNodeId.is_routing_request());
    }

    #[test]
    fn cc_command_classes() {
        assert_eq!(
            CcCommand::AssociationGet { group: 1 }.command_class(),
            CommandClass::Association
        );
        assert_eq!(
            CcCommand::SecurityNonceGet {
                store_as_free: true
            }
            .command_class(),
            CommandClass::Security
        );
        assert_eq!(CcCommand::NoOperation.command_class(), CommandClass::NoOperation);
    }

    #[test]
    fn start_flag_decoding() {
        assert!(decode_failed_node_start_flags(0).is_empty());

        let reasons = decode_failed_node_start_flags((1 << 1) | (1 << 3));
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains("primary controller"));
        assert!(reasons[1].contains("failed nodes list"));
    }

    #[test]
    fn callback_dispatch_keys() {
        let report = AddNodeReport::status_only(AddNodeStatus::Ready, NodeId::new(0));
        assert_eq!(
            Callback::AddNode(report).function_type(),
            FunctionType::AddNodeToNetwork
        );
        assert_eq!(Callback::HardReset.function_type(), FunctionType::HardReset);
    }
}
