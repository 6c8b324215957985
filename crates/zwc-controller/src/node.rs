//! The node model: status, capabilities, and cache (de)serialization.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::debug;

use zwc_core::{
    CcCommand, CcReply, CommandClass, CommandClassInfo, DeviceClass, FunctionType, NodeId, Request,
    Response, ValueDb, ValueId, ZWaveError, ZWaveResult,
};

use crate::{DeviceConfig, MessagePriority, SendMessageOptions, Transport};

/// Liveness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    Unknown,
    Alive,
    Asleep,
    Awake,
    Dead,
}

impl NodeStatus {
    /// Cache representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Alive => "alive",
            Self::Asleep => "asleep",
            Self::Awake => "awake",
            Self::Dead => "dead",
        }
    }

    /// Parse the cache representation; unknown strings map to `Unknown`.
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "alive" => Self::Alive,
            "asleep" => Self::Asleep,
            "awake" => Self::Awake,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// How far the interview of a node has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum InterviewStage {
    #[default]
    None,
    ProtocolInfo,
    NodeInfo,
    CommandClasses,
    Complete,
}

impl InterviewStage {
    /// Cache representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ProtocolInfo => "ProtocolInfo",
            Self::NodeInfo => "NodeInfo",
            Self::CommandClasses => "CommandClasses",
            Self::Complete => "Complete",
        }
    }

    /// Parse the cache representation; unknown strings map to `None`.
    #[must_use]
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "ProtocolInfo" => Self::ProtocolInfo,
            "NodeInfo" => Self::NodeInfo,
            "CommandClasses" => Self::CommandClasses,
            "Complete" => Self::Complete,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Default)]
struct NodeInner {
    status: NodeStatus,
    interview_stage: InterviewStage,
    device_class: Option<DeviceClass>,
    command_classes: BTreeMap<CommandClass, CommandClassInfo>,
    is_secure: bool,
    has_suc_return_route: bool,
}

/// A node known to the controller.
///
/// Nodes are created by the interview (from the stick's init data), by an
/// inclusion commit, or by a replace commit, and live in the controller's
/// registry until removal is confirmed or the stick is hard-reset.
pub struct Node {
    id: NodeId,
    transport: Arc<dyn Transport>,
    value_db: ValueDb,
    inner: RwLock<NodeInner>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("status", &inner.status)
            .field("interview_stage", &inner.interview_stage)
            .field("is_secure", &inner.is_secure)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node with an empty capability set.
    #[must_use]
    pub fn new(id: NodeId, transport: Arc<dyn Transport>, value_db: ValueDb) -> Self {
        Self {
            id,
            transport,
            value_db,
            inner: RwLock::new(NodeInner::default()),
        }
    }

    /// The node id.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// The node's view of the value store.
    #[must_use]
    pub const fn value_db(&self) -> &ValueDb {
        &self.value_db
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status and interview stage
    // ─────────────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.inner.read().status
    }

    pub fn set_status(&self, status: NodeStatus) {
        self.inner.write().status = status;
    }

    /// Mark the node as alive.
    pub fn mark_as_alive(&self) {
        self.set_status(NodeStatus::Alive);
    }

    #[must_use]
    pub fn interview_stage(&self) -> InterviewStage {
        self.inner.read().interview_stage
    }

    pub fn set_interview_stage(&self, stage: InterviewStage) {
        self.inner.write().interview_stage = stage;
    }

    #[must_use]
    pub fn device_class(&self) -> Option<DeviceClass> {
        self.inner.read().device_class
    }

    pub fn set_device_class(&self, device_class: DeviceClass) {
        self.inner.write().device_class = Some(device_class);
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner.read().is_secure
    }

    pub fn set_secure(&self, secure: bool) {
        self.inner.write().is_secure = secure;
    }

    #[must_use]
    pub fn has_suc_return_route(&self) -> bool {
        self.inner.read().has_suc_return_route
    }

    pub fn set_has_suc_return_route(&self, value: bool) {
        self.inner.write().has_suc_return_route = value;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Command class registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the node advertises support for a command class.
    #[must_use]
    pub fn supports_cc(&self, cc: CommandClass) -> bool {
        self.inner
            .read()
            .command_classes
            .get(&cc)
            .is_some_and(|info| info.supported)
    }

    /// Whether the node can control a command class on other nodes.
    #[must_use]
    pub fn controls_cc(&self, cc: CommandClass) -> bool {
        self.inner
            .read()
            .command_classes
            .get(&cc)
            .is_some_and(|info| info.controlled)
    }

    /// The implemented version of a command class (0 while unknown).
    #[must_use]
    pub fn cc_version(&self, cc: CommandClass) -> u8 {
        self.inner
            .read()
            .command_classes
            .get(&cc)
            .map_or(0, |info| info.version)
    }

    /// Add or strengthen a command class registry entry.
    pub fn add_cc(&self, cc: CommandClass, info: CommandClassInfo) {
        self.inner
            .write()
            .command_classes
            .entry(cc)
            .and_modify(|existing| existing.merge(info))
            .or_insert(info);
    }

    /// Remove a command class from the registry.
    pub fn remove_cc(&self, cc: CommandClass) {
        self.inner.write().command_classes.remove(&cc);
    }

    /// All supported command classes.
    #[must_use]
    pub fn supported_ccs(&self) -> Vec<CommandClass> {
        self.inner
            .read()
            .command_classes
            .iter()
            .filter(|(_, info)| info.supported)
            .map(|(cc, _)| *cc)
            .collect()
    }

    /// The full command class registry.
    #[must_use]
    pub fn implemented_command_classes(&self) -> BTreeMap<CommandClass, CommandClassInfo> {
        self.inner.read().command_classes.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Endpoints
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the node exposes the given endpoint. Endpoint 0 is the root
    /// device and always exists.
    #[must_use]
    pub fn has_endpoint(&self, endpoint: u8) -> bool {
        if endpoint == 0 {
            return true;
        }
        if !self.supports_cc(CommandClass::MultiChannel) {
            return false;
        }
        let count = self
            .value_db
            .get_value(&ValueId::new(CommandClass::MultiChannel, 0, "individualCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        u64::from(endpoint) <= count
    }

    /// The command classes supported by an endpoint. Endpoint 0 reports the
    /// root device's capability set.
    #[must_use]
    pub fn endpoint_supported_ccs(&self, endpoint: u8) -> Vec<CommandClass> {
        if endpoint == 0 {
            return self.supported_ccs();
        }
        self.value_db
            .get_value(&ValueId::new(
                CommandClass::MultiChannel,
                endpoint,
                "commandClasses",
            ))
            .and_then(|v| {
                v.as_array().map(|ids| {
                    ids.iter()
                        .filter_map(serde_json::Value::as_u64)
                        .filter_map(|id| u8::try_from(id).ok())
                        .map(CommandClass::from_id)
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    /// The device configuration record for this node, resolved through the
    /// manufacturer triple stored in its value database.
    #[must_use]
    pub fn device_config(&self) -> Option<Arc<DeviceConfig>> {
        let read = |property: &str| {
            self.value_db
                .get_value(&ValueId::new(CommandClass::ManufacturerSpecific, 0, property))
                .and_then(|v| v.as_u64())
                .and_then(|v| u16::try_from(v).ok())
        };
        let manufacturer_id = read("manufacturerId")?;
        let product_type = read("productType")?;
        let product_id = read("productId")?;
        self.transport
            .config_manager()
            .lookup(manufacturer_id, product_type, product_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Probe the node with a no-operation frame.
    pub async fn ping(&self) -> bool {
        let options = SendMessageOptions::default().with_priority(MessagePriority::Ping);
        let request = Request::SendData {
            node_id: self.id,
            command: CcCommand::NoOperation,
        };
        match self.transport.send_message(request, options).await {
            Ok(_) => true,
            Err(err) => {
                debug!(node_id = %self.id, error = %err, "ping failed");
                false
            }
        }
    }

    /// Read the node's neighbor list from the stick's routing table.
    pub async fn query_neighbors_internal(&self) -> ZWaveResult<Vec<NodeId>> {
        let request = Request::GetRoutingInfo { node_id: self.id };
        match self
            .transport
            .send_message(request, SendMessageOptions::default())
            .await?
        {
            Response::RoutingInfo { neighbors } => Ok(neighbors),
            _ => Err(ZWaveError::UnexpectedResponse {
                function: FunctionType::GetRoutingInfo,
            }),
        }
    }

    /// Send a typed command-class command to this node.
    pub(crate) async fn send_cc(
        &self,
        command: CcCommand,
        options: SendMessageOptions,
    ) -> ZWaveResult<CcReply> {
        let request = Request::SendData {
            node_id: self.id,
            command,
        };
        match self.transport.send_message(request, options).await? {
            Response::SendData(reply) => Ok(reply),
            _ => Err(ZWaveError::UnexpectedResponse {
                function: FunctionType::SendData,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cache (de)serialization
    // ─────────────────────────────────────────────────────────────────────────

    /// Serialize this node for the network cache.
    #[must_use]
    pub fn serialize(&self) -> serde_json::Value {
        let inner = self.inner.read();
        let command_classes: serde_json::Map<String, serde_json::Value> = inner
            .command_classes
            .iter()
            .map(|(cc, info)| {
                (
                    format!("0x{:02x}", cc.id()),
                    serde_json::to_value(info).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        json!({
            "id": self.id.as_u8(),
            "status": inner.status.as_str(),
            "interviewStage": inner.interview_stage.as_str(),
            "isSecure": inner.is_secure,
            "hasSUCReturnRoute": inner.has_suc_return_route,
            "deviceClass": inner.device_class,
            "commandClasses": command_classes,
        })
    }

    /// Restore this node from a cache entry.
    ///
    /// # Errors
    ///
    /// Returns [`ZWaveError::InvalidCache`] when the entry's id is missing or
    /// does not match this node's id.
    pub fn deserialize(&self, data: &serde_json::Value) -> ZWaveResult<()> {
        let cached_id = data
            .get("id")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ZWaveError::InvalidCache {
                reason: format!("cached entry for node {} has no id", self.id),
            })?;
        if cached_id != u64::from(self.id.as_u8()) {
            return Err(ZWaveError::InvalidCache {
                reason: format!(
                    "cached entry claims node id {cached_id} but is stored for node {}",
                    self.id
                ),
            });
        }

        let mut inner = self.inner.write();
        if let Some(status) = data.get("status").and_then(serde_json::Value::as_str) {
            inner.status = NodeStatus::from_str_lossy(status);
        }
        if let Some(stage) = data.get("interviewStage").and_then(serde_json::Value::as_str) {
            inner.interview_stage = InterviewStage::from_str_lossy(stage);
        }
        if let Some(secure) = data.get("isSecure").and_then(serde_json::Value::as_bool) {
            inner.is_secure = secure;
        }
        if let Some(route) = data
            .get("hasSUCReturnRoute")
            .and_then(serde_json::Value::as_bool)
        {
            inner.has_suc_return_route = route;
        }
        if let Some(device_class) = data.get("deviceClass") {
            if let Ok(device_class) = serde_json::from_value::<DeviceClass>(device_class.clone()) {
                inner.device_class = Some(device_class);
            }
        }
        if let Some(classes) = data.get("commandClasses").and_then(|v| v.as_object()) {
            for (key, value) in classes {
                let Some(id) = key
                    .strip_prefix("0x")
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                else {
                    continue;
                };
                if let Ok(info) = serde_json::from_value::<CommandClassInfo>(value.clone()) {
                    inner.command_classes.insert(CommandClass::from_id(id), info);
                }
            }
        }
        Ok(())
    }
}
