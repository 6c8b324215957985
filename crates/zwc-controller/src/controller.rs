//! The controller singleton: registry, identity cache, and reset paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

use zwc_core::{
    decode_failed_node_start_flags, Callback, ControllerCapabilities, FunctionType, HomeId,
    LibraryType, NodeId, RemoveFailedNodeResponse, RemoveFailedNodeStatus, Request, Response,
    ZWaveError, ZWaveResult,
};

use crate::{
    ControllerEvent, EventBus, HealNodeStatus, Node, RequestHandler, SendMessageOptions,
    SignalSlot, Transport,
};

/// Identity and role information gathered by the controller interview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerIdentity {
    pub home_id: HomeId,
    pub own_node_id: NodeId,
    /// The SUC's node id; 0 means there is none.
    pub suc_node_id: NodeId,
    pub library_version: String,
    pub library_type: LibraryType,
    pub serial_api_version: String,
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    pub capabilities: ControllerCapabilities,
    pub is_slave: bool,
    pub supports_timers: bool,
}

/// The node slot reserved by an in-flight inclusion, exclusion or replace.
///
/// At most one variant other than `Idle` is ever populated, and only while
/// the corresponding activity flag is set.
#[derive(Debug, Default)]
pub(crate) enum PendingNode {
    #[default]
    Idle,
    Inclusion(Arc<Node>),
    Exclusion(Arc<Node>),
    Replace(Arc<Node>),
}

#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    pub identity: Option<ControllerIdentity>,
    pub supported_function_types: Vec<FunctionType>,
    pub supported_function_ids: HashSet<u8>,
    pub inclusion_active: bool,
    pub exclusion_active: bool,
    pub include_non_secure: bool,
    pub include_controller: bool,
    pub pending: PendingNode,
    pub heal_active: bool,
    pub heal_progress: BTreeMap<NodeId, HealNodeStatus>,
}

/// The controller core.
///
/// Owns the node registry and drives the protocol state machines over the
/// [`Transport`]. One instance exists per driver.
pub struct Controller {
    transport: Arc<dyn Transport>,
    events: EventBus,
    nodes: RwLock<HashMap<NodeId, Arc<Node>>>,
    pub(crate) state: RwLock<ControllerState>,
    pub(crate) begin_inclusion_signal: SignalSlot,
    pub(crate) stop_inclusion_signal: SignalSlot,
    pub(crate) begin_exclusion_signal: SignalSlot,
    pub(crate) stop_exclusion_signal: SignalSlot,
    pub(crate) replace_failed_signal: SignalSlot,
}

impl Controller {
    /// Create a controller over the given transport.
    ///
    /// The controller is unusable until [`Controller::interview`] has
    /// completed.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            events: EventBus::new(),
            nodes: RwLock::new(HashMap::new()),
            state: RwLock::new(ControllerState::default()),
            begin_inclusion_signal: SignalSlot::new(),
            stop_inclusion_signal: SignalSlot::new(),
            begin_exclusion_signal: SignalSlot::new(),
            stop_exclusion_signal: SignalSlot::new(),
            replace_failed_signal: SignalSlot::new(),
        })
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Subscribe to controller events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ControllerEvent) {
        self.events.emit(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity and capabilities
    // ─────────────────────────────────────────────────────────────────────────

    /// The interview result, if the interview has completed.
    #[must_use]
    pub fn identity(&self) -> Option<ControllerIdentity> {
        self.state.read().identity.clone()
    }

    /// The controller's own node id.
    ///
    /// # Errors
    ///
    /// Returns [`ZWaveError::DriverNotReady`] before the interview completed.
    pub fn own_node_id(&self) -> ZWaveResult<NodeId> {
        self.state
            .read()
            .identity
            .as_ref()
            .map(|identity| identity.own_node_id)
            .ok_or(ZWaveError::DriverNotReady)
    }

    /// Whether the stick supports a serial API function.
    ///
    /// # Errors
    ///
    /// Returns [`ZWaveError::DriverNotReady`] before the interview completed.
    pub fn is_function_supported(&self, function: FunctionType) -> ZWaveResult<bool> {
        let state = self.state.read();
        if state.identity.is_none() || state.supported_function_ids.is_empty() {
            return Err(ZWaveError::DriverNotReady);
        }
        Ok(state.supported_function_ids.contains(&function.id()))
    }

    /// The supported function types, in the order the stick reported them.
    #[must_use]
    pub fn supported_function_types(&self) -> Vec<FunctionType> {
        self.state.read().supported_function_types.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Activity flags
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether an inclusion is in progress.
    #[must_use]
    pub fn is_inclusion_active(&self) -> bool {
        self.state.read().inclusion_active
    }

    /// Whether an exclusion is in progress.
    #[must_use]
    pub fn is_exclusion_active(&self) -> bool {
        self.state.read().exclusion_active
    }

    /// Whether a network heal is in progress.
    #[must_use]
    pub fn is_heal_active(&self) -> bool {
        self.state.read().heal_active
    }

    pub(crate) fn is_including_controller(&self) -> bool {
        self.state.read().include_controller
    }

    /// Snapshot of the per-node heal progress.
    #[must_use]
    pub fn heal_progress(&self) -> BTreeMap<NodeId, HealNodeStatus> {
        self.state.read().heal_progress.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Node registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a node, returning `None` when it is not in the registry.
    #[must_use]
    pub fn get_node(&self, node_id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().get(&node_id).cloned()
    }

    /// Look up a node that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ZWaveError::NodeNotFound`] when the node is not registered.
    pub fn get_node_or_err(&self, node_id: NodeId) -> ZWaveResult<Arc<Node>> {
        self.get_node(node_id)
            .ok_or(ZWaveError::NodeNotFound { node_id })
    }

    /// All registered node ids, sorted.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of all registered nodes.
    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    pub(crate) fn insert_node(&self, node: Arc<Node>) {
        self.nodes.write().insert(node.id(), node);
    }

    pub(crate) fn remove_node_entry(&self, node_id: NodeId) -> Option<Arc<Node>> {
        let node = self.nodes.write().remove(&node_id);
        if node.is_some() {
            self.transport.value_store().remove_node(node_id);
        }
        node
    }

    /// Serialize the network for the cache.
    #[must_use]
    pub fn serialize(&self) -> serde_json::Value {
        let nodes: serde_json::Map<String, serde_json::Value> = self
            .nodes
            .read()
            .values()
            .map(|node| (node.id().to_string(), node.serialize()))
            .collect();
        serde_json::json!({ "nodes": nodes })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // SUC management
    // ─────────────────────────────────────────────────────────────────────────

    /// Configure a node as SUC/SIS.
    pub(crate) async fn configure_suc(
        &self,
        node_id: NodeId,
        enable_suc: bool,
        enable_sis: bool,
    ) -> ZWaveResult<bool> {
        let request = Request::SetSucNodeId {
            suc_node_id: node_id,
            enable_suc,
            enable_sis,
        };
        match self
            .transport
            .send_message(request, SendMessageOptions::default())
            .await?
        {
            Response::SetSucNodeId { success } => Ok(success),
            _ => Err(ZWaveError::UnexpectedResponse {
                function: FunctionType::SetSucNodeId,
            }),
        }
    }

    /// Give a node a return route to the SUC, flipping its
    /// `has_suc_return_route` flag on success.
    pub async fn assign_suc_return_route(&self, node_id: NodeId) -> ZWaveResult<bool> {
        let request = Request::AssignSucReturnRoute { node_id };
        match self
            .transport
            .send_message(request, SendMessageOptions::default())
            .await?
        {
            Response::ReturnRoute { success } => {
                if success {
                    if let Some(node) = self.get_node(node_id) {
                        node.set_has_suc_return_route(true);
                    }
                }
                Ok(success)
            }
            _ => Err(ZWaveError::UnexpectedResponse {
                function: FunctionType::AssignSucReturnRoute,
            }),
        }
    }

    /// Ask the stick whether it considers a node failed.
    pub async fn is_failed_node(&self, node_id: NodeId) -> ZWaveResult<bool> {
        let request = Request::IsFailedNode { node_id };
        match self
            .transport
            .send_message(request, SendMessageOptions::default())
            .await?
        {
            Response::IsFailedNode { failed } => Ok(failed),
            _ => Err(ZWaveError::UnexpectedResponse {
                function: FunctionType::IsFailedNode,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Failed-node removal
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove a node the stick has marked as failed.
    ///
    /// # Errors
    ///
    /// Fails when the node still answers a ping, when the stick refuses to
    /// start the removal, or when the removal reports an unsuccessful status.
    pub async fn remove_failed_node(&self, node_id: NodeId) -> ZWaveResult<()> {
        let node = self.get_node_or_err(node_id)?;

        if node.ping().await {
            return Err(ZWaveError::ReplaceFailed {
                reason: format!(
                    "node {node_id} responded to a ping and cannot be removed as a failed node"
                ),
            });
        }

        let request = Request::RemoveFailedNode { node_id };
        match self
            .transport
            .send_message(request, SendMessageOptions::default())
            .await?
        {
            Response::RemoveFailedNode(RemoveFailedNodeResponse::StartFailed(flags)) => {
                let mut reason = String::from("the removal process could not be started:");
                for line in decode_failed_node_start_flags(flags) {
                    reason.push_str("\n- ");
                    reason.push_str(line);
                }
                Err(ZWaveError::RemoveFailed { reason })
            }
            Response::RemoveFailedNode(RemoveFailedNodeResponse::Status(status)) => match status {
                RemoveFailedNodeStatus::NodeOk => Err(ZWaveError::RemoveNodeOk { node_id }),
                RemoveFailedNodeStatus::NodeNotRemoved => Err(ZWaveError::RemoveFailed {
                    reason: format!("node {node_id} could not be removed"),
                }),
                RemoveFailedNodeStatus::NodeRemoved => {
                    info!(%node_id, "the failed node was removed");
                    self.emit(ControllerEvent::NodeRemoved {
                        node: Arc::clone(&node),
                        replaced: false,
                    });
                    self.remove_node_entry(node_id);
                    Ok(())
                }
            },
            _ => Err(ZWaveError::UnexpectedResponse {
                function: FunctionType::RemoveFailedNode,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Hard reset
    // ─────────────────────────────────────────────────────────────────────────

    /// Factory-reset the stick and empty the node registry.
    ///
    /// # Errors
    ///
    /// Propagates the transport error when the reset request cannot be sent;
    /// the confirmation handler is unregistered in that case.
    pub async fn hard_reset(&self) -> ZWaveResult<()> {
        info!("performing a hard reset");

        let (tx, rx) = oneshot::channel::<()>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let handler: RequestHandler = Arc::new(move |callback| {
            let tx = Arc::clone(&tx);
            Box::pin(async move {
                if matches!(callback, Callback::HardReset) {
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(());
                    }
                    true
                } else {
                    false
                }
            })
        });
        self.transport
            .register_request_handler(FunctionType::HardReset, handler, true);

        if let Err(err) = self
            .transport
            .send_message(Request::HardReset, SendMessageOptions::default())
            .await
        {
            self.transport
                .unregister_request_handler(FunctionType::HardReset);
            return Err(err);
        }

        // wait for the stick to confirm before dropping our state
        let _ = rx.await;

        let cleared: Vec<NodeId> = {
            let mut nodes = self.nodes.write();
            let ids = nodes.keys().copied().collect();
            nodes.clear();
            ids
        };
        let store = self.transport.value_store();
        for node_id in &cleared {
            store.remove_node(*node_id);
        }
        debug!(nodes = cleared.len(), "hard reset complete, registry cleared");
        Ok(())
    }
}
