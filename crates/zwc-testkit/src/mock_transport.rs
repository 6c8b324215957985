//! A scriptable in-memory transport.
//!
//! The mock answers controller requests from a per-function script queue,
//! falling back to sensible defaults, and emulates the association and
//! security behavior of nodes so that mutation-then-refresh flows round-trip
//! without per-test scripting. Unsolicited reports are injected manually or
//! scheduled to fire when a request of a given function type is sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use zwc_controller::{
    ConfigManager, NetworkKey, RequestHandler, SecurityManager, SendMessageOptions,
    TransactionPredicate, Transport, TransportTimeouts, NETWORK_KEY_SIZE,
};
use zwc_core::{
    Association, Callback, CcCommand, CcReply, CommandClass, ControllerCapabilities, FunctionType,
    HomeId, LibraryType, NodeId, RemoveFailedNodeResponse, RemoveFailedNodeStatus, Request,
    Response, NeighborUpdateStatus, ValueStore, ZWaveError, ZWaveResult,
};

const DEFAULT_GROUP_CAPACITY: u8 = 5;

/// Builder for [`MockTransport`].
pub struct MockTransportBuilder {
    home_id: HomeId,
    own_node_id: NodeId,
    suc_node_id: NodeId,
    library_version: String,
    library_type: LibraryType,
    serial_api_version: String,
    manufacturer_id: u16,
    product_type: u16,
    product_id: u16,
    capabilities: ControllerCapabilities,
    node_ids: Vec<NodeId>,
    supported_function_types: Vec<FunctionType>,
    network_key: Option<[u8; NETWORK_KEY_SIZE]>,
    cache: Option<serde_json::Value>,
    timeouts: TransportTimeouts,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            home_id: HomeId::new(0x0102_0304),
            own_node_id: NodeId::new(1),
            suc_node_id: NodeId::new(0),
            library_version: "Z-Wave 4.05".into(),
            library_type: LibraryType::StaticController,
            serial_api_version: "1.0".into(),
            manufacturer_id: 0x0086,
            product_type: 0x0001,
            product_id: 0x005A,
            capabilities: ControllerCapabilities::default(),
            node_ids: vec![NodeId::new(1)],
            supported_function_types: vec![
                FunctionType::GetSerialApiInitData,
                FunctionType::GetControllerCapabilities,
                FunctionType::SetSerialApiTimeouts,
                FunctionType::GetSerialApiCapabilities,
                FunctionType::SendData,
                FunctionType::GetControllerVersion,
                FunctionType::GetControllerId,
                FunctionType::HardReset,
                FunctionType::AssignReturnRoute,
                FunctionType::DeleteReturnRoute,
                FunctionType::RequestNodeNeighborUpdate,
                FunctionType::AddNodeToNetwork,
                FunctionType::RemoveNodeFromNetwork,
                FunctionType::AssignSucReturnRoute,
                FunctionType::SetSucNodeId,
                FunctionType::GetSucNodeId,
                FunctionType::RemoveFailedNode,
                FunctionType::IsFailedNode,
                FunctionType::ReplaceFailedNode,
                FunctionType::GetRoutingInfo,
            ],
            network_key: None,
            cache: None,
            timeouts: TransportTimeouts::default(),
        }
    }
}

impl MockTransportBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn own_node_id(mut self, node_id: NodeId) -> Self {
        self.own_node_id = node_id;
        self
    }

    #[must_use]
    pub const fn suc_node_id(mut self, node_id: NodeId) -> Self {
        self.suc_node_id = node_id;
        self
    }

    #[must_use]
    pub const fn library_type(mut self, library_type: LibraryType) -> Self {
        self.library_type = library_type;
        self
    }

    #[must_use]
    pub const fn capabilities(mut self, capabilities: ControllerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Node ids reported by the init data query.
    #[must_use]
    pub fn node_ids(mut self, ids: &[u8]) -> Self {
        self.node_ids = ids.iter().copied().map(NodeId::new).collect();
        self
    }

    #[must_use]
    pub fn supported_function_types(mut self, functions: Vec<FunctionType>) -> Self {
        self.supported_function_types = functions;
        self
    }

    /// Configure a security manager with the given network key.
    #[must_use]
    pub const fn network_key(mut self, key: [u8; NETWORK_KEY_SIZE]) -> Self {
        self.network_key = Some(key);
        self
    }

    /// A network cache handed out through `cached_network`.
    #[must_use]
    pub fn cache(mut self, cache: serde_json::Value) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn finish(self) -> Arc<MockTransport> {
        Arc::new_cyclic(|weak| MockTransport {
            this: weak.clone(),
            home_id: self.home_id,
            own_node_id: self.own_node_id,
            suc_node_id: self.suc_node_id,
            library_version: self.library_version,
            library_type: self.library_type,
            serial_api_version: self.serial_api_version,
            manufacturer_id: self.manufacturer_id,
            product_type: self.product_type,
            product_id: self.product_id,
            capabilities: self.capabilities,
            node_ids: self.node_ids,
            supported_function_types: self.supported_function_types,
            security: self
                .network_key
                .map(|key| Arc::new(SecurityManager::new(NetworkKey::new(key)))),
            cache: self.cache,
            timeouts: self.timeouts,
            value_store: Arc::new(ValueStore::new()),
            config_manager: Arc::new(ConfigManager::new()),
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            auto_callbacks: Mutex::new(HashMap::new()),
            held: Mutex::new(HashSet::new()),
            parked: Mutex::new(Vec::new()),
            rejections: Mutex::new(Vec::new()),
            ping_failures: Mutex::new(HashSet::new()),
            cc_failures: Mutex::new(HashMap::new()),
            associations: Mutex::new(HashMap::new()),
            association_capacity: Mutex::new(HashMap::new()),
            mc_associations: Mutex::new(HashMap::new()),
            mc_association_capacity: Mutex::new(HashMap::new()),
            cc_versions: Mutex::new(HashMap::new()),
            init_value_db_calls: AtomicUsize::new(0),
        })
    }
}

struct ParkedSend {
    request: Request,
    response: ZWaveResult<Response>,
    tx: oneshot::Sender<ZWaveResult<Response>>,
}

/// The mock transport.
pub struct MockTransport {
    this: Weak<Self>,
    home_id: HomeId,
    own_node_id: NodeId,
    suc_node_id: NodeId,
    library_version: String,
    library_type: LibraryType,
    serial_api_version: String,
    manufacturer_id: u16,
    product_type: u16,
    product_id: u16,
    capabilities: ControllerCapabilities,
    node_ids: Vec<NodeId>,
    supported_function_types: Vec<FunctionType>,
    security: Option<Arc<SecurityManager>>,
    cache: Option<serde_json::Value>,
    timeouts: TransportTimeouts,
    value_store: Arc<ValueStore>,
    config_manager: Arc<ConfigManager>,

    sent: Mutex<Vec<Request>>,
    scripted: Mutex<HashMap<u8, VecDeque<ZWaveResult<Response>>>>,
    handlers: Mutex<HashMap<u8, (RequestHandler, bool)>>,
    auto_callbacks: Mutex<HashMap<u8, VecDeque<Vec<Callback>>>>,
    held: Mutex<HashSet<u8>>,
    parked: Mutex<Vec<ParkedSend>>,
    rejections: Mutex<Vec<TransactionPredicate>>,

    ping_failures: Mutex<HashSet<NodeId>>,
    cc_failures: Mutex<HashMap<(NodeId, u8), VecDeque<ZWaveError>>>,
    associations: Mutex<HashMap<(NodeId, u8), Vec<NodeId>>>,
    association_capacity: Mutex<HashMap<(NodeId, u8), u8>>,
    mc_associations: Mutex<HashMap<(NodeId, u8), Vec<Association>>>,
    mc_association_capacity: Mutex<HashMap<(NodeId, u8), u8>>,
    cc_versions: Mutex<HashMap<(NodeId, u8), u8>>,

    init_value_db_calls: AtomicUsize,
}

impl MockTransport {
    // ─────────────────────────────────────────────────────────────────────────
    // Scripting
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a scripted result for the next request of a function type.
    pub fn script(&self, function: FunctionType, result: ZWaveResult<Response>) {
        self.scripted
            .lock()
            .entry(function.id())
            .or_default()
            .push_back(result);
    }

    /// Queue callbacks to be injected after the next request of a function
    /// type was answered.
    pub fn on_request_inject(&self, function: FunctionType, callbacks: Vec<Callback>) {
        self.auto_callbacks
            .lock()
            .entry(function.id())
            .or_default()
            .push_back(callbacks);
    }

    /// Make pings to a node fail with a node timeout.
    pub fn fail_ping(&self, node_id: NodeId) {
        self.ping_failures.lock().insert(node_id);
    }

    /// Let a node answer pings again.
    pub fn clear_ping_failure(&self, node_id: NodeId) {
        self.ping_failures.lock().remove(&node_id);
    }

    /// Fail the next command of the given command class sent to a node.
    pub fn fail_cc(&self, node_id: NodeId, cc: CommandClass, error: ZWaveError) {
        self.cc_failures
            .lock()
            .entry((node_id, cc.id()))
            .or_default()
            .push_back(error);
    }

    /// Park requests of a function type until released or rejected.
    pub fn hold_function(&self, function: FunctionType) {
        self.held.lock().insert(function.id());
    }

    /// Stop holding a function type and answer everything parked on it.
    pub fn release_function(&self, function: FunctionType) {
        self.held.lock().remove(&function.id());
        let released: Vec<ParkedSend> = {
            let mut parked = self.parked.lock();
            let (matching, rest): (Vec<ParkedSend>, Vec<ParkedSend>) = parked
                .drain(..)
                .partition(|send| send.request.function_type() == function);
            *parked = rest;
            matching
        };
        for send in released {
            let _ = send.tx.send(send.response);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Device emulation state
    // ─────────────────────────────────────────────────────────────────────────

    /// Seed the plain association state of a node's group.
    pub fn seed_association(&self, node_id: NodeId, group: u8, destinations: &[u8]) {
        self.associations.lock().insert(
            (node_id, group),
            destinations.iter().copied().map(NodeId::new).collect(),
        );
    }

    /// Seed the multi-channel association state of a node's group.
    pub fn seed_mc_association(&self, node_id: NodeId, group: u8, destinations: &[Association]) {
        self.mc_associations
            .lock()
            .insert((node_id, group), destinations.to_vec());
    }

    /// Override the reported capacity of a plain group.
    pub fn set_group_capacity(&self, node_id: NodeId, group: u8, capacity: u8) {
        self.association_capacity
            .lock()
            .insert((node_id, group), capacity);
    }

    /// Override the version a node reports for a command class.
    pub fn set_cc_version(&self, node_id: NodeId, cc: CommandClass, version: u8) {
        self.cc_versions.lock().insert((node_id, cc.id()), version);
    }

    /// The current plain association state of a node's group.
    #[must_use]
    pub fn association_state(&self, node_id: NodeId, group: u8) -> Vec<NodeId> {
        self.associations
            .lock()
            .get(&(node_id, group))
            .cloned()
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// All sent requests, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    /// The sent requests of a single function type.
    #[must_use]
    pub fn sent_of(&self, function: FunctionType) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter(|request| request.function_type() == function)
            .cloned()
            .collect()
    }

    /// Forget all recorded requests.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// How often `init_value_dbs` was invoked.
    #[must_use]
    pub fn init_value_db_calls(&self) -> usize {
        self.init_value_db_calls.load(Ordering::Relaxed)
    }

    /// Whether a handler is registered for the function type.
    #[must_use]
    pub fn has_handler(&self, function: FunctionType) -> bool {
        self.handlers.lock().contains_key(&function.id())
    }

    /// Whether any recorded rejection predicate matches the request.
    #[must_use]
    pub fn rejection_matches(&self, request: &Request) -> bool {
        self.rejections
            .lock()
            .iter()
            .any(|predicate| predicate(request))
    }

    /// How many rejection predicates were recorded.
    #[must_use]
    pub fn rejection_count(&self) -> usize {
        self.rejections.lock().len()
    }

    /// Poll until at least `min_count` requests of a function type were sent.
    ///
    /// # Panics
    ///
    /// Panics after two seconds without the requests appearing.
    pub async fn wait_for_request(&self, function: FunctionType, min_count: usize) {
        for _ in 0..400 {
            if self.sent_of(function).len() >= min_count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {min_count} request(s) of {function}");
    }

    /// Poll until a handler for the function type is registered.
    ///
    /// # Panics
    ///
    /// Panics after two seconds without a registration.
    pub async fn wait_for_handler(&self, function: FunctionType) {
        for _ in 0..400 {
            if self.has_handler(function) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for a handler for {function}");
    }

    /// Deliver an unsolicited report to the registered handler.
    ///
    /// Returns whether the report was handled. One-shot handlers are removed
    /// after handling their first report.
    pub async fn inject(&self, callback: Callback) -> bool {
        let key = callback.function_type().id();
        let entry = self.handlers.lock().get(&key).cloned();
        let Some((handler, one_shot)) = entry else {
            debug!(function = %callback.function_type(), "no handler for injected callback");
            return false;
        };
        let handled = handler(callback).await;
        if handled && one_shot {
            self.handlers.lock().remove(&key);
        }
        handled
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Response synthesis
    // ─────────────────────────────────────────────────────────────────────────

    fn default_response(&self, request: &Request) -> ZWaveResult<Response> {
        match request {
            Request::GetControllerVersion => Ok(Response::ControllerVersion {
                library_version: self.library_version.clone(),
                library_type: self.library_type,
            }),
            Request::GetControllerId => Ok(Response::ControllerId {
                home_id: self.home_id,
                own_node_id: self.own_node_id,
            }),
            Request::GetControllerCapabilities => {
                Ok(Response::ControllerCapabilities(self.capabilities))
            }
            Request::GetSerialApiCapabilities => Ok(Response::SerialApiCapabilities {
                serial_api_version: self.serial_api_version.clone(),
                manufacturer_id: self.manufacturer_id,
                product_type: self.product_type,
                product_id: self.product_id,
                supported_function_types: self.supported_function_types.clone(),
            }),
            Request::GetSerialApiInitData => Ok(Response::SerialApiInitData {
                node_ids: self.node_ids.clone(),
                is_slave: false,
                supports_timers: false,
            }),
            Request::SetSerialApiTimeouts {
                ack_timeout_ms,
                byte_timeout_ms,
            } => Ok(Response::SerialApiTimeouts {
                ack_timeout_ms: *ack_timeout_ms,
                byte_timeout_ms: *byte_timeout_ms,
            }),
            Request::GetSucNodeId => Ok(Response::SucNodeId {
                suc_node_id: self.suc_node_id,
            }),
            Request::SetSucNodeId { .. } => Ok(Response::SetSucNodeId { success: true }),
            Request::HardReset
            | Request::AddNodeToNetwork { .. }
            | Request::RemoveNodeFromNetwork { .. } => Ok(Response::Ack),
            Request::ReplaceFailedNode { .. } => {
                Ok(Response::ReplaceFailedNode { start_flags: 0 })
            }
            Request::RemoveFailedNode { .. } => Ok(Response::RemoveFailedNode(
                RemoveFailedNodeResponse::Status(RemoveFailedNodeStatus::NodeRemoved),
            )),
            Request::IsFailedNode { .. } => Ok(Response::IsFailedNode { failed: false }),
            Request::RequestNodeNeighborUpdate { .. } => {
                Ok(Response::NeighborUpdate(NeighborUpdateStatus::Done))
            }
            Request::GetRoutingInfo { .. } => Ok(Response::RoutingInfo {
                neighbors: Vec::new(),
            }),
            Request::DeleteReturnRoute { .. }
            | Request::AssignReturnRoute { .. }
            | Request::AssignSucReturnRoute { .. } => Ok(Response::ReturnRoute { success: true }),
            Request::SendData { node_id, command } => self.emulate_send_data(*node_id, command),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn emulate_send_data(&self, node_id: NodeId, command: &CcCommand) -> ZWaveResult<Response> {
        if let Some(error) = self
            .cc_failures
            .lock()
            .get_mut(&(node_id, command.command_class().id()))
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let reply = match command {
            CcCommand::NoOperation => {
                if self.ping_failures.lock().contains(&node_id) {
                    return Err(ZWaveError::NodeTimeout { node_id });
                }
                CcReply::Ack
            }
            CcCommand::AssociationGet { group } => {
                let node_ids = self
                    .associations
                    .lock()
                    .get(&(node_id, *group))
                    .cloned()
                    .unwrap_or_default();
                let max_nodes = self
                    .association_capacity
                    .lock()
                    .get(&(node_id, *group))
                    .copied()
                    .unwrap_or(DEFAULT_GROUP_CAPACITY);
                CcReply::AssociationReport {
                    group: *group,
                    max_nodes,
                    node_ids,
                }
            }
            CcCommand::AssociationSet { group, node_ids } => {
                let mut associations = self.associations.lock();
                let entry = associations.entry((node_id, *group)).or_default();
                for id in node_ids {
                    if !entry.contains(id) {
                        entry.push(*id);
                    }
                }
                CcReply::Ack
            }
            CcCommand::AssociationRemove { group, node_ids } => {
                let mut associations = self.associations.lock();
                if let Some(entry) = associations.get_mut(&(node_id, *group)) {
                    if node_ids.is_empty() {
                        entry.clear();
                    } else {
                        entry.retain(|id| !node_ids.contains(id));
                    }
                }
                CcReply::Ack
            }
            CcCommand::AssociationRemoveFromAllGroups { node_ids } => {
                let mut associations = self.associations.lock();
                for ((node, _), entry) in associations.iter_mut() {
                    if *node == node_id {
                        entry.retain(|id| !node_ids.contains(id));
                    }
                }
                CcReply::Ack
            }
            CcCommand::MultiChannelAssociationGet { group } => {
                let destinations = self
                    .mc_associations
                    .lock()
                    .get(&(node_id, *group))
                    .cloned()
                    .unwrap_or_default();
                let max_nodes = self
                    .mc_association_capacity
                    .lock()
                    .get(&(node_id, *group))
                    .copied()
                    .unwrap_or(DEFAULT_GROUP_CAPACITY);
                CcReply::MultiChannelAssociationReport {
                    group: *group,
                    max_nodes,
                    destinations,
                }
            }
            CcCommand::MultiChannelAssociationSet {
                group,
                node_ids,
                destinations,
            } => {
                let mut mc = self.mc_associations.lock();
                let entry = mc.entry((node_id, *group)).or_default();
                for id in node_ids {
                    let destination = Association::plain(*id);
                    if !entry.contains(&destination) {
                        entry.push(destination);
                    }
                }
                for destination in destinations {
                    if !entry.contains(destination) {
                        entry.push(*destination);
                    }
                }
                CcReply::Ack
            }
            CcCommand::MultiChannelAssociationRemove {
                group,
                node_ids,
                destinations,
            } => {
                let mut mc = self.mc_associations.lock();
                let mut remove_from = |entry: &mut Vec<Association>| {
                    // removing a node id drops its endpoint destinations too
                    entry.retain(|existing| {
                        !node_ids.contains(&existing.node_id)
                            && !destinations.contains(existing)
                    });
                };
                match group {
                    Some(group) => {
                        if let Some(entry) = mc.get_mut(&(node_id, *group)) {
                            remove_from(entry);
                        }
                    }
                    None => {
                        for ((node, _), entry) in mc.iter_mut() {
                            if *node == node_id {
                                remove_from(entry);
                            }
                        }
                    }
                }
                CcReply::Ack
            }
            CcCommand::SecuritySchemeGet => CcReply::SecurityScheme { scheme: 0 },
            CcCommand::SecurityNonceGet { .. } => CcReply::SecurityNonce { nonce: [0xA5; 8] },
            CcCommand::SecurityNetworkKeySet { .. } | CcCommand::SecurityInheritScheme => {
                CcReply::Ack
            }
            CcCommand::WakeUpIntervalGet => CcReply::WakeUpInterval {
                interval_secs: 3600,
                destination: NodeId::new(0),
            },
            CcCommand::WakeUpIntervalSet { .. } => CcReply::Ack,
            CcCommand::VersionCcGet { cc } => {
                let version = self
                    .cc_versions
                    .lock()
                    .get(&(node_id, cc.id()))
                    .copied()
                    .unwrap_or(1);
                CcReply::VersionCc { cc: *cc, version }
            }
        };
        Ok(Response::SendData(reply))
    }

    fn schedule_callbacks(&self, function: FunctionType) {
        let batch = self
            .auto_callbacks
            .lock()
            .get_mut(&function.id())
            .and_then(VecDeque::pop_front);
        let Some(batch) = batch else { return };
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            for callback in batch {
                this.inject(callback).await;
            }
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_message(
        &self,
        request: Request,
        _options: SendMessageOptions,
    ) -> ZWaveResult<Response> {
        let function = request.function_type();
        self.sent.lock().push(request.clone());

        let response = self
            .scripted
            .lock()
            .get_mut(&function.id())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_response(&request));

        self.schedule_callbacks(function);

        if self.held.lock().contains(&function.id()) {
            let (tx, rx) = oneshot::channel();
            self.parked.lock().push(ParkedSend {
                request,
                response,
                tx,
            });
            return rx.await.unwrap_or_else(|_| {
                Err(ZWaveError::MessageDropped {
                    reason: "the transport was shut down".into(),
                })
            });
        }

        response
    }

    fn register_request_handler(
        &self,
        function: FunctionType,
        handler: RequestHandler,
        one_shot: bool,
    ) {
        self.handlers
            .lock()
            .insert(function.id(), (handler, one_shot));
    }

    fn unregister_request_handler(&self, function: FunctionType) {
        self.handlers.lock().remove(&function.id());
    }

    fn reject_transactions(&self, predicate: TransactionPredicate) {
        let rejected: Vec<ParkedSend> = {
            let mut parked = self.parked.lock();
            let (matching, rest): (Vec<ParkedSend>, Vec<ParkedSend>) =
                parked.drain(..).partition(|send| predicate(&send.request));
            *parked = rest;
            matching
        };
        for send in rejected {
            let _ = send.tx.send(Err(ZWaveError::MessageDropped {
                reason: "the transaction was rejected".into(),
            }));
        }
        self.rejections.lock().push(predicate);
    }

    fn security_manager(&self) -> Option<Arc<SecurityManager>> {
        self.security.clone()
    }

    fn value_store(&self) -> Arc<ValueStore> {
        Arc::clone(&self.value_store)
    }

    fn config_manager(&self) -> Arc<ConfigManager> {
        Arc::clone(&self.config_manager)
    }

    fn timeouts(&self) -> TransportTimeouts {
        self.timeouts
    }

    async fn init_value_dbs(&self) -> ZWaveResult<()> {
        self.init_value_db_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn cached_network(&self) -> Option<serde_json::Value> {
        self.cache.clone()
    }
}
