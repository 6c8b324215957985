//! Inclusion, exclusion and replace-failed-node state machines.
//!
//! All three flows are driven by unsolicited status reports. The user-entry
//! operations arm a single-shot signal, kick the stick, and await the report
//! that settles it; the registered handlers run the transitions and publish
//! events. `begin_inclusion` and `begin_exclusion` return `false` without
//! side effects while the other operation is active.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use zwc_core::{
    decode_failed_node_start_flags, AddNodeMode, AddNodeReport, AddNodeStatus, Callback,
    CommandClassInfo, FunctionType, NodeId, RemoveNodeMode, RemoveNodeReport, RemoveNodeStatus,
    ReplaceFailedNodeStatus, Request, Response, ValueDb, ZWaveError, ZWaveResult,
};

use crate::{
    Controller, ControllerEvent, MessagePriority, Node, PendingNode, RequestHandler,
    SendMessageOptions, SignalSlot,
};

impl Controller {
    /// Register the handlers that drive the inclusion, exclusion and replace
    /// state machines. Called once at the end of the interview.
    pub(crate) fn register_protocol_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handler: RequestHandler = Arc::new(move |callback| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(controller) = weak.upgrade() else {
                    return false;
                };
                match callback {
                    Callback::AddNode(report) => {
                        controller.handle_add_node_report(report).await
                    }
                    _ => false,
                }
            })
        });
        self.transport()
            .register_request_handler(FunctionType::AddNodeToNetwork, handler, false);

        let weak = Arc::downgrade(self);
        let handler: RequestHandler = Arc::new(move |callback| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(controller) = weak.upgrade() else {
                    return false;
                };
                match callback {
                    Callback::RemoveNode(report) => {
                        controller.handle_remove_node_report(report).await
                    }
                    _ => false,
                }
            })
        });
        self.transport()
            .register_request_handler(FunctionType::RemoveNodeFromNetwork, handler, false);

        let weak = Arc::downgrade(self);
        let handler: RequestHandler = Arc::new(move |callback| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(controller) = weak.upgrade() else {
                    return false;
                };
                match callback {
                    Callback::ReplaceFailedNode(status) => {
                        controller.handle_replace_failed_status(status).await
                    }
                    _ => false,
                }
            })
        });
        self.transport()
            .register_request_handler(FunctionType::ReplaceFailedNode, handler, false);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inclusion
    // ─────────────────────────────────────────────────────────────────────────

    /// Put the stick into inclusion mode.
    ///
    /// Resolves with `true` once the stick acknowledges readiness and `false`
    /// when an inclusion or exclusion is already active.
    ///
    /// # Errors
    ///
    /// Rejects with [`ZWaveError::InclusionFailed`] when the stick reports a
    /// failure before becoming ready.
    pub async fn begin_inclusion(self: &Arc<Self>, include_non_secure: bool) -> ZWaveResult<bool> {
        {
            let mut state = self.state.write();
            if state.inclusion_active || state.exclusion_active {
                return Ok(false);
            }
            state.inclusion_active = true;
            state.include_non_secure = include_non_secure;
        }
        info!("starting inclusion");

        let rx = self.begin_inclusion_signal.create();
        let request = Request::AddNodeToNetwork {
            mode: AddNodeMode::Any,
            high_power: true,
            network_wide: true,
        };
        let options = SendMessageOptions::default().with_priority(MessagePriority::Controller);
        if let Err(err) = self.transport().send_message(request, options).await {
            self.state.write().inclusion_active = false;
            self.begin_inclusion_signal.clear();
            return Err(err);
        }
        SignalSlot::wait(rx).await
    }

    /// Leave inclusion mode.
    ///
    /// Resolves once the stick confirms; returns `false` when no inclusion
    /// was active.
    pub async fn stop_inclusion(&self) -> ZWaveResult<bool> {
        if !self.state.read().inclusion_active {
            return Ok(false);
        }
        let rx = self.stop_inclusion_signal.create();
        self.stop_inclusion_internal().await?;
        SignalSlot::wait(rx).await
    }

    /// Stop the inclusion process without waiting for the confirmation.
    pub(crate) async fn stop_inclusion_internal(&self) -> ZWaveResult<()> {
        {
            let mut state = self.state.write();
            if !state.inclusion_active {
                return Ok(());
            }
            state.inclusion_active = false;
        }
        let request = Request::AddNodeToNetwork {
            mode: AddNodeMode::Stop,
            high_power: true,
            network_wide: true,
        };
        let options = SendMessageOptions::default().with_priority(MessagePriority::Controller);
        self.transport().send_message(request, options).await?;
        info!("the inclusion process was stopped");
        self.emit(ControllerEvent::InclusionStopped);
        Ok(())
    }

    pub(crate) async fn handle_add_node_report(self: &Arc<Self>, report: AddNodeReport) -> bool {
        match report.status {
            AddNodeStatus::Ready => {
                debug!("the controller is now ready to add nodes");
                let secure = !self.state.read().include_non_secure;
                self.emit(ControllerEvent::InclusionStarted { secure });
                self.begin_inclusion_signal.resolve(true);
                true
            }
            AddNodeStatus::Failed => {
                if self.begin_inclusion_signal.is_pending() {
                    self.begin_inclusion_signal.reject(ZWaveError::InclusionFailed);
                    if let Err(err) = self.stop_inclusion_internal().await {
                        warn!(error = %err, "could not stop the failed inclusion");
                    }
                } else {
                    warn!("the inclusion process failed");
                    if let Err(err) = self.stop_inclusion_internal().await {
                        warn!(error = %err, "could not stop the failed inclusion");
                    }
                    self.emit(ControllerEvent::InclusionFailed);
                }
                true
            }
            AddNodeStatus::AddingSlave | AddNodeStatus::AddingController => {
                if report.status == AddNodeStatus::AddingController {
                    self.state.write().include_controller = true;
                }
                debug!(node_id = %report.node_id, "a node is being included");
                // remember the joining node until the Done report commits it
                let store = self.transport().value_store();
                let db = ValueDb::new(report.node_id, store, BTreeSet::new());
                let node = Node::new(report.node_id, Arc::clone(self.transport()), db);
                if let Some(device_class) = report.device_class {
                    node.set_device_class(device_class);
                }
                for cc in &report.supported_ccs {
                    node.add_cc(*cc, CommandClassInfo::supported(0));
                }
                for cc in &report.controlled_ccs {
                    node.add_cc(*cc, CommandClassInfo::controlled());
                }
                self.state.write().pending = PendingNode::Inclusion(Arc::new(node));
                true
            }
            AddNodeStatus::ProtocolDone => {
                if let Err(err) = self.stop_inclusion_internal().await {
                    warn!(error = %err, "could not stop the inclusion");
                }
                true
            }
            AddNodeStatus::Done => {
                self.stop_inclusion_signal.resolve(true);

                let pending = {
                    let mut state = self.state.write();
                    match std::mem::take(&mut state.pending) {
                        PendingNode::Inclusion(node) => Some(node),
                        other => {
                            state.pending = other;
                            None
                        }
                    }
                };

                if report.node_id.is_broadcast() {
                    if pending.is_some() {
                        warn!("inclusion finished with the broadcast id, dropping the pending node");
                    }
                    return true;
                }

                if let Some(node) = pending {
                    self.finalize_inclusion(node).await;
                }
                true
            }
            AddNodeStatus::NodeFound => false,
        }
    }

    /// Commit a newly included node: registry insertion, SUC return route,
    /// security bootstrap, and lifeline configuration.
    async fn finalize_inclusion(self: &Arc<Self>, node: Arc<Node>) {
        info!(node_id = %node.id(), "a new node was added to the network");
        self.insert_node(Arc::clone(&node));
        node.mark_as_alive();

        match self.assign_suc_return_route(node.id()).await {
            Ok(true) => {}
            Ok(false) => warn!(node_id = %node.id(), "assigning the SUC return route was refused"),
            Err(err) => {
                warn!(node_id = %node.id(), error = %err, "could not assign the SUC return route");
            }
        }

        if self.state.read().include_non_secure {
            node.set_secure(false);
        } else {
            self.secure_bootstrap_s0(&node, false).await;
        }

        if let Err(err) = self.bootstrap_lifeline_and_wake_up(&node).await {
            warn!(node_id = %node.id(), error = %err, "bootstrapping the new node failed");
        }

        self.state.write().include_controller = false;
        self.emit(ControllerEvent::NodeAdded { node });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Exclusion
    // ─────────────────────────────────────────────────────────────────────────

    /// Put the stick into exclusion mode.
    ///
    /// Resolves with `true` once the stick acknowledges readiness and `false`
    /// when an inclusion or exclusion is already active.
    ///
    /// # Errors
    ///
    /// Rejects with [`ZWaveError::ExclusionFailed`] when the stick reports a
    /// failure before becoming ready.
    pub async fn begin_exclusion(self: &Arc<Self>) -> ZWaveResult<bool> {
        {
            let mut state = self.state.write();
            if state.inclusion_active || state.exclusion_active {
                return Ok(false);
            }
            state.exclusion_active = true;
        }
        info!("starting exclusion");

        let rx = self.begin_exclusion_signal.create();
        let request = Request::RemoveNodeFromNetwork {
            mode: RemoveNodeMode::Any,
            high_power: true,
            network_wide: true,
        };
        let options = SendMessageOptions::default().with_priority(MessagePriority::Controller);
        if let Err(err) = self.transport().send_message(request, options).await {
            self.state.write().exclusion_active = false;
            self.begin_exclusion_signal.clear();
            return Err(err);
        }
        SignalSlot::wait(rx).await
    }

    /// Leave exclusion mode.
    ///
    /// Resolves once the stick confirms; returns `false` when no exclusion
    /// was active.
    pub async fn stop_exclusion(&self) -> ZWaveResult<bool> {
        if !self.state.read().exclusion_active {
            return Ok(false);
        }
        let rx = self.stop_exclusion_signal.create();
        self.stop_exclusion_internal().await?;
        SignalSlot::wait(rx).await
    }

    /// Stop the exclusion process without waiting for the confirmation.
    pub(crate) async fn stop_exclusion_internal(&self) -> ZWaveResult<()> {
        {
            let mut state = self.state.write();
            if !state.exclusion_active {
                return Ok(());
            }
            state.exclusion_active = false;
        }
        let request = Request::RemoveNodeFromNetwork {
            mode: RemoveNodeMode::Stop,
            high_power: true,
            network_wide: true,
        };
        let options = SendMessageOptions::default().with_priority(MessagePriority::Controller);
        self.transport().send_message(request, options).await?;
        info!("the exclusion process was stopped");
        self.emit(ControllerEvent::ExclusionStopped);
        Ok(())
    }

    pub(crate) async fn handle_remove_node_report(
        self: &Arc<Self>,
        report: RemoveNodeReport,
    ) -> bool {
        match report.status {
            RemoveNodeStatus::Ready => {
                debug!("the controller is now ready to remove nodes");
                self.emit(ControllerEvent::ExclusionStarted);
                self.begin_exclusion_signal.resolve(true);
                true
            }
            RemoveNodeStatus::Failed => {
                if self.begin_exclusion_signal.is_pending() {
                    self.begin_exclusion_signal.reject(ZWaveError::ExclusionFailed);
                    if let Err(err) = self.stop_exclusion_internal().await {
                        warn!(error = %err, "could not stop the failed exclusion");
                    }
                } else {
                    warn!("the exclusion process failed");
                    if let Err(err) = self.stop_exclusion_internal().await {
                        warn!(error = %err, "could not stop the failed exclusion");
                    }
                    self.emit(ControllerEvent::ExclusionFailed);
                }
                true
            }
            RemoveNodeStatus::RemovingSlave | RemoveNodeStatus::RemovingController => {
                debug!(node_id = %report.node_id, "a node is being excluded");
                if let Some(node) = self.get_node(report.node_id) {
                    self.state.write().pending = PendingNode::Exclusion(node);
                }
                true
            }
            RemoveNodeStatus::Done => {
                self.stop_exclusion_signal.resolve(true);

                let pending = {
                    let mut state = self.state.write();
                    match std::mem::take(&mut state.pending) {
                        PendingNode::Exclusion(node) => Some(node),
                        other => {
                            state.pending = other;
                            None
                        }
                    }
                };

                if let Some(node) = pending {
                    info!(node_id = %node.id(), "node was removed from the network");
                    self.emit(ControllerEvent::NodeRemoved {
                        node: Arc::clone(&node),
                        replaced: false,
                    });
                    self.remove_node_entry(node.id());
                }
                true
            }
            RemoveNodeStatus::NodeFound => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replace failed node
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace a failed node while keeping its node id.
    ///
    /// Resolves with `true` once the stick is ready for the replacement node
    /// and `false` when an inclusion or exclusion is already active.
    ///
    /// # Errors
    ///
    /// Fails when the node still answers a ping, when the stick refuses to
    /// start the replacement, or with [`ZWaveError::ReplaceNodeOk`] /
    /// [`ZWaveError::ReplaceFailed`] depending on the reported status.
    pub async fn replace_failed_node(self: &Arc<Self>, node_id: NodeId) -> ZWaveResult<bool> {
        {
            let state = self.state.read();
            if state.inclusion_active || state.exclusion_active {
                return Ok(false);
            }
        }
        let node = self.get_node_or_err(node_id)?;

        if node.ping().await {
            return Err(ZWaveError::ReplaceFailed {
                reason: format!("node {node_id} responded to a ping and is not failed"),
            });
        }

        info!(%node_id, "starting to replace the failed node");
        let rx = self.replace_failed_signal.create();
        // the status reports may arrive while the send is still in flight,
        // so the pending slot must be armed first
        self.state.write().pending = PendingNode::Replace(node);
        let options = SendMessageOptions::default().with_priority(MessagePriority::Controller);
        match self
            .transport()
            .send_message(Request::ReplaceFailedNode { node_id }, options)
            .await
        {
            Ok(Response::ReplaceFailedNode { start_flags: 0 }) => {}
            Ok(Response::ReplaceFailedNode { start_flags }) => {
                self.abort_replace();
                let mut reason = String::from("the replace process could not be started:");
                for line in decode_failed_node_start_flags(start_flags) {
                    reason.push_str("\n- ");
                    reason.push_str(line);
                }
                return Err(ZWaveError::ReplaceFailed { reason });
            }
            Ok(_) => {
                self.abort_replace();
                return Err(ZWaveError::UnexpectedResponse {
                    function: FunctionType::ReplaceFailedNode,
                });
            }
            Err(err) => {
                self.abort_replace();
                return Err(err);
            }
        }

        SignalSlot::wait(rx).await
    }

    fn abort_replace(&self) {
        let _ = self.take_pending_replace();
        self.replace_failed_signal.clear();
    }

    pub(crate) async fn handle_replace_failed_status(
        self: &Arc<Self>,
        status: ReplaceFailedNodeStatus,
    ) -> bool {
        match status {
            ReplaceFailedNodeStatus::NodeOk => {
                let node = self.take_pending_replace();
                let node_id = node.map_or_else(NodeId::default, |n| n.id());
                self.emit(ControllerEvent::InclusionFailed);
                self.replace_failed_signal
                    .reject(ZWaveError::ReplaceNodeOk { node_id });
                true
            }
            ReplaceFailedNodeStatus::FailedNodeReplaceFailed => {
                let _ = self.take_pending_replace();
                self.emit(ControllerEvent::InclusionFailed);
                self.replace_failed_signal.reject(ZWaveError::ReplaceFailed {
                    reason: "the controller could not replace the node".into(),
                });
                true
            }
            ReplaceFailedNodeStatus::FailedNodeReplace => {
                info!("the controller is ready to replace the failed node");
                let secure = {
                    let mut state = self.state.write();
                    state.inclusion_active = true;
                    !state.include_non_secure
                };
                self.emit(ControllerEvent::InclusionStarted { secure });
                self.replace_failed_signal.resolve(true);
                true
            }
            ReplaceFailedNodeStatus::FailedNodeReplaceDone => {
                self.state.write().inclusion_active = false;
                self.emit(ControllerEvent::InclusionStopped);

                let Some(old_node) = self.take_pending_replace() else {
                    warn!("replace completed but no node was pending");
                    return true;
                };
                let node_id = old_node.id();
                info!(%node_id, "the failed node was replaced");

                // resolve the registry handle before deleting so observers
                // still see the old node in the removal event
                let removed = self.get_node(node_id).unwrap_or(old_node);
                self.emit(ControllerEvent::NodeRemoved {
                    node: removed,
                    replaced: true,
                });
                self.remove_node_entry(node_id);

                // the replacement inherits the node id but nothing else
                let store = self.transport().value_store();
                let db = ValueDb::new(node_id, store, BTreeSet::new());
                let node = Arc::new(Node::new(node_id, Arc::clone(self.transport()), db));
                self.insert_node(Arc::clone(&node));
                node.mark_as_alive();

                match self.assign_suc_return_route(node_id).await {
                    Ok(true) => {}
                    Ok(false) => warn!(%node_id, "assigning the SUC return route was refused"),
                    Err(err) => {
                        warn!(%node_id, error = %err, "could not assign the SUC return route");
                    }
                }

                // replaced nodes never send a NIF, so assume security
                self.secure_bootstrap_s0(&node, true).await;

                if let Err(err) = self.bootstrap_lifeline_and_wake_up(&node).await {
                    warn!(%node_id, error = %err, "bootstrapping the replacement node failed");
                }

                self.emit(ControllerEvent::NodeAdded { node });
                true
            }
        }
    }

    fn take_pending_replace(&self) -> Option<Arc<Node>> {
        let mut state = self.state.write();
        match std::mem::take(&mut state.pending) {
            PendingNode::Replace(node) => Some(node),
            other => {
                state.pending = other;
                None
            }
        }
    }
}
