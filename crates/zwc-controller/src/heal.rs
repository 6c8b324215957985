//! The routing and heal engine.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use zwc_core::{NeighborUpdateStatus, NodeId, Request, Response, ZWaveResult};

use crate::{
    Controller, ControllerEvent, HealNodeStatus, InterviewStage, Node, NodeStatus,
    SendMessageOptions, TransactionPredicate,
};

/// How often each heal phase is retried before the heal fails.
const MAX_HEAL_ATTEMPTS: u32 = 5;

/// Upper bound on the return routes assigned during a heal.
pub const MAX_RETURN_ROUTES: usize = 4;

impl Controller {
    /// Heal the whole network.
    ///
    /// Populates the heal progress map for every non-self node, skips nodes
    /// that are dead or asleep without a finished protocol interview, and
    /// runs the remaining per-node heals concurrently. Progress is published
    /// after each node finishes; a final `heal network done` event follows
    /// unless the heal was stopped.
    ///
    /// Returns `false` when a heal is already active or the interview has not
    /// completed.
    pub fn begin_healing_network(self: &Arc<Self>) -> bool {
        let Ok(own_node_id) = self.own_node_id() else {
            return false;
        };
        let nodes: Vec<Arc<Node>> = self
            .nodes()
            .into_iter()
            .filter(|node| node.id() != own_node_id)
            .collect();

        let mut pending = Vec::new();
        {
            let mut state = self.state.write();
            if state.heal_active {
                return false;
            }
            state.heal_active = true;
            state.heal_progress.clear();

            for node in nodes {
                let asleep_and_uninterviewed = node.status() == NodeStatus::Asleep
                    && node.interview_stage() <= InterviewStage::ProtocolInfo;
                let skip = node.status() == NodeStatus::Dead || asleep_and_uninterviewed;
                state.heal_progress.insert(
                    node.id(),
                    if skip {
                        HealNodeStatus::Skipped
                    } else {
                        HealNodeStatus::Pending
                    },
                );
                if !skip {
                    pending.push(node);
                }
            }
        }
        info!(nodes = pending.len(), "healing the network");

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let heals = pending.into_iter().map(|node| {
                let controller = Arc::clone(&controller);
                async move {
                    let healed = controller.heal_node_internal(&node).await;
                    let snapshot = {
                        let mut state = controller.state.write();
                        if !state.heal_active {
                            return;
                        }
                        state.heal_progress.insert(
                            node.id(),
                            if healed {
                                HealNodeStatus::Done
                            } else {
                                HealNodeStatus::Failed
                            },
                        );
                        state.heal_progress.clone()
                    };
                    controller.emit(ControllerEvent::HealNetworkProgress { progress: snapshot });
                }
            });
            join_all(heals).await;

            let snapshot = {
                let mut state = controller.state.write();
                if !state.heal_active {
                    return;
                }
                state.heal_active = false;
                state.heal_progress.clone()
            };
            info!("network heal finished");
            controller.emit(ControllerEvent::HealNetworkDone { result: snapshot });
        });
        true
    }

    /// Stop an active network heal.
    ///
    /// Clears the activity flag so pending per-node heals short-circuit, and
    /// rejects the in-flight routing requests at the transport.
    pub fn stop_healing_network(&self) -> bool {
        {
            let mut state = self.state.write();
            if !state.heal_active {
                return false;
            }
            state.heal_active = false;
        }
        info!("stopping the network heal");
        let predicate: TransactionPredicate = Arc::new(Request::is_routing_request);
        self.transport().reject_transactions(predicate);
        true
    }

    /// Heal a single node.
    ///
    /// # Errors
    ///
    /// Returns [`zwc_core::ZWaveError::NodeNotFound`] for unknown nodes.
    pub async fn heal_node(self: &Arc<Self>, node_id: NodeId) -> ZWaveResult<bool> {
        let node = self.get_node_or_err(node_id)?;
        {
            let mut state = self.state.write();
            if state.heal_active {
                return Ok(false);
            }
            state.heal_active = true;
        }
        let healed = self.heal_node_internal(&node).await;
        self.state.write().heal_active = false;
        Ok(healed)
    }

    /// The four-phase heal pipeline for one node. Each phase is retried up to
    /// [`MAX_HEAL_ATTEMPTS`] times; a cleared heal flag aborts between
    /// attempts.
    pub(crate) async fn heal_node_internal(&self, node: &Arc<Node>) -> bool {
        let node_id = node.id();
        debug!(%node_id, "healing node");

        // 1: let the node rediscover its neighbors
        let mut refreshed = false;
        for attempt in 1..=MAX_HEAL_ATTEMPTS {
            if !self.is_heal_active() {
                return false;
            }
            let request = Request::RequestNodeNeighborUpdate { node_id };
            match self
                .transport()
                .send_message(request, SendMessageOptions::default())
                .await
            {
                Ok(Response::NeighborUpdate(NeighborUpdateStatus::Done)) => {
                    refreshed = true;
                    break;
                }
                Ok(_) => {
                    warn!(%node_id, attempt, "the neighbor update did not complete");
                }
                Err(err) => {
                    warn!(%node_id, attempt, error = %err, "the neighbor update failed");
                }
            }
        }
        if !refreshed {
            warn!(%node_id, "healing failed: the neighbor list could not be refreshed");
            return false;
        }

        // 2: read the updated neighbor list back
        let mut retrieved = false;
        for attempt in 1..=MAX_HEAL_ATTEMPTS {
            if !self.is_heal_active() {
                return false;
            }
            match node.query_neighbors_internal().await {
                Ok(neighbors) => {
                    debug!(%node_id, ?neighbors, "retrieved the updated neighbor list");
                    retrieved = true;
                    break;
                }
                Err(err) => {
                    warn!(%node_id, attempt, error = %err, "could not retrieve the neighbor list");
                }
            }
        }
        if !retrieved {
            warn!(%node_id, "healing failed: the neighbor list could not be retrieved");
            return false;
        }

        // 3: drop the stale return routes
        let mut deleted = false;
        for attempt in 1..=MAX_HEAL_ATTEMPTS {
            if !self.is_heal_active() {
                return false;
            }
            let request = Request::DeleteReturnRoute { node_id };
            match self
                .transport()
                .send_message(request, SendMessageOptions::default())
                .await
            {
                Ok(Response::ReturnRoute { success: true }) => {
                    deleted = true;
                    break;
                }
                Ok(_) => warn!(%node_id, attempt, "deleting the return routes was refused"),
                Err(err) => {
                    warn!(%node_id, attempt, error = %err, "deleting the return routes failed");
                }
            }
        }
        if !deleted {
            warn!(%node_id, "healing failed: the return routes could not be deleted");
            return false;
        }

        // 4: assign fresh routes to every association target
        for destination in self.return_route_destinations(node_id) {
            let mut assigned = false;
            for attempt in 1..=MAX_HEAL_ATTEMPTS {
                if !self.is_heal_active() {
                    return false;
                }
                let request = Request::AssignReturnRoute {
                    node_id,
                    destination,
                };
                match self
                    .transport()
                    .send_message(request, SendMessageOptions::default())
                    .await
                {
                    Ok(Response::ReturnRoute { success: true }) => {
                        assigned = true;
                        break;
                    }
                    Ok(_) => {
                        warn!(%node_id, %destination, attempt, "assigning the return route was refused");
                    }
                    Err(err) => {
                        warn!(%node_id, %destination, attempt, error = %err, "assigning the return route failed");
                    }
                }
            }
            if !assigned {
                warn!(%node_id, %destination, "healing failed: the return route could not be assigned");
                return false;
            }
        }

        debug!(%node_id, "healing succeeded");
        true
    }

    /// The deduplicated, sorted association targets of a node, with the own
    /// node id guaranteed present and first, capped at
    /// [`MAX_RETURN_ROUTES`] entries.
    pub(crate) fn return_route_destinations(&self, node_id: NodeId) -> Vec<NodeId> {
        let Ok(own_node_id) = self.own_node_id() else {
            return Vec::new();
        };
        let mut targets: BTreeSet<NodeId> = self
            .get_associations(node_id)
            .map(|groups| {
                groups
                    .values()
                    .flatten()
                    .map(|association| association.node_id)
                    .collect()
            })
            .unwrap_or_default();
        targets.remove(&own_node_id);

        let mut destinations = vec![own_node_id];
        destinations.extend(targets);
        destinations.truncate(MAX_RETURN_ROUTES);
        destinations
    }
}
