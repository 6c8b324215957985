//! The typed event bus.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use zwc_core::NodeId;

use crate::Node;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Per-node outcome within a network heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealNodeStatus {
    Pending,
    Done,
    Failed,
    Skipped,
}

/// Events published by the controller core.
///
/// Emissions are synchronous and observed in emission order by every
/// subscriber.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    InclusionStarted { secure: bool },
    InclusionStopped,
    InclusionFailed,
    ExclusionStarted,
    ExclusionStopped,
    ExclusionFailed,
    NodeAdded { node: Arc<Node> },
    NodeRemoved { node: Arc<Node>, replaced: bool },
    HealNetworkProgress { progress: BTreeMap<NodeId, HealNodeStatus> },
    HealNetworkDone { result: BTreeMap<NodeId, HealNodeStatus> },
}

/// Broadcast bus carrying [`ControllerEvent`]s to external listeners.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ControllerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { tx }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Events without subscribers are dropped.
    pub fn emit(&self, event: ControllerEvent) {
        let _ = self.tx.send(event);
    }
}
