//! The value store: per-node key/value and metadata databases.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{CommandClass, NodeId};

/// Key of a single value in a node's value database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId {
    #[serde(rename = "commandClass")]
    pub command_class: CommandClass,
    pub endpoint: u8,
    pub property: String,
}

impl ValueId {
    /// Create a value id.
    #[must_use]
    pub fn new(command_class: CommandClass, endpoint: u8, property: impl Into<String>) -> Self {
        Self {
            command_class,
            endpoint,
            property: property.into(),
        }
    }
}

/// Metadata attached to a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub writeable: bool,
}

type ValueKey = (NodeId, ValueId);

/// Process-wide value and metadata database, shared by all nodes.
///
/// Each node works against a [`ValueDb`] view carrying a precomputed index of
/// that node's keys, so enumeration does not scan the whole store.
#[derive(Debug, Default)]
pub struct ValueStore {
    values: RwLock<HashMap<ValueKey, serde_json::Value>>,
    metadata: RwLock<HashMap<ValueKey, ValueMetadata>>,
}

impl ValueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value.
    pub fn set_value(&self, node_id: NodeId, id: ValueId, value: serde_json::Value) {
        self.values.write().insert((node_id, id), value);
    }

    /// Read a value.
    #[must_use]
    pub fn get_value(&self, node_id: NodeId, id: &ValueId) -> Option<serde_json::Value> {
        self.values.read().get(&(node_id, id.clone())).cloned()
    }

    /// Remove a value, returning whether it existed.
    pub fn remove_value(&self, node_id: NodeId, id: &ValueId) -> bool {
        self.values.write().remove(&(node_id, id.clone())).is_some()
    }

    /// Store metadata for a value.
    pub fn set_metadata(&self, node_id: NodeId, id: ValueId, metadata: ValueMetadata) {
        self.metadata.write().insert((node_id, id), metadata);
    }

    /// Read metadata for a value.
    #[must_use]
    pub fn get_metadata(&self, node_id: NodeId, id: &ValueId) -> Option<ValueMetadata> {
        self.metadata.read().get(&(node_id, id.clone())).cloned()
    }

    /// Drop every value and metadata row belonging to a node.
    pub fn remove_node(&self, node_id: NodeId) {
        self.values.write().retain(|(node, _), _| *node != node_id);
        self.metadata.write().retain(|(node, _), _| *node != node_id);
    }

    /// Batch-compute the per-node key index over both databases.
    #[must_use]
    pub fn index_by_node(&self) -> HashMap<NodeId, BTreeSet<ValueId>> {
        let mut index: HashMap<NodeId, BTreeSet<ValueId>> = HashMap::new();
        for (node_id, value_id) in self.values.read().keys() {
            index.entry(*node_id).or_default().insert(value_id.clone());
        }
        for (node_id, value_id) in self.metadata.read().keys() {
            index.entry(*node_id).or_default().insert(value_id.clone());
        }
        index
    }
}

/// Per-node view over the shared [`ValueStore`].
#[derive(Debug, Clone)]
pub struct ValueDb {
    node_id: NodeId,
    store: Arc<ValueStore>,
    index: Arc<RwLock<BTreeSet<ValueId>>>,
}

impl ValueDb {
    /// Create a view for a node with a precomputed key index.
    #[must_use]
    pub fn new(node_id: NodeId, store: Arc<ValueStore>, index: BTreeSet<ValueId>) -> Self {
        Self {
            node_id,
            store,
            index: Arc::new(RwLock::new(index)),
        }
    }

    /// The node this view belongs to.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Store a value.
    pub fn set_value(&self, id: ValueId, value: serde_json::Value) {
        self.index.write().insert(id.clone());
        self.store.set_value(self.node_id, id, value);
    }

    /// Read a value.
    #[must_use]
    pub fn get_value(&self, id: &ValueId) -> Option<serde_json::Value> {
        self.store.get_value(self.node_id, id)
    }

    /// Remove a value.
    pub fn remove_value(&self, id: &ValueId) -> bool {
        self.index.write().remove(id);
        self.store.remove_value(self.node_id, id)
    }

    /// Store metadata.
    pub fn set_metadata(&self, id: ValueId, metadata: ValueMetadata) {
        self.index.write().insert(id.clone());
        self.store.set_metadata(self.node_id, id, metadata);
    }

    /// Read metadata.
    #[must_use]
    pub fn get_metadata(&self, id: &ValueId) -> Option<ValueMetadata> {
        self.store.get_metadata(self.node_id, id)
    }

    /// All known keys of this node, in order.
    #[must_use]
    pub fn value_ids(&self) -> Vec<ValueId> {
        self.index.read().iter().cloned().collect()
    }
}
