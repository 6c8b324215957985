//! Typed command-class facades on [`Node`].
//!
//! Each facade issues `SendData` with a typed payload and keeps the node's
//! value database in sync with the reports it receives. Cached reads never
//! touch the radio.

use std::time::Duration;

use zwc_core::{
    Association, AssociationGroupProfile, CcCommand, CcReply, CommandClass, FunctionType, NodeId,
    ValueId, ZWaveError, ZWaveResult,
};

use crate::{Node, SendMessageOptions};

fn group_property(name: &str, group: u8) -> String {
    format!("{name}.{group}")
}

fn unexpected_reply() -> ZWaveError {
    ZWaveError::UnexpectedResponse {
        function: FunctionType::SendData,
    }
}

impl Node {
    /// Association CC operations.
    #[must_use]
    pub const fn association_cc(&self) -> AssociationCc<'_> {
        AssociationCc { node: self }
    }

    /// Multi Channel Association CC operations.
    #[must_use]
    pub const fn multi_channel_association_cc(&self) -> MultiChannelAssociationCc<'_> {
        MultiChannelAssociationCc { node: self }
    }

    /// Association Group Information CC cached reads.
    #[must_use]
    pub const fn agi_cc(&self) -> AgiCc<'_> {
        AgiCc { node: self }
    }

    /// Security (S0) CC operations.
    #[must_use]
    pub const fn security_cc(&self) -> SecurityCc<'_> {
        SecurityCc { node: self }
    }

    /// Wake Up CC operations.
    #[must_use]
    pub const fn wake_up_cc(&self) -> WakeUpCc<'_> {
        WakeUpCc { node: self }
    }

    /// Version CC operations.
    #[must_use]
    pub const fn version_cc(&self) -> VersionCc<'_> {
        VersionCc { node: self }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Association CC
// ─────────────────────────────────────────────────────────────────────────────

/// Plain association operations.
pub struct AssociationCc<'a> {
    node: &'a Node,
}

impl AssociationCc<'_> {
    const CC: CommandClass = CommandClass::Association;

    /// The cached number of association groups (0 while unknown).
    #[must_use]
    pub fn group_count(&self) -> u8 {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, "groupCount"))
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(0)
    }

    /// The cached capacity of a group (0 while unknown).
    #[must_use]
    pub fn cached_max_nodes(&self, group: u8) -> u8 {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, group_property("maxNodes", group)))
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(0)
    }

    /// The cached destinations of a group.
    #[must_use]
    pub fn cached_node_ids(&self, group: u8) -> Vec<NodeId> {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, group_property("nodeIds", group)))
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Query a group from the node and update the cache.
    pub async fn refresh(&self, group: u8) -> ZWaveResult<()> {
        let reply = self
            .node
            .send_cc(CcCommand::AssociationGet { group }, SendMessageOptions::default())
            .await?;
        let CcReply::AssociationReport {
            group: reported,
            max_nodes,
            node_ids,
        } = reply
        else {
            return Err(unexpected_reply());
        };
        let db = self.node.value_db();
        db.set_value(
            ValueId::new(Self::CC, 0, group_property("maxNodes", reported)),
            serde_json::json!(max_nodes),
        );
        db.set_value(
            ValueId::new(Self::CC, 0, group_property("nodeIds", reported)),
            serde_json::to_value(&node_ids).unwrap_or_default(),
        );
        Ok(())
    }

    /// Add destinations to a group.
    pub async fn add_node_ids(&self, group: u8, node_ids: &[NodeId]) -> ZWaveResult<()> {
        self.node
            .send_cc(
                CcCommand::AssociationSet {
                    group,
                    node_ids: node_ids.to_vec(),
                },
                SendMessageOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Remove destinations from a group.
    pub async fn remove_node_ids(&self, group: u8, node_ids: &[NodeId]) -> ZWaveResult<()> {
        self.node
            .send_cc(
                CcCommand::AssociationRemove {
                    group,
                    node_ids: node_ids.to_vec(),
                },
                SendMessageOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Remove destinations from every group at once.
    pub async fn remove_node_ids_from_all_groups(&self, node_ids: &[NodeId]) -> ZWaveResult<()> {
        self.node
            .send_cc(
                CcCommand::AssociationRemoveFromAllGroups {
                    node_ids: node_ids.to_vec(),
                },
                SendMessageOptions::default(),
            )
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Multi Channel Association CC
// ─────────────────────────────────────────────────────────────────────────────

/// Multi-channel association operations.
pub struct MultiChannelAssociationCc<'a> {
    node: &'a Node,
}

impl MultiChannelAssociationCc<'_> {
    const CC: CommandClass = CommandClass::MultiChannelAssociation;

    /// The cached number of multi-channel groups (0 while unknown).
    #[must_use]
    pub fn group_count(&self) -> u8 {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, "groupCount"))
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(0)
    }

    /// The cached capacity of a group (0 while unknown).
    #[must_use]
    pub fn cached_max_nodes(&self, group: u8) -> u8 {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, group_property("maxNodes", group)))
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(0)
    }

    /// The cached destinations of a group, plain and endpoint-carrying.
    #[must_use]
    pub fn cached_destinations(&self, group: u8) -> Vec<Association> {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, group_property("destinations", group)))
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Query a group from the node and update the cache.
    pub async fn refresh(&self, group: u8) -> ZWaveResult<()> {
        let reply = self
            .node
            .send_cc(
                CcCommand::MultiChannelAssociationGet { group },
                SendMessageOptions::default(),
            )
            .await?;
        let CcReply::MultiChannelAssociationReport {
            group: reported,
            max_nodes,
            destinations,
        } = reply
        else {
            return Err(unexpected_reply());
        };
        let db = self.node.value_db();
        db.set_value(
            ValueId::new(Self::CC, 0, group_property("maxNodes", reported)),
            serde_json::json!(max_nodes),
        );
        db.set_value(
            ValueId::new(Self::CC, 0, group_property("destinations", reported)),
            serde_json::to_value(&destinations).unwrap_or_default(),
        );
        Ok(())
    }

    /// Add plain and endpoint destinations to a group.
    pub async fn add(
        &self,
        group: u8,
        node_ids: &[NodeId],
        destinations: &[Association],
    ) -> ZWaveResult<()> {
        self.node
            .send_cc(
                CcCommand::MultiChannelAssociationSet {
                    group,
                    node_ids: node_ids.to_vec(),
                    destinations: destinations.to_vec(),
                },
                SendMessageOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Remove destinations from a group; `group == None` removes them from
    /// every group.
    pub async fn remove(
        &self,
        group: Option<u8>,
        node_ids: &[NodeId],
        destinations: &[Association],
    ) -> ZWaveResult<()> {
        self.node
            .send_cc(
                CcCommand::MultiChannelAssociationRemove {
                    group,
                    node_ids: node_ids.to_vec(),
                    destinations: destinations.to_vec(),
                },
                SendMessageOptions::default(),
            )
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Association Group Information CC
// ─────────────────────────────────────────────────────────────────────────────

/// Cached reads of the Association Group Information CC.
///
/// The AGI data is populated by the node interview; the controller core only
/// consumes the cache.
pub struct AgiCc<'a> {
    node: &'a Node,
}

impl AgiCc<'_> {
    const CC: CommandClass = CommandClass::AssociationGroupInfo;

    /// The advertised name of a group.
    #[must_use]
    pub fn cached_group_name(&self, group: u8) -> Option<String> {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, group_property("name", group)))
            .and_then(|v| v.as_str().map(ToOwned::to_owned))
    }

    /// The advertised profile of a group.
    #[must_use]
    pub fn cached_profile(&self, group: u8) -> Option<AssociationGroupProfile> {
        self.node
            .value_db()
            .get_value(&ValueId::new(Self::CC, 0, group_property("profile", group)))
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok())
            .map(AssociationGroupProfile::from_id)
    }

    /// The command classes a group issues, if advertised.
    #[must_use]
    pub fn cached_issued_commands(&self, group: u8) -> Option<Vec<CommandClass>> {
        self.node
            .value_db()
            .get_value(&ValueId::new(
                Self::CC,
                0,
                group_property("issuedCommands", group),
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
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Security (S0) CC
// ─────────────────────────────────────────────────────────────────────────────

/// S0 key-exchange operations.
pub struct SecurityCc<'a> {
    node: &'a Node,
}

impl SecurityCc<'_> {
    /// Query the supported security scheme.
    pub async fn get_scheme(&self, expire: Duration) -> ZWaveResult<u8> {
        let reply = self
            .node
            .send_cc(
                CcCommand::SecuritySchemeGet,
                SendMessageOptions::default().with_expire(expire),
            )
            .await?;
        match reply {
            CcReply::SecurityScheme { scheme } => Ok(scheme),
            _ => Err(unexpected_reply()),
        }
    }

    /// Request a nonce from the node, optionally keeping it for later
    /// encapsulation.
    pub async fn get_nonce(&self, store_as_free: bool, expire: Duration) -> ZWaveResult<[u8; 8]> {
        let reply = self
            .node
            .send_cc(
                CcCommand::SecurityNonceGet { store_as_free },
                SendMessageOptions::default().with_expire(expire),
            )
            .await?;
        let CcReply::SecurityNonce { nonce } = reply else {
            return Err(unexpected_reply());
        };
        if store_as_free {
            if let Some(manager) = self.node.transport().security_manager() {
                manager.store_free_nonce(self.node.id(), nonce);
            }
        }
        Ok(nonce)
    }

    /// Push the network key to the node.
    pub async fn set_network_key(&self, key: [u8; 16], expire: Duration) -> ZWaveResult<()> {
        // the key-set frame is encapsulated with a previously stored nonce
        if let Some(manager) = self.node.transport().security_manager() {
            let _nonce = manager.take_free_nonce(self.node.id());
        }
        self.node
            .send_cc(
                CcCommand::SecurityNetworkKeySet { key },
                SendMessageOptions::default().with_expire(expire),
            )
            .await?;
        Ok(())
    }

    /// Let an included controller inherit the security scheme.
    pub async fn inherit_scheme(&self, expire: Duration) -> ZWaveResult<()> {
        self.node
            .send_cc(
                CcCommand::SecurityInheritScheme,
                SendMessageOptions::default().with_expire(expire),
            )
            .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wake Up CC
// ─────────────────────────────────────────────────────────────────────────────

/// Wake Up CC operations.
pub struct WakeUpCc<'a> {
    node: &'a Node,
}

impl WakeUpCc<'_> {
    const CC: CommandClass = CommandClass::WakeUp;
    const DEFAULT_INTERVAL_SECS: u32 = 3600;

    /// Interview the Wake Up CC: read the current interval and point the
    /// wake-up destination at the controller.
    pub async fn interview(&self, own_node_id: NodeId) -> ZWaveResult<()> {
        let interval = match self
            .node
            .send_cc(CcCommand::WakeUpIntervalGet, SendMessageOptions::default())
            .await?
        {
            CcReply::WakeUpInterval { interval_secs, .. } => interval_secs,
            _ => Self::DEFAULT_INTERVAL_SECS,
        };

        self.node
            .send_cc(
                CcCommand::WakeUpIntervalSet {
                    interval_secs: interval,
                    destination: own_node_id,
                },
                SendMessageOptions::default(),
            )
            .await?;

        let db = self.node.value_db();
        db.set_value(
            ValueId::new(Self::CC, 0, "wakeUpInterval"),
            serde_json::json!(interval),
        );
        db.set_value(
            ValueId::new(Self::CC, 0, "controllerNodeId"),
            serde_json::json!(own_node_id.as_u8()),
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Version CC
// ─────────────────────────────────────────────────────────────────────────────

/// Version CC operations.
pub struct VersionCc<'a> {
    node: &'a Node,
}

impl VersionCc<'_> {
    /// Query the implemented version of a command class.
    pub async fn cc_version(&self, cc: CommandClass) -> ZWaveResult<u8> {
        let reply = self
            .node
            .send_cc(CcCommand::VersionCcGet { cc }, SendMessageOptions::default())
            .await?;
        match reply {
            CcReply::VersionCc { version, .. } => Ok(version),
            _ => Err(unexpected_reply()),
        }
    }
}
