//! The association manager: group read models, admissibility, and mutation.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::debug;

use zwc_core::{Association, AssociationGroup, CommandClass, NodeId, ZWaveError, ZWaveResult};

use crate::{Controller, Node};

impl Controller {
    /// The association groups of a node as a read model, merged from the AGI
    /// cache and the device configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`ZWaveError::CcNotSupported`] when the node lacks the
    /// Association command class.
    pub fn get_association_groups(
        &self,
        node_id: NodeId,
    ) -> ZWaveResult<BTreeMap<u8, AssociationGroup>> {
        let node = self.get_node_or_err(node_id)?;
        if !node.supports_cc(CommandClass::Association) {
            return Err(ZWaveError::CcNotSupported {
                cc: CommandClass::Association,
                node_id,
            });
        }

        let association = node.association_cc();
        let multi_channel_count = if node.supports_cc(CommandClass::MultiChannelAssociation) {
            node.multi_channel_association_cc().group_count()
        } else {
            0
        };
        let group_count = association.group_count().max(multi_channel_count);
        let config = node.device_config();
        let has_agi = node.supports_cc(CommandClass::AssociationGroupInfo);
        let agi = node.agi_cc();

        let mut groups = BTreeMap::new();
        for group in 1..=group_count {
            let group_config = config
                .as_ref()
                .and_then(|config| config.associations.get(&group));

            let cached_max = if group <= multi_channel_count {
                node.multi_channel_association_cc().cached_max_nodes(group)
            } else {
                association.cached_max_nodes(group)
            };
            let max_nodes = if cached_max > 0 {
                cached_max
            } else {
                group_config.map_or(1, |config| config.max_nodes)
            };

            let is_lifeline = if has_agi {
                group == 1
            } else {
                group_config.map_or(group == 1, |config| config.is_lifeline)
            };

            let label = group_config
                .map(|config| config.label.clone())
                .or_else(|| {
                    if has_agi {
                        agi.cached_group_name(group)
                    } else {
                        None
                    }
                })
                .unwrap_or_else(|| format!("Unnamed group {group}"));

            let no_endpoint = group_config.is_some_and(|config| config.no_endpoint);

            groups.insert(
                group,
                AssociationGroup {
                    max_nodes,
                    is_lifeline,
                    multi_channel: group <= multi_channel_count && !no_endpoint,
                    label,
                    profile: if has_agi { agi.cached_profile(group) } else { None },
                    issued_commands: if has_agi {
                        agi.cached_issued_commands(group)
                            .map(|commands| commands.into_iter().collect())
                    } else {
                        None
                    },
                },
            );
        }
        Ok(groups)
    }

    /// The cached associations of a node, merged across the plain and
    /// multi-channel command classes.
    ///
    /// A multi-channel destination only deduplicates against a plain one when
    /// both the node id and the endpoint match exactly.
    ///
    /// # Errors
    ///
    /// Fails with [`ZWaveError::CcNotSupported`] when the node lacks the
    /// Association command class.
    pub fn get_associations(&self, node_id: NodeId) -> ZWaveResult<BTreeMap<u8, Vec<Association>>> {
        let node = self.get_node_or_err(node_id)?;
        if !node.supports_cc(CommandClass::Association) {
            return Err(ZWaveError::CcNotSupported {
                cc: CommandClass::Association,
                node_id,
            });
        }

        let mut result: BTreeMap<u8, Vec<Association>> = BTreeMap::new();

        let association = node.association_cc();
        for group in 1..=association.group_count() {
            result.insert(
                group,
                association
                    .cached_node_ids(group)
                    .into_iter()
                    .map(Association::plain)
                    .collect(),
            );
        }

        if node.supports_cc(CommandClass::MultiChannelAssociation) {
            let multi_channel = node.multi_channel_association_cc();
            for group in 1..=multi_channel.group_count() {
                let entry = result.entry(group).or_default();
                for destination in multi_channel.cached_destinations(group) {
                    if !entry.contains(&destination) {
                        entry.push(destination);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Whether an association may be added to a group.
    ///
    /// # Errors
    ///
    /// Fails with [`ZWaveError::CcNotSupported`] when the node supports
    /// neither association command class, and with
    /// [`ZWaveError::EndpointNotFound`] when the target endpoint does not
    /// exist.
    pub fn is_association_allowed(
        &self,
        node_id: NodeId,
        group: u8,
        target: &Association,
    ) -> ZWaveResult<bool> {
        let node = self.get_node_or_err(node_id)?;
        if !node.supports_cc(CommandClass::Association)
            && !node.supports_cc(CommandClass::MultiChannelAssociation)
        {
            return Err(ZWaveError::CcNotSupported {
                cc: CommandClass::Association,
                node_id,
            });
        }

        let own_node_id = self.own_node_id()?;
        let target_node = self.get_node_or_err(target.node_id)?;
        let target_is_controller = target.node_id == own_node_id;

        // the controller itself is always addressable; everything else must
        // expose the requested endpoint
        if !target_is_controller {
            let endpoint = target.endpoint.unwrap_or(0);
            if !target_node.has_endpoint(endpoint) {
                return Err(ZWaveError::EndpointNotFound {
                    node_id: target.node_id,
                    endpoint,
                });
            }
        }

        // lifeline reports to the controller are always allowed
        if target_is_controller {
            let groups = self.get_association_groups(node_id)?;
            if groups.get(&group).is_some_and(|info| info.is_lifeline) {
                return Ok(true);
            }
        }

        // without AGI there is nothing to enforce
        if !node.supports_cc(CommandClass::AssociationGroupInfo) {
            return Ok(true);
        }
        let Some(issued) = node.agi_cc().cached_issued_commands(group) else {
            return Ok(true);
        };
        if issued.is_empty() {
            return Ok(true);
        }

        let target_ccs = match target.endpoint {
            None | Some(0) => target_node.supported_ccs(),
            Some(endpoint) => target_node.endpoint_supported_ccs(endpoint),
        };

        if issued.contains(&CommandClass::Basic)
            && target_ccs.iter().any(|cc| cc.is_actuator())
        {
            return Ok(true);
        }
        Ok(issued.iter().any(|cc| target_ccs.contains(cc)))
    }

    /// Add associations to a group, after checking each for admissibility.
    ///
    /// # Errors
    ///
    /// Fails with [`ZWaveError::AssociationNotAllowed`] naming every
    /// disallowed association, with [`ZWaveError::CcNotSupported`] when
    /// endpoint associations are given to a node without the Multi Channel
    /// Association CC, and with [`ZWaveError::InvalidAssociationGroup`] when
    /// the group does not exist.
    pub async fn add_associations(
        &self,
        node_id: NodeId,
        group: u8,
        associations: &[Association],
    ) -> ZWaveResult<()> {
        let node = self.get_node_or_err(node_id)?;

        // endpoint-carrying destinations are refused before the group bound
        // is even looked at
        let (plain_ids, endpoint_destinations) = split_destinations(associations);
        if !endpoint_destinations.is_empty()
            && !node.supports_cc(CommandClass::MultiChannelAssociation)
        {
            return Err(ZWaveError::CcNotSupported {
                cc: CommandClass::MultiChannelAssociation,
                node_id,
            });
        }

        let layout = group_layout(&node, group)?;

        let mut disallowed = Vec::new();
        for association in associations {
            if !self.is_association_allowed(node_id, group, association)? {
                disallowed.push(association.to_string());
            }
        }
        if !disallowed.is_empty() {
            return Err(ZWaveError::AssociationNotAllowed {
                details: disallowed.join(", "),
            });
        }

        if layout.multi_channel {
            let multi_channel = node.multi_channel_association_cc();
            multi_channel
                .add(group, &plain_ids, &endpoint_destinations)
                .await?;
            multi_channel.refresh(group).await?;
        } else {
            if !endpoint_destinations.is_empty() {
                return Err(ZWaveError::CcNotSupported {
                    cc: CommandClass::MultiChannelAssociation,
                    node_id,
                });
            }
            let association = node.association_cc();
            association.add_node_ids(group, &plain_ids).await?;
            association.refresh(group).await?;
        }
        Ok(())
    }

    /// Remove associations from a group.
    ///
    /// The multi-channel command class is preferred; the plain command class
    /// acts as a fallback whenever the group also exists there, so that plain
    /// duplicates disappear as well. A group existing only in the
    /// multi-channel range never raises an invalid-group error through the
    /// fallback.
    ///
    /// # Errors
    ///
    /// Fails with [`ZWaveError::InvalidAssociationGroup`] for nonexistent
    /// groups and with [`ZWaveError::AssociationNotAllowed`] when the
    /// controller's own associations are targeted.
    pub async fn remove_associations(
        &self,
        node_id: NodeId,
        group: u8,
        associations: &[Association],
    ) -> ZWaveResult<()> {
        let node = self.get_node_or_err(node_id)?;

        let (plain_ids, endpoint_destinations) = split_destinations(associations);
        if !endpoint_destinations.is_empty()
            && !node.supports_cc(CommandClass::MultiChannelAssociation)
        {
            return Err(ZWaveError::CcNotSupported {
                cc: CommandClass::MultiChannelAssociation,
                node_id,
            });
        }

        let layout = group_layout(&node, group)?;

        let own_node_id = self.own_node_id()?;
        if associations
            .iter()
            .any(|association| association.node_id == own_node_id)
        {
            return Err(ZWaveError::AssociationNotAllowed {
                details: "the controller's own associations cannot be removed".into(),
            });
        }

        let mut group_known = false;

        if layout.multi_channel {
            let multi_channel = node.multi_channel_association_cc();
            multi_channel
                .remove(Some(group), &plain_ids, &endpoint_destinations)
                .await?;
            multi_channel.refresh(group).await?;
            group_known = true;
        }

        if layout.supports_plain && group <= layout.plain_count {
            if !plain_ids.is_empty() {
                let association = node.association_cc();
                association.remove_node_ids(group, &plain_ids).await?;
                association.refresh(group).await?;
            }
            group_known = true;
        }

        if group_known {
            Ok(())
        } else {
            Err(ZWaveError::InvalidAssociationGroup { group })
        }
    }

    /// Remove a departed node from the association tables of every other
    /// node. Nodes without an association command class are skipped.
    ///
    /// # Errors
    ///
    /// Propagates the first transport error of the concurrent removals.
    pub async fn remove_node_from_all_associations(&self, removed: NodeId) -> ZWaveResult<()> {
        let own_node_id = self.own_node_id()?;
        let nodes: Vec<Arc<Node>> = self
            .nodes()
            .into_iter()
            .filter(|node| node.id() != own_node_id && node.id() != removed)
            .collect();

        let removals = nodes.into_iter().map(|node| async move {
            if node.supports_cc(CommandClass::MultiChannelAssociation) {
                node.multi_channel_association_cc()
                    .remove(None, &[removed], &[])
                    .await
            } else if node.supports_cc(CommandClass::Association) {
                node.association_cc()
                    .remove_node_ids_from_all_groups(&[removed])
                    .await
            } else {
                debug!(node_id = %node.id(), "node has no association CC, skipping");
                Ok(())
            }
        });

        for result in join_all(removals).await {
            result?;
        }
        Ok(())
    }
}

struct GroupLayout {
    supports_plain: bool,
    plain_count: u8,
    multi_channel: bool,
}

/// Resolve how a group is addressed on a node.
fn group_layout(node: &Arc<Node>, group: u8) -> ZWaveResult<GroupLayout> {
    let supports_plain = node.supports_cc(CommandClass::Association);
    let supports_multi_channel = node.supports_cc(CommandClass::MultiChannelAssociation);
    if !supports_plain && !supports_multi_channel {
        return Err(ZWaveError::CcNotSupported {
            cc: CommandClass::Association,
            node_id: node.id(),
        });
    }

    let plain_count = if supports_plain {
        node.association_cc().group_count()
    } else {
        0
    };
    let multi_channel_count = if supports_multi_channel {
        node.multi_channel_association_cc().group_count()
    } else {
        0
    };
    let group_count = plain_count.max(multi_channel_count);
    if group == 0 || group > group_count {
        return Err(ZWaveError::InvalidAssociationGroup { group });
    }

    let no_endpoint = node
        .device_config()
        .as_ref()
        .and_then(|config| config.associations.get(&group))
        .is_some_and(|config| config.no_endpoint);

    Ok(GroupLayout {
        supports_plain,
        plain_count,
        multi_channel: supports_multi_channel && group <= multi_channel_count && !no_endpoint,
    })
}

/// Split an association list into plain node ids and endpoint destinations.
fn split_destinations(associations: &[Association]) -> (Vec<NodeId>, Vec<Association>) {
    let mut plain_ids = Vec::new();
    let mut endpoint_destinations = Vec::new();
    for association in associations {
        match association.endpoint {
            None => plain_ids.push(association.node_id),
            Some(_) => endpoint_destinations.push(*association),
        }
    }
    (plain_ids, endpoint_destinations)
}
