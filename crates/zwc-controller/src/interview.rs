//! The one-shot controller interview run at driver startup.

use std::sync::Arc;

use tracing::{debug, info, warn};

use zwc_core::{
    CommandClass, FunctionType, LibraryType, NodeId, Request, Response, ValueDb, ValueId,
    ZWaveError, ZWaveResult,
};

use crate::{Controller, ControllerIdentity, Node, SendMessageOptions};

impl Controller {
    /// Interview the stick and seed the node registry.
    ///
    /// Queries identity, role flags and capabilities, promotes the controller
    /// to SUC/SIS when the network has neither, creates a node object per
    /// known node id, restores the cached network state, and finally pushes
    /// the configured serial API timeouts.
    ///
    /// # Errors
    ///
    /// Any transport error aborts the interview and leaves the controller
    /// uninitialized; capability queries then fail with
    /// [`ZWaveError::DriverNotReady`].
    pub async fn interview(self: &Arc<Self>) -> ZWaveResult<()> {
        let transport = Arc::clone(self.transport());
        // identity queries are sent unconditionally
        let options = SendMessageOptions::unchecked();

        let Response::ControllerVersion {
            library_version,
            library_type,
        } = transport
            .send_message(Request::GetControllerVersion, options.clone())
            .await?
        else {
            return Err(unexpected(FunctionType::GetControllerVersion));
        };
        debug!(%library_version, %library_type, "received controller version info");

        let Response::ControllerId {
            home_id,
            own_node_id,
        } = transport
            .send_message(Request::GetControllerId, options.clone())
            .await?
        else {
            return Err(unexpected(FunctionType::GetControllerId));
        };
        debug!(%home_id, %own_node_id, "received controller ids");

        let Response::ControllerCapabilities(capabilities) = transport
            .send_message(Request::GetControllerCapabilities, options.clone())
            .await?
        else {
            return Err(unexpected(FunctionType::GetControllerCapabilities));
        };

        let Response::SerialApiCapabilities {
            serial_api_version,
            manufacturer_id,
            product_type,
            product_id,
            supported_function_types,
        } = transport
            .send_message(Request::GetSerialApiCapabilities, options.clone())
            .await?
        else {
            return Err(unexpected(FunctionType::GetSerialApiCapabilities));
        };

        let Response::SucNodeId { suc_node_id } = transport
            .send_message(Request::GetSucNodeId, options)
            .await?
        else {
            return Err(unexpected(FunctionType::GetSucNodeId));
        };
        debug!(%suc_node_id, "received SUC node id");

        {
            let mut state = self.state.write();
            state.supported_function_ids =
                supported_function_types.iter().map(|f| f.id()).collect();
            state.supported_function_types = supported_function_types;
            state.identity = Some(ControllerIdentity {
                home_id,
                own_node_id,
                suc_node_id,
                library_version,
                library_type,
                serial_api_version,
                manufacturer_id,
                product_type,
                product_id,
                capabilities,
                is_slave: false,
                supports_timers: false,
            });
        }

        // if the network has no SUC/SIS yet and we may become one, promote
        // ourselves
        if !capabilities.is_secondary
            && !suc_node_id.is_some_node()
            && !capabilities.is_static_update_controller
            && !capabilities.is_sis_present
        {
            info!("there is no SUC/SIS in the network, promoting ourselves");
            match self.configure_suc(own_node_id, true, true).await {
                Ok(true) => {
                    if let Some(identity) = self.state.write().identity.as_mut() {
                        identity.suc_node_id = own_node_id;
                    }
                }
                Ok(false) => warn!("becoming the SUC was refused by the stick"),
                Err(err) => warn!(error = %err, "error while promoting to SUC"),
            }
        }

        transport.init_value_dbs().await?;

        let Response::SerialApiInitData {
            node_ids,
            is_slave,
            supports_timers,
        } = transport
            .send_message(Request::GetSerialApiInitData, SendMessageOptions::default())
            .await?
        else {
            return Err(unexpected(FunctionType::GetSerialApiInitData));
        };
        info!(nodes = node_ids.len(), "received node list from the stick");

        if let Some(identity) = self.state.write().identity.as_mut() {
            identity.is_slave = is_slave;
            identity.supports_timers = supports_timers;
        }

        // one node object per known id, each with its precomputed value index
        let store = transport.value_store();
        let mut index = store.index_by_node();
        for node_id in node_ids {
            let db = ValueDb::new(
                node_id,
                Arc::clone(&store),
                index.remove(&node_id).unwrap_or_default(),
            );
            let node = Arc::new(Node::new(node_id, Arc::clone(&transport), db));
            self.insert_node(node);
        }

        self.restore_from_cache()?;

        // the own node carries the stick's manufacturer metadata
        if let Some(own_node) = self.get_node(own_node_id) {
            let db = own_node.value_db();
            db.set_value(
                ValueId::new(CommandClass::ManufacturerSpecific, 0, "manufacturerId"),
                serde_json::json!(manufacturer_id),
            );
            db.set_value(
                ValueId::new(CommandClass::ManufacturerSpecific, 0, "productType"),
                serde_json::json!(product_type),
            );
            db.set_value(
                ValueId::new(CommandClass::ManufacturerSpecific, 0, "productId"),
                serde_json::json!(product_id),
            );
        }

        self.register_protocol_handlers();

        if library_type != LibraryType::BridgeController
            && self.is_function_supported(FunctionType::SetSerialApiTimeouts)?
        {
            let timeouts = transport.timeouts();
            let request = Request::SetSerialApiTimeouts {
                ack_timeout_ms: saturating_ms(timeouts.ack),
                byte_timeout_ms: saturating_ms(timeouts.byte),
            };
            let response = transport
                .send_message(request, SendMessageOptions::default())
                .await?;
            if let Response::SerialApiTimeouts {
                ack_timeout_ms,
                byte_timeout_ms,
            } = response
            {
                debug!(
                    previous_ack_ms = ack_timeout_ms,
                    previous_byte_ms = byte_timeout_ms,
                    "serial API timeouts updated"
                );
            }
        }

        info!("controller interview completed");
        Ok(())
    }

    /// Restore the registered nodes from the driver's network cache.
    pub(crate) fn restore_from_cache(&self) -> ZWaveResult<()> {
        let Some(cache) = self.transport().cached_network() else {
            return Ok(());
        };
        let Some(entries) = cache.get("nodes").and_then(|v| v.as_object()) else {
            return Ok(());
        };

        for (key, entry) in entries {
            let Ok(id) = key.parse::<u8>() else {
                return Err(ZWaveError::InvalidCache {
                    reason: format!("\"{key}\" is not a valid node id"),
                });
            };
            if let Some(node) = self.get_node(NodeId::new(id)) {
                node.deserialize(entry)?;
            } else {
                debug!(node_id = id, "cached node is no longer part of the network");
            }
        }
        Ok(())
    }
}

fn unexpected(function: FunctionType) -> ZWaveError {
    ZWaveError::UnexpectedResponse { function }
}

#[allow(clippy::cast_possible_truncation)]
fn saturating_ms(duration: std::time::Duration) -> u16 {
    duration.as_millis().min(u128::from(u16::MAX)) as u16
}
