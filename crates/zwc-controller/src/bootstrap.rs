//! Lifeline and wake-up bootstrap for newly added nodes.

use std::sync::Arc;

use tracing::{debug, warn};

use zwc_core::{
    Association, CommandClass, CommandClassInfo, FunctionType, Request, Response, ZWaveError,
    ZWaveResult,
};

use crate::{Controller, Node, SendMessageOptions};

/// The lifeline association group.
const LIFELINE_GROUP: u8 = 1;

impl Controller {
    /// Configure the lifeline association and the wake-up destination of a
    /// freshly added node.
    ///
    /// # Errors
    ///
    /// Transient transport errors are logged and swallowed; anything else
    /// propagates to the caller.
    pub(crate) async fn bootstrap_lifeline_and_wake_up(
        &self,
        node: &Arc<Node>,
    ) -> ZWaveResult<()> {
        self.bootstrap_lifeline(node).await?;
        self.bootstrap_wake_up(node).await?;
        Ok(())
    }

    /// Add the controller to association group 1 of Z-Wave-Plus nodes and
    /// assign a return route back to us.
    async fn bootstrap_lifeline(&self, node: &Arc<Node>) -> ZWaveResult<()> {
        if !node.supports_cc(CommandClass::ZWavePlusInfo) {
            return Ok(());
        }
        let own_node_id = self.own_node_id()?;

        let result: ZWaveResult<()> = async {
            if node.supports_cc(CommandClass::MultiChannelAssociation) {
                // prefer the multi-channel variant so the root endpoint is
                // addressed explicitly
                node.multi_channel_association_cc()
                    .add(
                        LIFELINE_GROUP,
                        &[],
                        &[Association::multi_channel(own_node_id, 0)],
                    )
                    .await?;
            } else if node.supports_cc(CommandClass::Association) {
                node.association_cc()
                    .add_node_ids(LIFELINE_GROUP, &[own_node_id])
                    .await?;
            } else {
                debug!(node_id = %node.id(), "node supports no association CC, skipping lifeline");
                return Ok(());
            }

            let request = Request::AssignReturnRoute {
                node_id: node.id(),
                destination: own_node_id,
            };
            match self
                .transport()
                .send_message(request, SendMessageOptions::default())
                .await?
            {
                Response::ReturnRoute { .. } => Ok(()),
                _ => Err(ZWaveError::UnexpectedResponse {
                    function: FunctionType::AssignReturnRoute,
                }),
            }
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_recoverable() => {
                warn!(node_id = %node.id(), error = %err, "could not configure the lifeline association");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Register the Wake Up CC version on the node and point its wake-up
    /// destination at the controller.
    async fn bootstrap_wake_up(&self, node: &Arc<Node>) -> ZWaveResult<()> {
        if !node.supports_cc(CommandClass::WakeUp) {
            return Ok(());
        }
        let own_node_id = self.own_node_id()?;

        let result: ZWaveResult<()> = async {
            let version = match node.version_cc().cc_version(CommandClass::WakeUp).await? {
                0 => 1,
                version => version,
            };
            node.add_cc(CommandClass::WakeUp, CommandClassInfo::supported(version));
            node.wake_up_cc().interview(own_node_id).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_recoverable() => {
                warn!(node_id = %node.id(), error = %err, "could not configure wake-up");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
