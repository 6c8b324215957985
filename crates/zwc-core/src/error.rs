//! Error types for the controller core.

use thiserror::Error;

use crate::{CommandClass, FunctionType, NodeId};

/// Result type alias for controller operations.
pub type ZWaveResult<T> = Result<T, ZWaveError>;

/// Errors raised by the controller core and its transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZWaveError {
    #[error("node {node_id} was not found in the registry")]
    NodeNotFound { node_id: NodeId },

    #[error("endpoint {endpoint} of node {node_id} does not exist")]
    EndpointNotFound { node_id: NodeId, endpoint: u8 },

    #[error("the controller reported a failure while starting the inclusion")]
    InclusionFailed,

    #[error("the controller reported a failure while starting the exclusion")]
    ExclusionFailed,

    #[error("the message expired before the node answered")]
    MessageExpired,

    #[error("the message was dropped by the transport: {reason}")]
    MessageDropped { reason: String },

    #[error("node {node_id} did not respond in time")]
    NodeTimeout { node_id: NodeId },

    #[error("the driver is not ready yet, the controller interview has not completed")]
    DriverNotReady,

    #[error("the network cache is invalid: {reason}")]
    InvalidCache { reason: String },

    #[error("node {node_id} does not support {cc}")]
    CcNotSupported { cc: CommandClass, node_id: NodeId },

    #[error("association group {group} does not exist")]
    InvalidAssociationGroup { group: u8 },

    #[error("the following associations are not allowed: {details}")]
    AssociationNotAllowed { details: String },

    #[error("node {node_id} is responding and cannot be replaced")]
    ReplaceNodeOk { node_id: NodeId },

    #[error("replacing the failed node did not succeed: {reason}")]
    ReplaceFailed { reason: String },

    #[error("node {node_id} is responding and cannot be removed")]
    RemoveNodeOk { node_id: NodeId },

    #[error("removing the failed node did not succeed: {reason}")]
    RemoveFailed { reason: String },

    #[error("unexpected response to {function}")]
    UnexpectedResponse { function: FunctionType },
}

impl ZWaveError {
    /// Whether this error is a transient transport condition rather than a
    /// protocol-level refusal.
    ///
    /// The security bootstrap and the lifeline bootstrap swallow these with a
    /// warning instead of aborting the surrounding flow.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MessageExpired | Self::MessageDropped { .. } | Self::NodeTimeout { .. }
        )
    }
}
