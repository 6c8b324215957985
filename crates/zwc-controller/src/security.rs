//! S0 security: the network key manager and the post-inclusion bootstrap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use zwc_core::{CommandClass, CommandClassInfo, NodeId, ZWaveError, ZWaveResult};

use crate::{Controller, Node};

/// Size of the S0 network key in bytes.
pub const NETWORK_KEY_SIZE: usize = 16;

/// Per-message expiry during the S0 key exchange.
const S0_BOOTSTRAP_EXPIRE: Duration = Duration::from_secs(10);

/// The shared S0 network key. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct NetworkKey([u8; NETWORK_KEY_SIZE]);

impl NetworkKey {
    /// Wrap raw key material.
    #[must_use]
    pub const fn new(key: [u8; NETWORK_KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; NETWORK_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.write_str("NetworkKey(..)")
    }
}

/// Holds the network key and the free nonces received from nodes.
#[derive(Debug)]
pub struct SecurityManager {
    network_key: NetworkKey,
    free_nonces: Mutex<HashMap<NodeId, Vec<[u8; 8]>>>,
}

impl SecurityManager {
    /// Create a manager around the given network key.
    #[must_use]
    pub fn new(network_key: NetworkKey) -> Self {
        Self {
            network_key,
            free_nonces: Mutex::new(HashMap::new()),
        }
    }

    /// A copy of the network key, for key-set encapsulation.
    #[must_use]
    pub const fn network_key(&self) -> [u8; NETWORK_KEY_SIZE] {
        *self.network_key.as_bytes()
    }

    /// Remember a nonce a node handed out for later encapsulation.
    pub fn store_free_nonce(&self, node_id: NodeId, nonce: [u8; 8]) {
        self.free_nonces.lock().entry(node_id).or_default().push(nonce);
    }

    /// Consume a stored free nonce for a node, oldest first.
    pub fn take_free_nonce(&self, node_id: NodeId) -> Option<[u8; 8]> {
        let mut nonces = self.free_nonces.lock();
        let entry = nonces.get_mut(&node_id)?;
        if entry.is_empty() {
            None
        } else {
            Some(entry.remove(0))
        }
    }

    /// How many free nonces are stored for a node.
    #[must_use]
    pub fn free_nonce_count(&self, node_id: NodeId) -> usize {
        self.free_nonces.lock().get(&node_id).map_or(0, Vec::len)
    }
}

impl Controller {
    /// Run the S0 key exchange with a freshly included node.
    ///
    /// `assume_secure` forces the exchange even when the node did not
    /// advertise the Security command class, which is the case for
    /// replace-failed flows where no node information frame is received.
    ///
    /// Failures never propagate: the node is marked insecure, Security is
    /// removed from its capability set, and the reason is logged.
    pub(crate) async fn secure_bootstrap_s0(&self, node: &Arc<Node>, assume_secure: bool) {
        let Some(security) = self.transport().security_manager() else {
            debug!(node_id = %node.id(), "no security manager configured, including insecurely");
            node.set_secure(false);
            return;
        };

        if !assume_secure && !node.supports_cc(CommandClass::Security) {
            node.set_secure(false);
            return;
        }
        if assume_secure && !node.supports_cc(CommandClass::Security) {
            // replaced nodes never send a NIF, assume S0 version 1
            node.add_cc(CommandClass::Security, CommandClassInfo::supported(1));
        }

        let include_controller = self.is_including_controller();
        let result: ZWaveResult<()> = async {
            let api = node.security_cc();
            // the scheme report only confirms S0 is spoken
            let _scheme = api.get_scheme(S0_BOOTSTRAP_EXPIRE).await?;
            api.get_nonce(true, S0_BOOTSTRAP_EXPIRE).await?;
            api.set_network_key(security.network_key(), S0_BOOTSTRAP_EXPIRE)
                .await?;
            if include_controller {
                api.inherit_scheme(S0_BOOTSTRAP_EXPIRE).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                node.set_secure(true);
                info!(node_id = %node.id(), "node was included securely");
            }
            Err(err) => {
                node.set_secure(false);
                node.remove_cc(CommandClass::Security);
                let reason = match &err {
                    ZWaveError::MessageExpired => "a secure inclusion message timed out",
                    ZWaveError::MessageDropped { .. } => {
                        "a secure inclusion message could not be sent"
                    }
                    ZWaveError::NodeTimeout { .. } => "the node did not respond",
                    _ => "an unexpected error occurred",
                };
                warn!(
                    node_id = %node.id(),
                    error = %err,
                    "secure inclusion failed, continuing insecurely: {reason}"
                );
            }
        }
    }
}
