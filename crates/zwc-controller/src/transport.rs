//! The transport seam between the controller core and the serial driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use zwc_core::{Callback, FunctionType, Request, Response, ValueStore, ZWaveResult};

use crate::{ConfigManager, SecurityManager};

/// Priority of an outgoing message in the transport's send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessagePriority {
    /// Controller-to-stick housekeeping, ahead of node traffic.
    Controller,
    /// Liveness probes.
    Ping,
    /// Regular node communication.
    #[default]
    Normal,
}

/// Options for a single `send_message` call.
#[derive(Debug, Clone)]
pub struct SendMessageOptions {
    /// Whether the transport should verify the function is supported by the
    /// stick before sending.
    pub support_check: bool,
    /// Per-message expiry. `None` uses the transport default.
    pub expire: Option<Duration>,
    /// Queue priority.
    pub priority: MessagePriority,
}

impl Default for SendMessageOptions {
    fn default() -> Self {
        Self {
            support_check: true,
            expire: None,
            priority: MessagePriority::Normal,
        }
    }
}

impl SendMessageOptions {
    /// Options that skip the stick-side support check.
    #[must_use]
    pub fn unchecked() -> Self {
        Self {
            support_check: false,
            ..Self::default()
        }
    }

    /// Set a per-message expiry.
    #[must_use]
    pub const fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    /// Set the queue priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Ack/byte timeouts pushed to the stick during the interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    pub ack: Duration,
    pub byte: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            ack: Duration::from_millis(1000),
            byte: Duration::from_millis(150),
        }
    }
}

/// A handler for unsolicited status reports, keyed by function type.
///
/// Returns whether the callback was handled; unhandled callbacks may be
/// offered to other consumers by the transport.
pub type RequestHandler = Arc<dyn Fn(Callback) -> BoxFuture<'static, bool> + Send + Sync>;

/// Predicate selecting in-flight transactions to reject.
pub type TransactionPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// The message transport the controller core drives.
///
/// Implementations serialize byte-level access to the stick; the core only
/// assumes that `send_message` resolves with the typed response (or the
/// terminal callback, for callback-driven requests) and that unsolicited
/// reports reach the registered handlers in arrival order, one at a time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a typed request and await its typed response.
    async fn send_message(
        &self,
        request: Request,
        options: SendMessageOptions,
    ) -> ZWaveResult<Response>;

    /// Register a handler for unsolicited reports of the given function type.
    ///
    /// A `one_shot` handler is removed after the first callback it handles.
    fn register_request_handler(
        &self,
        function: FunctionType,
        handler: RequestHandler,
        one_shot: bool,
    );

    /// Remove the handler for the given function type.
    fn unregister_request_handler(&self, function: FunctionType);

    /// Reject all in-flight transactions matching the predicate. Each
    /// rejected send resolves with a transport error.
    fn reject_transactions(&self, predicate: TransactionPredicate);

    /// The S0 security manager, if a network key is configured.
    fn security_manager(&self) -> Option<Arc<SecurityManager>>;

    /// The process-wide value store.
    fn value_store(&self) -> Arc<ValueStore>;

    /// The device configuration database.
    fn config_manager(&self) -> Arc<ConfigManager>;

    /// Configured ack/byte timeouts.
    fn timeouts(&self) -> TransportTimeouts;

    /// Hook invoked by the interview before nodes are created, giving the
    /// driver a chance to open its value databases.
    async fn init_value_dbs(&self) -> ZWaveResult<()>;

    /// The serialized network cache to restore nodes from, if any.
    fn cached_network(&self) -> Option<serde_json::Value>;
}
