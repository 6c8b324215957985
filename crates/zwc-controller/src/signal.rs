//! Single-shot signals settled from a later status report.

use parking_lot::Mutex;
use tokio::sync::oneshot;

use zwc_core::{ZWaveError, ZWaveResult};

/// A resolve-once/reject-once slot bridging a user-entry operation to the
/// status report that settles it.
///
/// `create` arms the slot and hands back the receiving half; a handler later
/// settles it with `resolve` or `reject`. Settling a cleared slot is a no-op,
/// so late or duplicate reports are harmless.
#[derive(Debug, Default)]
pub struct SignalSlot {
    sender: Mutex<Option<oneshot::Sender<ZWaveResult<bool>>>>,
}

impl SignalSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot. A previously armed waiter is cancelled.
    pub fn create(&self) -> oneshot::Receiver<ZWaveResult<bool>> {
        let (tx, rx) = oneshot::channel();
        *self.sender.lock() = Some(tx);
        rx
    }

    /// Resolve the pending waiter, returning whether one was armed.
    pub fn resolve(&self, value: bool) -> bool {
        self.sender
            .lock()
            .take()
            .is_some_and(|tx| tx.send(Ok(value)).is_ok())
    }

    /// Reject the pending waiter, returning whether one was armed.
    pub fn reject(&self, error: ZWaveError) -> bool {
        self.sender
            .lock()
            .take()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Whether a waiter is currently armed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Disarm without settling; the waiter observes a cancellation.
    pub fn clear(&self) {
        self.sender.lock().take();
    }

    /// Await the receiving half. A cancelled slot reads as `Ok(false)`.
    pub async fn wait(rx: oneshot::Receiver<ZWaveResult<bool>>) -> ZWaveResult<bool> {
        rx.await.unwrap_or(Ok(false))
    }
}
