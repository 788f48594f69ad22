//! TransportHandle - send side of the backend link
//!
//! Wraps the intent channel of the WebSocket task. Sending is
//! fire-and-forget: the outcome comes back later as an operation status
//! broadcast. While the link is down intents are refused rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::messages::Intent;
use crate::error::{PadmapError, Result};

#[derive(Clone)]
pub struct TransportHandle {
    intent_tx: mpsc::UnboundedSender<Intent>,
    connected: Arc<AtomicBool>,
}

impl TransportHandle {
    /// Create a handle plus the receiving end the transport task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Intent>) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let handle = Self {
            intent_tx,
            connected: Arc::new(AtomicBool::new(false)),
        };
        (handle, intent_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue an intent for the backend
    pub fn send(&self, intent: Intent) -> Result<()> {
        if !self.is_connected() {
            return Err(PadmapError::unavailable("not connected to the backend"));
        }
        let event = intent.event_name();
        self.intent_tx
            .send(intent)
            .map_err(|_| PadmapError::unavailable("transport task has stopped"))?;
        debug!("Queued '{}' intent", event);
        Ok(())
    }

    /// Flag shared with the transport task
    pub(crate) fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_refused_while_disconnected() {
        let (handle, mut rx) = TransportHandle::channel();

        let err = handle.send(Intent::request_configuration()).unwrap_err();
        assert!(matches!(err, PadmapError::TransportUnavailable(_)));
        assert!(rx.try_recv().is_err(), "Nothing is queued while offline");
    }

    #[test]
    fn test_send_while_connected() {
        let (handle, mut rx) = TransportHandle::channel();
        handle.set_connected(true);

        handle.send(Intent::delete_variable("Speed")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Intent::delete_variable("Speed"));
    }

    #[test]
    fn test_send_after_task_stopped() {
        let (handle, rx) = TransportHandle::channel();
        handle.set_connected(true);
        drop(rx);

        assert!(matches!(
            handle.send(Intent::request_configuration()),
            Err(PadmapError::TransportUnavailable(_))
        ));
    }
}
