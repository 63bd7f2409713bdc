use crate::protocol::Payload;
use crate::{log_debug, log_warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time;

/// Mailbox for unsolicited fire-and-forget payloads.
///
/// The client has no handler registry; inbound async messages queue here
/// until the application polls them with `await_message`. The queue is
/// bounded: when full, new deliveries are dropped with a warning so a slow
/// poller can never stall the connection's read task.
pub(super) struct Mailbox {
    tx: mpsc::Sender<Payload>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Payload>>,
}

impl Mailbox {
    // ---
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Deliver an inbound payload. Never blocks.
    pub fn deliver(&self, payload: Payload) {
        // ---
        match self.tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_dropped)) => {
                log_warn!("mailbox full, dropping message of kind [{}]", _dropped.kind);
            }
            Err(TrySendError::Closed(_)) => {
                // Receiver half lives as long as the mailbox; only reachable
                // during teardown.
                log_debug!("mailbox closed, message discarded");
            }
        }
    }

    /// Take the next queued payload, waiting up to `timeout`.
    ///
    /// Returns `None` when the timeout expires with nothing queued.
    pub async fn take(&self, timeout: Duration) -> Option<Payload> {
        // ---
        let mut rx = self.rx.lock().await;
        time::timeout(timeout, rx.recv()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;

    fn payload(kind: &str) -> Payload {
        Payload {
            kind: kind.to_string(),
            data: Bytes::from_static(b"{}"),
        }
    }

    #[tokio::test]
    async fn test_delivery_order_is_preserved() {
        // ---
        let mailbox = Mailbox::new(8);
        mailbox.deliver(payload("first"));
        mailbox.deliver(payload("second"));

        let first = mailbox.take(Duration::from_millis(100)).await.unwrap();
        let second = mailbox.take(Duration::from_millis(100)).await.unwrap();
        assert_eq!(first.kind, "first");
        assert_eq!(second.kind, "second");
    }

    #[tokio::test]
    async fn test_take_times_out_on_empty_mailbox() {
        // ---
        let mailbox = Mailbox::new(8);
        assert!(mailbox.take(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_new_deliveries() {
        // ---
        let mailbox = Mailbox::new(1);
        mailbox.deliver(payload("kept"));
        mailbox.deliver(payload("dropped"));

        let kept = mailbox.take(Duration::from_millis(100)).await.unwrap();
        assert_eq!(kept.kind, "kept");
        assert!(mailbox.take(Duration::from_millis(10)).await.is_none());
    }
}
