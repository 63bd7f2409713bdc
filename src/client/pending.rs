use crate::correlation::CorrelationId;
use crate::log_debug;
use crate::protocol::Payload;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The protected state is the pending-call map (correlation_id → oneshot
/// sender). There are no invariants spanning multiple fields; the worst
/// outcome of using a poisoned value is a dropped response, which the
/// caller-side timeout already covers.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type Slot = oneshot::Sender<Result<Payload>>;

/// Correlation store: pending synchronous calls awaiting responses.
///
/// Each call registers a single-resolution slot keyed by its correlation ID.
/// The slot resolves exactly once — with the response outcome, by timeout
/// removal, or by `fail_all` on disconnect. Resolving an already-removed
/// slot is a silent no-op, which is how late responses after a timeout are
/// discarded safely.
pub(super) struct PendingCalls {
    slots: Mutex<HashMap<CorrelationId, Slot>>,
}

impl PendingCalls {
    // ---
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new pending call.
    ///
    /// Returns the receiver the caller blocks on until resolution.
    pub fn register(&self, correlation_id: CorrelationId) -> oneshot::Receiver<Result<Payload>> {
        // ---
        let (tx, rx) = oneshot::channel();
        lock_ignore_poison(&self.slots).insert(correlation_id, tx);
        rx
    }

    /// Resolve a pending call with the response outcome.
    ///
    /// Returns false if no slot exists for the ID — the call already timed
    /// out, was failed by a disconnect, or never existed.
    pub fn complete(&self, correlation_id: &CorrelationId, outcome: Result<Payload>) -> bool {
        // ---
        let slot = lock_ignore_poison(&self.slots).remove(correlation_id);

        match slot {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    log_debug!("response arrived after caller abandoned the call ({correlation_id})");
                }
                true
            }
            None => false,
        }
    }

    /// Remove a pending call without resolving it. Used for timeout cleanup.
    pub fn remove(&self, correlation_id: &CorrelationId) -> bool {
        // ---
        lock_ignore_poison(&self.slots).remove(correlation_id).is_some()
    }

    /// Fail every outstanding call with a connection-closed error.
    ///
    /// Invoked when the connection is torn down; callers unblock immediately
    /// instead of waiting out their timeouts.
    pub fn fail_all(&self) {
        // ---
        let drained: Vec<Slot> = {
            let mut slots = lock_ignore_poison(&self.slots);
            slots.drain().map(|(_, tx)| tx).collect()
        };

        for tx in drained {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }
    }

    /// Number of calls currently awaiting resolution.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.slots).len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;

    fn payload() -> Payload {
        Payload {
            kind: "probe".to_string(),
            data: Bytes::from_static(b"{}"),
        }
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        // ---
        let pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        let rx = pending.register(correlation_id.clone());
        assert_eq!(pending.len(), 1);

        assert!(pending.complete(&correlation_id, Ok(payload())));

        // Slot is destroyed the instant it resolves
        assert_eq!(pending.len(), 0);

        let received = rx.await.unwrap().unwrap();
        assert_eq!(received.kind, "probe");
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_a_noop() {
        // ---
        let pending = PendingCalls::new();
        assert!(!pending.complete(&CorrelationId::generate(), Ok(payload())));
    }

    #[tokio::test]
    async fn test_remove_then_complete_discards_late_response() {
        // ---
        let pending = PendingCalls::new();
        let correlation_id = CorrelationId::generate();

        let _rx = pending.register(correlation_id.clone());
        assert!(pending.remove(&correlation_id));

        // Second remove and a late completion both no-op
        assert!(!pending.remove(&correlation_id));
        assert!(!pending.complete(&correlation_id, Ok(payload())));
    }

    #[tokio::test]
    async fn test_fail_all_unblocks_every_caller() {
        // ---
        let pending = PendingCalls::new();
        let rx1 = pending.register(CorrelationId::generate());
        let rx2 = pending.register(CorrelationId::generate());

        pending.fail_all();
        assert_eq!(pending.len(), 0);

        assert!(matches!(rx1.await.unwrap(), Err(Error::ConnectionClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(Error::ConnectionClosed)));
    }
}
