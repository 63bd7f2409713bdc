//! Disconnect listeners with fault isolation.
//!
//! Listener callbacks are user-supplied; a failing listener must never
//! interrupt the remaining listeners or the engine path that fired the
//! notification. Invocation therefore snapshots the listener set first (no
//! lock held across user code) and guards each call individually.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::log_warn;
use crate::Result;

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The protected state is a plain listener list with no cross-field
/// invariants; a poisoned lock still holds a usable value.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Observer of connection teardown.
///
/// Fired exactly once per disconnect, whether the close was orderly or the
/// transport detected a failure. Errors returned here are logged and
/// discarded; there is no caller to receive them.
pub trait DisconnectListener: Send + Sync {
    fn on_disconnect(&self, peer: &str) -> Result<()>;
}

/// Ordered collection of disconnect listeners.
pub(crate) struct DisconnectListeners {
    listeners: Mutex<Vec<Arc<dyn DisconnectListener>>>,
}

impl DisconnectListeners {
    // ---
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn DisconnectListener>) {
        lock_ignore_poison(&self.listeners).push(listener);
    }

    /// Notify every listener, isolating failures per listener.
    pub(crate) fn notify(&self, peer: &str) {
        // ---
        let snapshot = { lock_ignore_poison(&self.listeners).clone() };

        for listener in snapshot {
            if let Err(_err) = listener.on_disconnect(peer) {
                log_warn!("disconnect listener failed for {peer}: {_err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl DisconnectListener for Counting {
        fn on_disconnect(&self, _peer: &str) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl DisconnectListener for Failing {
        fn on_disconnect(&self, _peer: &str) -> Result<()> {
            Err(Error::InvalidState("listener blew up".into()))
        }
    }

    #[test]
    fn test_failing_listener_does_not_stop_later_listeners() {
        // ---
        let count = Arc::new(AtomicUsize::new(0));

        let listeners = DisconnectListeners::new();
        listeners.add(Arc::new(Failing));
        listeners.add(Arc::new(Counting(count.clone())));

        listeners.notify("peer-1");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
