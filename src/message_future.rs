//! Send-outcome future for broadcast and point-to-point sends.
//!
//! A [`MessageFuture`] reports whether the underlying transport writes
//! succeeded. It says nothing about application-level responses; those only
//! exist for synchronous calls, which have their own path.

use tokio::sync::oneshot;

use crate::{Error, Result};

/// Outcome of a send operation.
///
/// For a broadcast, the outcome aggregates every targeted connection:
/// success iff every send succeeded, otherwise the first error encountered.
pub struct MessageFuture {
    inner: Inner,
}

enum Inner {
    /// Outcome known at creation time (e.g. the payload failed to encode).
    Ready(Result<()>),
    /// Outcome delivered by the send task.
    Pending(oneshot::Receiver<Result<()>>),
}

impl MessageFuture {
    // ---
    /// Create a future resolved by a [`Completion`].
    pub(crate) fn pair() -> (Completion, Self) {
        let (tx, rx) = oneshot::channel();
        (
            Completion { tx },
            Self {
                inner: Inner::Pending(rx),
            },
        )
    }

    /// Create an already-resolved future.
    pub(crate) fn ready(outcome: Result<()>) -> Self {
        Self {
            inner: Inner::Ready(outcome),
        }
    }

    /// Await the aggregated send outcome. Consumes the future.
    pub async fn outcome(self) -> Result<()> {
        match self.inner {
            Inner::Ready(outcome) => outcome,
            Inner::Pending(rx) => rx
                .await
                .unwrap_or_else(|_| Err(Error::Transport("send task dropped before completing".into()))),
        }
    }

    /// Convenience: await the outcome and collapse it to a flag.
    pub async fn is_success(self) -> bool {
        self.outcome().await.is_ok()
    }
}

/// Write half of a [`MessageFuture`]; owned by the send task.
pub(crate) struct Completion {
    tx: oneshot::Sender<Result<()>>,
}

impl Completion {
    /// Resolve the paired future. Dropping an unresolved `Completion`
    /// resolves it with a transport error instead.
    pub(crate) fn resolve(self, outcome: Result<()>) {
        let _ = self.tx.send(outcome);
    }
}
