// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! The transport layer owns connection acceptance, I/O scheduling, byte
//! framing, and serialization of [`Frame`] values. The engine sees only the
//! contract below: open or close a logical connection, send a frame and
//! learn whether the write succeeded, and receive inbound frames until the
//! connection closes.
//!
//! Higher-level semantics such as correlation, timeouts, dispatch, and
//! subscription bookkeeping live in the client and server layers.
//!
//! Concrete implementations of this interface live under `src/transport/`.

use crate::protocol::Frame;
use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

/// Identity of one live logical connection.
///
/// Assigned by the transport at connect time and stable for the connection's
/// lifetime. The engine uses it as a map key only; it carries no routing
/// meaning of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a logical connection.
///
/// Implementations must ensure that:
/// - `send()` resolves only once the transport has accepted or rejected the
///   write, so callers learn about send failures.
/// - `send()` after `close()` fails with `Error::ConnectionClosed`.
/// - `close()` is idempotent and eventually causes the peer's inbound stream
///   to end.
#[async_trait::async_trait]
pub trait Link: Send + Sync {
    // ---
    /// Identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Printable address of the remote peer, used in listener notifications
    /// and diagnostics.
    fn peer_addr(&self) -> &str;

    /// Send a frame over the connection.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Shared link pointer.
///
/// An `Arc<dyn Link>`: cheap to clone, and every clone addresses the same
/// underlying connection.
pub type LinkPtr = Arc<dyn Link>;

/// A live connection as handed to the engine: the outbound link plus the
/// inbound frame stream.
///
/// The inbound receiver yields frames until the connection closes — orderly
/// or abrupt, the stream simply ends. That end-of-stream is the engine's
/// disconnect notification.
pub struct LinkHandle {
    // ---
    pub link: LinkPtr,
    pub inbox: mpsc::Receiver<Frame>,
}

/// Stream of connections accepted by a bound server transport.
pub type IncomingLinks = mpsc::Receiver<LinkHandle>;

/// Client-side transport: opens logical connections to a server.
#[async_trait::async_trait]
pub trait ClientTransport: Send + Sync {
    /// Open a connection, resolving within `timeout`.
    ///
    /// Implementations map their own failure modes onto `Error::Connect`
    /// and `Error::ConnectTimeout`; raw transport errors must not escape.
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<LinkHandle>;
}

/// Server-side transport: accepts logical connections from peers.
#[async_trait::async_trait]
pub trait ServerTransport: Send + Sync {
    /// Bind to an address and return the stream of accepted connections.
    async fn bind(&self, host: &str, port: u16) -> Result<IncomingLinks>;

    /// Stop accepting connections and release the binding. Existing
    /// connections are not affected; the engine closes those itself.
    async fn close(&self) -> Result<()>;
}

/// Shared client transport pointer.
pub type ClientTransportPtr = Arc<dyn ClientTransport>;

/// Shared server transport pointer.
pub type ServerTransportPtr = Arc<dyn ServerTransport>;
