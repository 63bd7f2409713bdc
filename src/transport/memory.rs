//! In-memory transport implementation.
//!
//! A pure in-process implementation of the domain-level transport traits,
//! intended for testing, local execution, and as the reference for transport
//! semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** other
//! transports are expected to approximate:
//!
//! - `connect()` succeeds only against an address something has bound.
//! - Frames sent after `connect()`/`bind()` return are deliverable, in send
//!   order per direction.
//! - `close()` on either side eventually ends the peer's inbound stream;
//!   the engine treats that end-of-stream as the disconnect notification.
//! - `send()` on a closed link fails; it never silently drops.
//!
//! ## Non-Goals
//!
//! No emulation of real network failure modes, partial writes, or
//! reordering. This transport exists as a deterministic baseline against
//! which engine behavior can be validated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::time;

use crate::domain::{
    // ---
    ClientTransport,
    ClientTransportPtr,
    ConnectionId,
    IncomingLinks,
    Link,
    LinkHandle,
    LinkPtr,
    ServerTransport,
    ServerTransportPtr,
};
use crate::protocol::Frame;
use crate::{log_debug, Error, Result};

/// Per-direction frame buffer between two linked endpoints.
const LINK_CHANNEL_CAPACITY: usize = 64;

/// Backlog of accepted-but-not-yet-admitted connections per listener.
const ACCEPT_BACKLOG: usize = 16;

/// Acquire a mutex guard, intentionally ignoring poisoning.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared connection fabric for the in-memory transport.
///
/// Simulates a network within a single process: server transports bind
/// addresses on a hub, client transports connect through the same hub,
/// exactly as processes sharing a real network would.
///
/// For integration tests that need isolation between parallel test cases,
/// construct a hub explicitly and pass it to the `*_with_hub` factories:
///
/// ```
/// # async fn example() -> duplex_rpc::Result<()> {
/// let hub = duplex_rpc::MemoryHub::new();
///
/// let server_transport = duplex_rpc::create_memory_server_transport_with_hub(hub.clone());
/// let client_transport = duplex_rpc::create_memory_client_transport_with_hub(hub.clone());
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    listeners: RwLock<HashMap<String, mpsc::Sender<LinkHandle>>>,
    next_connection_id: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self {
            listeners: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn bind(&self, addr: String) -> Result<IncomingLinks> {
        // ---
        let mut listeners = self.listeners.write().await;

        if listeners.contains_key(&addr) {
            return Err(Error::Connect(format!("address [{addr}] already bound")));
        }

        log_debug!("hub: listener bound at {addr}");

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        listeners.insert(addr, tx);
        Ok(rx)
    }

    async fn unbind(&self, addr: &str) {
        // ---
        log_debug!("hub: listener unbound from {addr}");
        self.listeners.write().await.remove(addr);
    }

    async fn connect(&self, addr: &str) -> Result<LinkHandle> {
        // ---
        let acceptor = {
            self.listeners.read().await.get(addr).cloned()
        }
        .ok_or_else(|| Error::Connect(format!("no listener at [{addr}]")))?;

        let id = self.next_id();

        // Two directed channels form one full-duplex connection.
        let (client_tx, server_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (server_tx, client_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);

        let client_link: LinkPtr = Arc::new(MemoryLink {
            id,
            peer: format!("mem://{addr}"),
            outbound: Mutex::new(Some(client_tx)),
        });

        let server_link: LinkPtr = Arc::new(MemoryLink {
            id,
            peer: format!("mem://peer-{}", id.0),
            outbound: Mutex::new(Some(server_tx)),
        });

        acceptor
            .send(LinkHandle {
                link: server_link,
                inbox: server_rx,
            })
            .await
            .map_err(|_| Error::Connect(format!("listener at [{addr}] is gone")))?;

        log_debug!("hub: {id} connected to {addr}");

        Ok(LinkHandle {
            link: client_link,
            inbox: client_rx,
        })
    }
}

/// One endpoint of an in-memory connection.
///
/// `close()` takes the outbound sender; dropping it ends the peer's inbound
/// stream, which is how the close propagates. The local inbound stream ends
/// when the peer does the same — mirroring a socket's two half-closes.
struct MemoryLink {
    // ---
    id: ConnectionId,
    peer: String,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
}

#[async_trait::async_trait]
impl Link for MemoryLink {
    // ---
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> &str {
        &self.peer
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        // ---
        let tx = { lock_ignore_poison(&self.outbound).clone() };

        match tx {
            None => Err(Error::ConnectionClosed),
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| Error::Transport("peer endpoint is gone".into())),
        }
    }

    async fn close(&self) -> Result<()> {
        // ---
        lock_ignore_poison(&self.outbound).take();
        Ok(())
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        // Last reference gone without an explicit close; release the
        // outbound half so the peer still observes the disconnect.
        lock_ignore_poison(&self.outbound).take();
    }
}

struct MemoryClientTransport {
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl ClientTransport for MemoryClientTransport {
    // ---
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<LinkHandle> {
        // ---
        let addr = format!("{host}:{port}");

        match time::timeout(timeout, self.hub.connect(&addr)).await {
            Err(_) => Err(Error::ConnectTimeout(timeout)),
            Ok(result) => result,
        }
    }
}

struct MemoryServerTransport {
    // ---
    hub: Arc<MemoryHub>,
    bound: Mutex<Option<String>>,
}

#[async_trait::async_trait]
impl ServerTransport for MemoryServerTransport {
    // ---
    async fn bind(&self, host: &str, port: u16) -> Result<IncomingLinks> {
        // ---
        let addr = format!("{host}:{port}");
        let incoming = self.hub.bind(addr.clone()).await?;
        lock_ignore_poison(&self.bound).replace(addr);
        Ok(incoming)
    }

    async fn close(&self) -> Result<()> {
        // ---
        let addr = { lock_ignore_poison(&self.bound).take() };

        if let Some(addr) = addr {
            self.hub.unbind(&addr).await;
        }
        Ok(())
    }
}

/// Process-global hub used by the no-argument factories.
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// Create a client transport on the process-global hub.
///
/// All transports created by the no-argument factories share one fabric,
/// matching the semantics of processes on a real network. For isolated
/// parallel testing, use [`create_memory_client_transport_with_hub`].
pub fn create_memory_client_transport() -> ClientTransportPtr {
    create_memory_client_transport_with_hub(global_hub())
}

/// Create a client transport on the provided hub.
pub fn create_memory_client_transport_with_hub(hub: Arc<MemoryHub>) -> ClientTransportPtr {
    Arc::new(MemoryClientTransport { hub })
}

/// Create a server transport on the process-global hub.
pub fn create_memory_server_transport() -> ServerTransportPtr {
    create_memory_server_transport_with_hub(global_hub())
}

/// Create a server transport on the provided hub.
pub fn create_memory_server_transport_with_hub(hub: Arc<MemoryHub>) -> ServerTransportPtr {
    Arc::new(MemoryServerTransport {
        hub,
        bound: Mutex::new(None),
    })
}
