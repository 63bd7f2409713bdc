// src/server/mod.rs
//! RPC server implementation.
//!
//! The [`RpcServer`] accepts connections through a server transport,
//! tracks the live set, routes inbound frames into per-connection dispatch
//! lanes, and fans broadcasts out to all peers or to a channel's
//! subscribers.
//!
//! # Connection lifecycle
//!
//! Each accepted connection gets a read task plus two dispatch lanes. The
//! read task routes frames by variant and never runs handler code itself,
//! so a slow handler cannot stall the connection's I/O. When the inbound
//! stream ends — orderly close or transport failure, treated identically —
//! the connection is retired: removed from the live set, stripped of its
//! subscriptions (firing one unsubscribe notification per channel), and
//! announced to disconnect listeners. Retirement is idempotent; the race
//! between an explicit stop and a transport-detected failure resolves to
//! whichever side wins the removal.

mod dispatcher;
mod subscriptions;

pub use subscriptions::{SubscribeListener, UnsubscribeListener};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::domain::{ConnectionId, IncomingLinks, LinkHandle, LinkPtr, ServerTransportPtr};
use crate::listeners::DisconnectListeners;
use crate::message_future::{Completion, MessageFuture};
use crate::protocol::{Frame, Payload, Transmittable};
use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    DisconnectListener,
    Error,
    Result,
};

use dispatcher::{DispatchLanes, HandlerRegistry};
use subscriptions::ChannelSubscriptions;

/// RPC server accepting many client connections.
///
/// Cheap to clone (internally `Arc`-backed). Handlers and listeners may be
/// registered before or after `start()`; registrations are process-wide and
/// survive stop/start cycles.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: ServerTransportPtr,
    registry: Arc<HandlerRegistry>,
    subscriptions: Arc<ChannelSubscriptions>,
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    disconnect_listeners: Arc<DisconnectListeners>,

    /// Start/stop transitions are serialized through this lock.
    state: tokio::sync::Mutex<State>,
}

enum State {
    Stopped,
    Running { accept_task: JoinHandle<()> },
}

struct ConnectionEntry {
    link: LinkPtr,
    lanes: DispatchLanes,
}

impl RpcServer {
    // ---
    /// Create a server over an explicitly provided transport.
    pub fn new(transport: ServerTransportPtr) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                registry: Arc::new(HandlerRegistry::new()),
                subscriptions: Arc::new(ChannelSubscriptions::new()),
                connections: Arc::new(DashMap::new()),
                disconnect_listeners: Arc::new(DisconnectListeners::new()),
                state: tokio::sync::Mutex::new(State::Stopped),
            }),
        }
    }

    /// Bind to an address and start accepting connections.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` if the server is already running
    /// - `Error::Connect` if the transport cannot bind the address
    pub async fn start(&self, host: &str, port: u16) -> Result<()> {
        // ---
        let mut state = self.inner.state.lock().await;

        if matches!(*state, State::Running { .. }) {
            return Err(Error::InvalidState("server is already running".into()));
        }

        let incoming = self.inner.transport.bind(host, port).await?;
        let accept_task = Self::start_accept_task(self.inner.clone(), incoming);

        *state = State::Running { accept_task };
        log_info!("server listening on {host}:{port}");
        Ok(())
    }

    /// Stop accepting connections and close every live connection.
    ///
    /// Each closed connection is retired exactly as if the peer had
    /// disconnected: subscriptions removed (with notifications) and
    /// disconnect listeners fired. Stopping twice is a no-op.
    pub async fn stop(&self) {
        // ---
        let mut state = self.inner.state.lock().await;

        match std::mem::replace(&mut *state, State::Stopped) {
            State::Stopped => {}
            State::Running { accept_task } => {
                let _ = self.inner.transport.close().await;
                accept_task.abort();

                let ids: Vec<ConnectionId> =
                    self.inner.connections.iter().map(|e| *e.key()).collect();

                for id in ids {
                    if let Some((_, entry)) = self.inner.connections.remove(&id) {
                        let peer = entry.link.peer_addr().to_string();
                        let _ = entry.link.close().await;
                        self.inner.subscriptions.unsubscribe_all(id, &peer);
                        self.inner.disconnect_listeners.notify(&peer);
                    }
                }
            }
        }
    }

    /// Broadcast a fire-and-forget message to every live connection.
    ///
    /// The returned future aggregates the per-connection send outcomes:
    /// success iff every send succeeds, otherwise the first error.
    pub fn broadcast<T: Transmittable>(&self, message: &T) -> MessageFuture {
        // ---
        let payload = match Payload::encode(message) {
            Ok(payload) => payload,
            Err(err) => return MessageFuture::ready(Err(err)),
        };

        let targets: Vec<LinkPtr> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.link.clone())
            .collect();

        Self::fan_out(targets, payload)
    }

    /// Broadcast a fire-and-forget message to the connections subscribed to
    /// a channel. A channel with no subscribers delivers to nobody and the
    /// future resolves successfully.
    pub fn broadcast_to_channel<T: Transmittable>(
        &self,
        message: &T,
        channel: &str,
    ) -> MessageFuture {
        // ---
        let payload = match Payload::encode(message) {
            Ok(payload) => payload,
            Err(err) => return MessageFuture::ready(Err(err)),
        };

        let targets: Vec<LinkPtr> = self
            .inner
            .subscriptions
            .subscribed_connections(channel)
            .into_iter()
            .filter_map(|id| self.inner.connections.get(&id).map(|e| e.link.clone()))
            .collect();

        Self::fan_out(targets, payload)
    }

    /// Send a fire-and-forget message to one connection.
    pub fn send_to<T: Transmittable>(&self, id: ConnectionId, message: &T) -> MessageFuture {
        // ---
        let payload = match Payload::encode(message) {
            Ok(payload) => payload,
            Err(err) => return MessageFuture::ready(Err(err)),
        };

        match self.inner.connections.get(&id).map(|e| e.link.clone()) {
            Some(link) => Self::fan_out(vec![link], payload),
            None => MessageFuture::ready(Err(Error::ConnectionClosed)),
        }
    }

    /// Register a fire-and-forget handler for `T::KIND`.
    ///
    /// At most one handler per kind; registering a kind again replaces the
    /// earlier handler.
    pub fn register_async_handler<T, F, Fut>(&self, handler: F)
    where
        T: Transmittable,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.inner.registry.register_async(handler);
    }

    /// Register a request handler for `TReq::KIND`.
    ///
    /// At most one handler per kind; registering a kind again replaces the
    /// earlier handler.
    pub fn register_sync_handler<TReq, TResp, F, Fut>(&self, handler: F)
    where
        TReq: Transmittable,
        TResp: Transmittable,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<TResp>> + Send + 'static,
    {
        self.inner.registry.register_sync(handler);
    }

    /// Register a listener fired on every channel subscription.
    pub fn add_subscribe_listener(&self, listener: impl SubscribeListener + 'static) {
        self.inner
            .subscriptions
            .add_subscribe_listener(Arc::new(listener));
    }

    /// Register a listener fired on every channel unsubscription, explicit
    /// or disconnect-driven.
    pub fn add_unsubscribe_listener(&self, listener: impl UnsubscribeListener + 'static) {
        self.inner
            .subscriptions
            .add_unsubscribe_listener(Arc::new(listener));
    }

    /// Register a listener fired once per retired connection.
    pub fn add_disconnect_listener(&self, listener: impl DisconnectListener + 'static) {
        self.inner.disconnect_listeners.add(Arc::new(listener));
    }

    /// Number of currently live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    fn start_accept_task(inner: Arc<Inner>, mut incoming: IncomingLinks) -> JoinHandle<()> {
        // ---
        tokio::spawn(async move {
            while let Some(handle) = incoming.recv().await {
                Self::admit(&inner, handle);
            }
            log_debug!("accept loop stopped");
        })
    }

    /// Wire up a newly accepted connection: live-set entry, dispatch lanes,
    /// and the read task.
    fn admit(inner: &Arc<Inner>, handle: LinkHandle) {
        // ---
        let LinkHandle { link, mut inbox } = handle;
        let id = link.id();
        let peer = link.peer_addr().to_string();

        let lanes = DispatchLanes::spawn(inner.registry.clone(), link.clone());
        inner.connections.insert(id, ConnectionEntry { link, lanes });
        log_info!("{id} connected from {peer}");

        let inner = inner.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                match frame {
                    Frame::Async { payload } => {
                        if let Some(entry) = inner.connections.get(&id) {
                            entry.lanes.submit_async(payload);
                        }
                    }
                    Frame::Request {
                        correlation_id,
                        payload,
                    } => {
                        if let Some(entry) = inner.connections.get(&id) {
                            entry.lanes.submit_sync(correlation_id, payload);
                        }
                    }
                    Frame::Subscribe { channel } => {
                        inner.subscriptions.subscribe(id, &peer, &channel);
                    }
                    Frame::Unsubscribe { channel } => {
                        inner.subscriptions.unsubscribe(id, &peer, &channel);
                    }
                    Frame::Response { .. } => {
                        log_warn!("dropping unexpected response frame from {peer}");
                    }
                }
            }

            Self::retire(&inner, id, &peer);
        });
    }

    /// Retire a connection. Idempotent: only the caller that wins the
    /// removal runs cleanup, so the stop/disconnect race cannot double-fire
    /// listeners.
    fn retire(inner: &Inner, id: ConnectionId, peer: &str) {
        // ---
        if inner.connections.remove(&id).is_some() {
            inner.subscriptions.unsubscribe_all(id, peer);
            inner.disconnect_listeners.notify(peer);
            log_info!("{id} ({peer}) disconnected");
        }
    }

    /// Send one payload to every target, resolving the returned future with
    /// the aggregated outcome.
    fn fan_out(targets: Vec<LinkPtr>, payload: Payload) -> MessageFuture {
        // ---
        let (completion, future) = MessageFuture::pair();

        tokio::spawn(async move {
            Self::run_fan_out(targets, payload, completion).await;
        });

        future
    }

    async fn run_fan_out(targets: Vec<LinkPtr>, payload: Payload, completion: Completion) {
        // ---
        let mut outcome = Ok(());

        for link in targets {
            let frame = Frame::Async {
                payload: payload.clone(),
            };

            if let Err(err) = link.send(frame).await {
                log_warn!("broadcast send to {} failed: {err}", link.peer_addr());
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }

        completion.resolve(outcome);
    }
}
