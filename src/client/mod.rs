// src/client/mod.rs
//! RPC client implementation.
//!
//! This module contains the [`RpcClient`] type: one persistent connection to
//! a server, carrying fire-and-forget sends, synchronous calls, channel
//! subscriptions, and inbound broadcast traffic.
//!
//! # Architecture
//!
//! `start()` opens a link through the configured transport and spawns a
//! background receive loop. Each synchronous call generates a correlation ID
//! and registers a oneshot slot in the pending map; when the matching
//! response arrives, the receive loop resolves the slot and the waiting call
//! unblocks. Unsolicited async messages are queued in the mailbox for
//! polling via `await_message`.
//!
//! # Concurrency
//!
//! Multiple calls can be in flight simultaneously; the caller's task blocks,
//! never the receive loop. When the connection closes — orderly stop or
//! transport failure, treated identically — every outstanding call fails
//! with `Error::ConnectionClosed` and the disconnect listeners fire once.

mod mailbox;
mod pending;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::domain::{ClientTransportPtr, LinkHandle, LinkPtr};
use crate::listeners::DisconnectListeners;
use crate::protocol::{Frame, Payload, RemoteFault, Transmittable};
use crate::{
    // ---
    log_debug,
    log_warn,
    CorrelationId,
    DisconnectListener,
    Error,
    Result,
    RpcConfig,
};

use mailbox::Mailbox;
use pending::PendingCalls;

/// RPC client for one server connection.
///
/// Cheap to clone (internally `Arc`-backed). The correlation store, mailbox,
/// and listener set are created once per client and survive stop/start
/// cycles; only the link and receive loop are per-session.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: ClientTransportPtr,
    config: RpcConfig,
    pending: Arc<PendingCalls>,
    mailbox: Arc<Mailbox>,
    disconnect_listeners: Arc<DisconnectListeners>,

    /// Start/stop transitions are serialized through this lock.
    state: tokio::sync::Mutex<State>,
}

enum State {
    Stopped,
    Running {
        link: LinkPtr,
        /// Best-effort receive loop handle. Kept so the task isn't dropped;
        /// the loop exits on its own when the link's inbound stream ends.
        _rx_task: JoinHandle<()>,
    },
}

impl RpcClient {
    // ---
    /// Create a client over an explicitly provided transport.
    pub fn new(transport: ClientTransportPtr, config: RpcConfig) -> Self {
        // ---
        let mailbox_capacity = config.mailbox_capacity;

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                pending: Arc::new(PendingCalls::new()),
                mailbox: Arc::new(Mailbox::new(mailbox_capacity)),
                disconnect_listeners: Arc::new(DisconnectListeners::new()),
                state: tokio::sync::Mutex::new(State::Stopped),
            }),
        }
    }

    /// Connect to the server and start the receive loop.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` if the client is already running
    /// - `Error::ConnectTimeout` if the connection does not complete in time
    /// - `Error::Connect` if the connection attempt fails outright
    pub async fn start(&self, host: &str, port: u16, connect_timeout: Duration) -> Result<()> {
        // ---
        let mut state = self.inner.state.lock().await;

        if matches!(*state, State::Running { .. }) {
            return Err(Error::InvalidState("client is already running".into()));
        }

        let LinkHandle { link, inbox } = self
            .inner
            .transport
            .connect(host, port, connect_timeout)
            .await?;

        let rx_task = Self::start_rx_task(
            inbox,
            self.inner.pending.clone(),
            self.inner.mailbox.clone(),
            self.inner.disconnect_listeners.clone(),
            link.peer_addr().to_string(),
        );

        *state = State::Running {
            link,
            _rx_task: rx_task,
        };
        Ok(())
    }

    /// Close the connection.
    ///
    /// Stopping an already-stopped client is a no-op. Outstanding calls fail
    /// with `Error::ConnectionClosed` once the receive loop observes the
    /// close.
    pub async fn stop(&self) {
        // ---
        let mut state = self.inner.state.lock().await;

        if let State::Running { link, .. } = std::mem::replace(&mut *state, State::Stopped) {
            let _ = link.close().await;
        }
    }

    /// Send a fire-and-forget message to the server.
    ///
    /// Resolves once the transport accepts or rejects the write; there is no
    /// application-level acknowledgement.
    pub async fn send_async<T: Transmittable>(&self, message: &T) -> Result<()> {
        // ---
        let link = self.running_link().await?;
        let payload = Payload::encode(message)?;
        link.send(Frame::Async { payload }).await
    }

    /// Send a synchronous request using the configured default timeout.
    pub async fn call_sync<TReq, TResp>(&self, request: &TReq) -> Result<TResp>
    where
        TReq: Transmittable,
        TResp: Transmittable,
    {
        self.call_sync_with_timeout(request, self.inner.config.call_timeout)
            .await
    }

    /// Send a synchronous request and await its response.
    ///
    /// Exactly one of three outcomes occurs: the correlated response arrives
    /// (success payload decoded, or the carried fault re-raised here), the
    /// timeout elapses, or the connection is torn down mid-call.
    ///
    /// # Errors
    ///
    /// - `Error::Timeout` — no response within `timeout`; the pending slot is
    ///   removed so a late response is discarded silently
    /// - `Error::UnknownRequestType` — the server has no handler for
    ///   `TReq::KIND`
    /// - `Error::Remote` — the server handler failed
    /// - `Error::ConnectionClosed` — the connection dropped mid-call
    /// - `Error::Serialization` — request encoding or response decoding failed
    pub async fn call_sync_with_timeout<TReq, TResp>(
        &self,
        request: &TReq,
        timeout: Duration,
    ) -> Result<TResp>
    where
        TReq: Transmittable,
        TResp: Transmittable,
    {
        // ---
        let link = self.running_link().await?;

        let payload = Payload::encode(request)?;
        let correlation_id = CorrelationId::generate();
        let response_rx = self.inner.pending.register(correlation_id.clone());

        let frame = Frame::Request {
            correlation_id: correlation_id.clone(),
            payload,
        };

        if let Err(err) = link.send(frame).await {
            self.inner.pending.remove(&correlation_id);
            return Err(err);
        }

        let outcome = match time::timeout(timeout, response_rx).await {
            Err(_) => {
                // The request is not retracted from the server; removing the
                // slot makes any late response a silent no-op.
                self.inner.pending.remove(&correlation_id);
                return Err(Error::Timeout);
            }
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Ok(Ok(outcome)) => outcome?,
        };

        outcome.decode()
    }

    /// Take the next unsolicited message, waiting up to `timeout`.
    ///
    /// Returns `None` when the timeout expires with nothing queued. Usable
    /// whether or not the client is currently connected.
    pub async fn await_message(&self, timeout: Duration) -> Option<Payload> {
        self.inner.mailbox.take(timeout).await
    }

    /// Subscribe this connection to a named broadcast channel.
    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        // ---
        let link = self.running_link().await?;
        link.send(Frame::Subscribe {
            channel: channel.to_string(),
        })
        .await
    }

    /// Unsubscribe this connection from a named broadcast channel.
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        // ---
        let link = self.running_link().await?;
        link.send(Frame::Unsubscribe {
            channel: channel.to_string(),
        })
        .await
    }

    /// Register a listener fired once when the connection closes.
    pub fn add_disconnect_listener(&self, listener: impl DisconnectListener + 'static) {
        self.inner.disconnect_listeners.add(Arc::new(listener));
    }

    async fn running_link(&self) -> Result<LinkPtr> {
        // ---
        match &*self.inner.state.lock().await {
            State::Running { link, .. } => Ok(link.clone()),
            State::Stopped => Err(Error::InvalidState("client is not running".into())),
        }
    }

    fn start_rx_task(
        mut inbox: tokio::sync::mpsc::Receiver<Frame>,
        pending: Arc<PendingCalls>,
        mailbox: Arc<Mailbox>,
        disconnect_listeners: Arc<DisconnectListeners>,
        peer: String,
    ) -> JoinHandle<()> {
        // ---
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                match frame {
                    Frame::Response {
                        correlation_id,
                        success,
                        payload,
                    } => {
                        let outcome = if success {
                            Ok(payload)
                        } else {
                            Err(remote_error(payload))
                        };

                        if !pending.complete(&correlation_id, outcome) {
                            log_debug!("discarding response for resolved call ({correlation_id})");
                        }
                    }
                    Frame::Async { payload } => mailbox.deliver(payload),
                    Frame::Request { .. } | Frame::Subscribe { .. } | Frame::Unsubscribe { .. } => {
                        log_warn!("dropping frame the client does not accept inbound");
                    }
                }
            }

            // Inbound stream ended: the connection is gone, however it died.
            pending.fail_all();
            disconnect_listeners.notify(&peer);
            log_debug!("connection to {peer} closed");
        })
    }
}

/// Reconstruct a client-side error from a failure response payload.
fn remote_error(payload: Payload) -> Error {
    // ---
    match payload.decode::<RemoteFault>() {
        Ok(fault) if fault.kind == RemoteFault::UNKNOWN_REQUEST_TYPE => {
            Error::UnknownRequestType(fault.message)
        }
        Ok(fault) => Error::Remote {
            kind: fault.kind,
            message: fault.message,
        },
        Err(err) => err,
    }
}
