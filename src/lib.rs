//! Bidirectional RPC over persistent connections.
//!
//! One process (the [`RpcServer`]) accepts connections from many peers; each
//! peer (an [`RpcClient`]) can send fire-and-forget messages, issue blocking
//! request/response calls with timeouts, and subscribe to named broadcast
//! channels. The server can broadcast to all peers or to the subscribers of
//! a channel.
//!
//! The engine handles correlation-ID generation, request/response matching,
//! timeout handling, per-connection dispatch lanes, and subscription cleanup
//! on disconnect. The transport itself is pluggable behind the traits in the
//! domain layer; an in-memory reference transport is provided.

// Import all sub modules once...
mod client;
mod domain;
mod server;
mod transport;

mod rpc_config;

mod correlation;
mod error;
mod listeners;
mod message_future;
mod protocol;

mod macros;

#[allow(unused_imports)]
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::RpcClient;
pub use server::{RpcServer, SubscribeListener, UnsubscribeListener};

pub use rpc_config::RpcConfig;

pub use correlation::CorrelationId;
pub use error::{Error, Result};
pub use listeners::DisconnectListener;
pub use message_future::MessageFuture;

pub use transport::{
    //
    create_memory_client_transport,
    create_memory_client_transport_with_hub,
    create_memory_server_transport,
    create_memory_server_transport_with_hub,
    MemoryHub,
};

// --- public re-exports
pub use domain::{
    //
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

pub use protocol::{Frame, Payload, RemoteFault, Transmittable};
