//! Typed handler registries and per-connection dispatch lanes.
//!
//! Handlers are registered per payload kind through generic functions that
//! preserve the request/response type pairing at the call site; internally
//! they are stored type-erased. Each connection gets two lanes — one for
//! fire-and-forget traffic, one for request/response traffic — each drained
//! by a single worker task, so per-connection, per-traffic-class ordering is
//! preserved and a slow handler only delays later messages of the same class
//! on the same connection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::correlation::CorrelationId;
use crate::domain::LinkPtr;
use crate::protocol::{Frame, Payload, RemoteFault, Transmittable};
use crate::{log_debug, log_warn, Result};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased fire-and-forget handler: payload in, nothing out.
type AsyncHandler = Arc<dyn Fn(Payload) -> BoxFuture<Result<()>> + Send + Sync>;

/// Type-erased request handler: payload in, response payload out.
type SyncHandler = Arc<dyn Fn(Payload) -> BoxFuture<Result<Payload>> + Send + Sync>;

/// Registry of handlers keyed by payload kind.
///
/// Shared by every connection of a server. At most one handler per kind per
/// traffic class; registering a kind again replaces the earlier handler.
pub(crate) struct HandlerRegistry {
    // ---
    async_handlers: DashMap<String, AsyncHandler>,
    sync_handlers: DashMap<String, SyncHandler>,
}

impl HandlerRegistry {
    // ---
    pub fn new() -> Self {
        Self {
            async_handlers: DashMap::new(),
            sync_handlers: DashMap::new(),
        }
    }

    /// Register a fire-and-forget handler for `T::KIND`.
    pub fn register_async<T, F, Fut>(&self, handler: F)
    where
        T: Transmittable,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // ---
        let handler = Arc::new(handler);

        let wrapped: AsyncHandler = Arc::new(move |payload: Payload| {
            let handler = handler.clone();
            let fut = Box::pin(async move {
                let message: T = payload.decode()?;
                (*handler)(message).await
            });
            fut as BoxFuture<Result<()>>
        });

        self.async_handlers.insert(T::KIND.to_string(), wrapped);
    }

    /// Register a request handler for `TReq::KIND`.
    pub fn register_sync<TReq, TResp, F, Fut>(&self, handler: F)
    where
        TReq: Transmittable,
        TResp: Transmittable,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        // ---
        let handler = Arc::new(handler);

        let wrapped: SyncHandler = Arc::new(move |payload: Payload| {
            let handler = handler.clone();
            let fut = Box::pin(async move {
                let request: TReq = payload.decode()?;
                let response = (*handler)(request).await?;
                Payload::encode(&response)
            });
            fut as BoxFuture<Result<Payload>>
        });

        self.sync_handlers.insert(TReq::KIND.to_string(), wrapped);
    }

    /// Run the fire-and-forget handler for a payload, if one is registered.
    ///
    /// Handler errors are logged and swallowed — there is no caller to
    /// report them to. A payload with no handler is simply dropped.
    async fn dispatch_async(&self, payload: Payload) {
        // ---
        let handler = self.async_handlers.get(&payload.kind).map(|h| h.clone());

        match handler {
            Some(handler) => {
                let _kind = payload.kind.clone();
                if let Err(_err) = (*handler)(payload).await {
                    log_warn!("async handler for [{_kind}] failed: {_err}");
                }
            }
            None => log_debug!("no async handler for [{}], dropping", payload.kind),
        }
    }

    /// Run the request handler for a payload and build the response frame.
    ///
    /// Always produces exactly one response per request, correlated by the
    /// request's ID: the handler result on success, or a fault describing a
    /// missing handler or a handler failure.
    async fn dispatch_sync(&self, correlation_id: CorrelationId, payload: Payload) -> Frame {
        // ---
        let kind = payload.kind.clone();
        let handler = self.sync_handlers.get(&kind).map(|h| h.clone());

        let outcome = match handler {
            None => Err(RemoteFault::unknown_request_type(&kind)),
            Some(handler) => (*handler)(payload)
                .await
                .map_err(|err| RemoteFault::handler_error(&err)),
        };

        match outcome {
            Ok(payload) => Frame::Response {
                correlation_id,
                success: true,
                payload,
            },
            Err(fault) => {
                log_debug!("request [{kind}] failed: [{}] {}", fault.kind, fault.message);
                Frame::Response {
                    correlation_id,
                    success: false,
                    payload: fault.into(),
                }
            }
        }
    }
}

/// The two dispatch lanes of one connection.
///
/// Lane queues are unbounded: a slow handler backs up its own lane only; a
/// bounded queue could fill and block the connection's read task, which is
/// never allowed. Dropping the lanes ends both workers once they drain.
pub(crate) struct DispatchLanes {
    async_tx: mpsc::UnboundedSender<Payload>,
    sync_tx: mpsc::UnboundedSender<(CorrelationId, Payload)>,
}

impl DispatchLanes {
    // ---
    /// Spawn the two lane workers for a connection.
    pub fn spawn(registry: Arc<HandlerRegistry>, link: LinkPtr) -> Self {
        // ---
        let (async_tx, mut async_rx) = mpsc::unbounded_channel::<Payload>();
        {
            let registry = registry.clone();
            tokio::spawn(async move {
                while let Some(payload) = async_rx.recv().await {
                    registry.dispatch_async(payload).await;
                }
            });
        }

        let (sync_tx, mut sync_rx) = mpsc::unbounded_channel::<(CorrelationId, Payload)>();
        tokio::spawn(async move {
            while let Some((correlation_id, payload)) = sync_rx.recv().await {
                let response = registry.dispatch_sync(correlation_id, payload).await;
                if let Err(_err) = link.send(response).await {
                    log_warn!("failed to send response to {}: {_err}", link.peer_addr());
                }
            }
        });

        Self { async_tx, sync_tx }
    }

    pub fn submit_async(&self, payload: Payload) {
        // Send fails only once the worker is gone, i.e. the connection is
        // already being torn down.
        let _ = self.async_tx.send(payload);
    }

    pub fn submit_sync(&self, correlation_id: CorrelationId, payload: Payload) {
        // ---
        let _ = self.sync_tx.send((correlation_id, payload));
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Error;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        text: String,
    }

    impl Transmittable for Ping {
        const KIND: &'static str = "ping";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong {
        text: String,
    }

    impl Transmittable for Pong {
        const KIND: &'static str = "pong";
    }

    #[tokio::test]
    async fn test_sync_dispatch_success() {
        // ---
        let registry = HandlerRegistry::new();
        registry.register_sync(|req: Ping| async move { Ok(Pong { text: req.text }) });

        let payload = Payload::encode(&Ping {
            text: "hello".into(),
        })
        .unwrap();

        let frame = registry
            .dispatch_sync(CorrelationId::generate(), payload)
            .await;

        match frame {
            Frame::Response {
                success, payload, ..
            } => {
                assert!(success);
                assert_eq!(payload.decode::<Pong>().unwrap().text, "hello");
            }
            other => panic!("expected response frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sync_dispatch_without_handler_builds_fault() {
        // ---
        let registry = HandlerRegistry::new();

        let payload = Payload::encode(&Ping {
            text: "hello".into(),
        })
        .unwrap();

        let frame = registry
            .dispatch_sync(CorrelationId::generate(), payload)
            .await;

        match frame {
            Frame::Response {
                success, payload, ..
            } => {
                assert!(!success);
                let fault: RemoteFault = payload.decode().unwrap();
                assert_eq!(fault.kind, RemoteFault::UNKNOWN_REQUEST_TYPE);
                assert_eq!(fault.message, "ping");
            }
            other => panic!("expected response frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sync_dispatch_converts_handler_error_to_fault() {
        // ---
        let registry = HandlerRegistry::new();
        registry.register_sync(|_req: Ping| async move {
            Err::<Pong, _>(Error::InvalidState("handler blew up".into()))
        });

        let payload = Payload::encode(&Ping {
            text: "hello".into(),
        })
        .unwrap();

        let frame = registry
            .dispatch_sync(CorrelationId::generate(), payload)
            .await;

        match frame {
            Frame::Response {
                success, payload, ..
            } => {
                assert!(!success);
                let fault: RemoteFault = payload.decode().unwrap();
                assert_eq!(fault.kind, RemoteFault::HANDLER_ERROR);
                assert!(fault.message.contains("handler blew up"));
            }
            other => panic!("expected response frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registering_same_kind_twice_replaces_the_handler() {
        // ---
        let registry = HandlerRegistry::new();
        registry.register_sync(|_req: Ping| async move {
            Ok(Pong {
                text: "first".into(),
            })
        });
        registry.register_sync(|_req: Ping| async move {
            Ok(Pong {
                text: "second".into(),
            })
        });

        let payload = Payload::encode(&Ping {
            text: "hello".into(),
        })
        .unwrap();

        let frame = registry
            .dispatch_sync(CorrelationId::generate(), payload)
            .await;

        match frame {
            Frame::Response { payload, .. } => {
                assert_eq!(payload.decode::<Pong>().unwrap().text, "second");
            }
            other => panic!("expected response frame, got {other:?}"),
        }
    }
}
