// tests/integration.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use duplex_rpc::{
    // ---
    create_memory_client_transport_with_hub,
    create_memory_server_transport_with_hub,
    DisconnectListener,
    Error,
    MemoryHub,
    Result,
    RpcClient,
    RpcConfig,
    RpcServer,
    SubscribeListener,
    Transmittable,
    UnsubscribeListener,
};

const HOST: &str = "127.0.0.1";
const PORT: u16 = 6789;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
const SHORT_TIMEOUT: Duration = Duration::from_millis(50);

const HELLO: &str = "hello";
const MESSAGE_CHANNEL: &str = "channel";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimpleRequest {
    payload: String,
}

impl Transmittable for SimpleRequest {
    const KIND: &'static str = "simple-request";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimpleResponse {
    payload: String,
}

impl Transmittable for SimpleResponse {
    const KIND: &'static str = "simple-response";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Greeting {
    text: String,
}

impl Transmittable for Greeting {
    const KIND: &'static str = "greeting";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Unhandled {
    text: String,
}

impl Transmittable for Unhandled {
    const KIND: &'static str = "unhandled";
}

struct SubscribeLatch(mpsc::UnboundedSender<String>);

impl SubscribeListener for SubscribeLatch {
    fn on_subscribe(&self, _peer: &str, channel: &str) -> Result<()> {
        let _ = self.0.send(channel.to_string());
        Ok(())
    }
}

struct UnsubscribeLatch(mpsc::UnboundedSender<String>);

impl UnsubscribeListener for UnsubscribeLatch {
    fn on_unsubscribe(&self, _peer: &str, channel: &str) -> Result<()> {
        let _ = self.0.send(channel.to_string());
        Ok(())
    }
}

struct DisconnectLatch(mpsc::UnboundedSender<String>);

impl DisconnectListener for DisconnectLatch {
    fn on_disconnect(&self, peer: &str) -> Result<()> {
        let _ = self.0.send(peer.to_string());
        Ok(())
    }
}

struct Fixture {
    // ---
    server: RpcServer,
    client: RpcClient,
    subscribed: mpsc::UnboundedReceiver<String>,
    unsubscribed: mpsc::UnboundedReceiver<String>,
    client_disconnected: mpsc::UnboundedReceiver<String>,
}

/// Start a server and a connected client on a hub isolated to this test.
async fn setup() -> Fixture {
    // ---
    let hub = MemoryHub::new();

    let (subscribe_tx, subscribed) = mpsc::unbounded_channel();
    let (unsubscribe_tx, unsubscribed) = mpsc::unbounded_channel();
    let (disconnect_tx, client_disconnected) = mpsc::unbounded_channel();

    let server = RpcServer::new(create_memory_server_transport_with_hub(hub.clone()));
    server.add_subscribe_listener(SubscribeLatch(subscribe_tx));
    server.add_unsubscribe_listener(UnsubscribeLatch(unsubscribe_tx));
    server.start(HOST, PORT).await.expect("server failed to start");

    let client = RpcClient::new(
        create_memory_client_transport_with_hub(hub.clone()),
        RpcConfig::default(),
    );
    client.add_disconnect_listener(DisconnectLatch(disconnect_tx));
    client
        .start(HOST, PORT, CONNECT_TIMEOUT)
        .await
        .expect("client failed to start");

    await_admission(&server).await;

    Fixture {
        server,
        client,
        subscribed,
        unsubscribed,
        client_disconnected,
    }
}

/// Wait until the server has admitted at least one connection; admission
/// runs on the accept task, slightly after the client's connect returns.
async fn await_admission(server: &RpcServer) {
    // ---
    timeout(RECEIVE_TIMEOUT, async {
        while server.connection_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("timed out waiting for server to admit the connection");
}

async fn await_notification(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    // ---
    timeout(RECEIVE_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

#[tokio::test]
async fn broadcasting_to_all_clients_is_received_by_client() {
    // ---
    let fx = setup().await;

    let _ = fx.server.broadcast(&Greeting { text: HELLO.into() });

    let message = fx
        .client
        .await_message(RECEIVE_TIMEOUT)
        .await
        .expect("no broadcast received");
    assert_eq!(message.decode::<Greeting>().unwrap().text, HELLO);
}

#[tokio::test]
async fn broadcasting_on_unsubscribed_channel_is_not_received() {
    // ---
    let fx = setup().await;

    let _ = fx
        .server
        .broadcast_to_channel(&Greeting { text: HELLO.into() }, MESSAGE_CHANNEL);

    assert!(fx.client.await_message(SHORT_TIMEOUT).await.is_none());
}

#[tokio::test]
async fn broadcasting_on_subscribed_channel_is_received_by_client() {
    // ---
    let mut fx = setup().await;

    fx.client.subscribe(MESSAGE_CHANNEL).await.unwrap();
    assert_eq!(await_notification(&mut fx.subscribed).await, MESSAGE_CHANNEL);

    let _ = fx
        .server
        .broadcast_to_channel(&Greeting { text: HELLO.into() }, MESSAGE_CHANNEL);

    let message = fx
        .client
        .await_message(RECEIVE_TIMEOUT)
        .await
        .expect("no broadcast received");
    assert_eq!(message.decode::<Greeting>().unwrap().text, HELLO);
}

#[tokio::test]
async fn broadcast_returns_future_reporting_send_outcome() {
    // ---
    let mut fx = setup().await;

    fx.client.subscribe(MESSAGE_CHANNEL).await.unwrap();
    await_notification(&mut fx.subscribed).await;

    let delivered = fx
        .server
        .broadcast_to_channel(&Greeting { text: HELLO.into() }, MESSAGE_CHANNEL);
    assert!(delivered.is_success().await);
}

#[tokio::test]
async fn unsubscribing_stops_delivery_on_previously_subscribed_channel() {
    // ---
    let mut fx = setup().await;

    fx.client.subscribe(MESSAGE_CHANNEL).await.unwrap();
    fx.client.unsubscribe(MESSAGE_CHANNEL).await.unwrap();
    assert_eq!(
        await_notification(&mut fx.unsubscribed).await,
        MESSAGE_CHANNEL
    );

    let _ = fx
        .server
        .broadcast_to_channel(&Greeting { text: HELLO.into() }, MESSAGE_CHANNEL);

    assert!(fx.client.await_message(SHORT_TIMEOUT).await.is_none());
}

#[tokio::test]
async fn client_stopping_without_unsubscribing_is_tidied_up_server_side() {
    // ---
    let mut fx = setup().await;

    fx.client.subscribe(MESSAGE_CHANNEL).await.unwrap();
    assert_eq!(await_notification(&mut fx.subscribed).await, MESSAGE_CHANNEL);

    fx.client.stop().await;

    assert_eq!(
        await_notification(&mut fx.unsubscribed).await,
        MESSAGE_CHANNEL
    );
}

#[tokio::test]
async fn sending_async_invokes_handler_registered_for_the_message_type() {
    // ---
    let fx = setup().await;

    let (captured_tx, mut captured_rx) = mpsc::unbounded_channel::<SimpleRequest>();
    fx.server.register_async_handler(move |req: SimpleRequest| {
        let captured_tx = captured_tx.clone();
        async move {
            let _ = captured_tx.send(req);
            Ok(())
        }
    });

    fx.client
        .send_async(&SimpleRequest {
            payload: HELLO.into(),
        })
        .await
        .unwrap();

    let captured = timeout(RECEIVE_TIMEOUT, captured_rx.recv())
        .await
        .expect("handler was not invoked")
        .unwrap();
    assert_eq!(captured.payload, HELLO);
}

#[tokio::test]
async fn async_messages_of_one_type_are_handled_in_send_order() {
    // ---
    let fx = setup().await;

    let (captured_tx, mut captured_rx) = mpsc::unbounded_channel::<SimpleRequest>();
    fx.server.register_async_handler(move |req: SimpleRequest| {
        let captured_tx = captured_tx.clone();
        async move {
            let _ = captured_tx.send(req);
            Ok(())
        }
    });

    for i in 0..10 {
        fx.client
            .send_async(&SimpleRequest {
                payload: format!("message-{i}"),
            })
            .await
            .unwrap();
    }

    for i in 0..10 {
        let captured = timeout(RECEIVE_TIMEOUT, captured_rx.recv())
            .await
            .expect("handler missed a message")
            .unwrap();
        assert_eq!(captured.payload, format!("message-{i}"));
    }
}

#[tokio::test]
async fn sending_sync_invokes_handler_and_awaits_response() {
    // ---
    let fx = setup().await;

    fx.server.register_sync_handler(|req: SimpleRequest| async move {
        Ok(SimpleResponse {
            payload: req.payload,
        })
    });

    let response: SimpleResponse = fx
        .client
        .call_sync_with_timeout(
            &SimpleRequest {
                payload: HELLO.into(),
            },
            RECEIVE_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(response.payload, HELLO);
}

#[tokio::test]
async fn sync_call_correlates_the_correct_response() {
    // ---
    let fx = setup().await;

    fx.server.register_sync_handler(|req: SimpleRequest| async move {
        Ok(SimpleResponse {
            payload: req.payload,
        })
    });

    // Unsolicited noise on the same connection must not satisfy the call.
    let _ = fx.server.broadcast(&SimpleResponse {
        payload: "Not the answer you are looking for".into(),
    });

    let response: SimpleResponse = fx
        .client
        .call_sync_with_timeout(
            &SimpleRequest {
                payload: HELLO.into(),
            },
            RECEIVE_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(response.payload, HELLO);
}

#[tokio::test]
async fn handler_error_is_rethrown_in_the_client() {
    // ---
    let fx = setup().await;

    fx.server.register_sync_handler(|_req: SimpleRequest| async move {
        Err::<SimpleResponse, _>(Error::InvalidState("illegal handler state".into()))
    });

    let result = fx
        .client
        .call_sync_with_timeout::<SimpleRequest, SimpleResponse>(
            &SimpleRequest {
                payload: HELLO.into(),
            },
            RECEIVE_TIMEOUT,
        )
        .await;

    match result {
        Err(Error::Remote { kind, message }) => {
            assert_eq!(kind, "handler-error");
            assert!(message.contains("illegal handler state"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_sync_request_type_fails_the_caller_without_hanging() {
    // ---
    let fx = setup().await;

    let result = fx
        .client
        .call_sync_with_timeout::<Unhandled, SimpleResponse>(
            &Unhandled {
                text: HELLO.into(),
            },
            RECEIVE_TIMEOUT,
        )
        .await;

    match result {
        Err(Error::UnknownRequestType(kind)) => assert_eq!(kind, "unhandled"),
        other => panic!("expected unknown request type error, got {other:?}"),
    }
}

#[tokio::test]
async fn long_running_handler_times_out_the_caller() {
    // ---
    let fx = setup().await;

    fx.server.register_sync_handler(|req: SimpleRequest| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(SimpleResponse {
            payload: req.payload,
        })
    });

    let result = fx
        .client
        .call_sync_with_timeout::<SimpleRequest, SimpleResponse>(
            &SimpleRequest {
                payload: HELLO.into(),
            },
            Duration::from_millis(20),
        )
        .await;
    assert!(matches!(result, Err(Error::Timeout)));

    // The late response is discarded silently; the engine stays healthy and
    // a follow-up call (queued behind the slow one on the same lane) works.
    let response: SimpleResponse = fx
        .client
        .call_sync_with_timeout(
            &SimpleRequest {
                payload: HELLO.into(),
            },
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(response.payload, HELLO);
}

#[tokio::test]
async fn stopping_server_causes_disconnect_at_client() {
    // ---
    let mut fx = setup().await;

    fx.server.stop().await;

    await_notification(&mut fx.client_disconnected).await;
}

#[tokio::test]
async fn stopping_server_fails_outstanding_calls() {
    // ---
    let fx = setup().await;

    fx.server.register_sync_handler(|req: SimpleRequest| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(SimpleResponse {
            payload: req.payload,
        })
    });

    let client = fx.client.clone();
    let call = tokio::spawn(async move {
        client
            .call_sync_with_timeout::<SimpleRequest, SimpleResponse>(
                &SimpleRequest {
                    payload: HELLO.into(),
                },
                Duration::from_secs(10),
            )
            .await
    });

    // Give the request time to reach the server's lane before stopping.
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.server.stop().await;

    let result = timeout(RECEIVE_TIMEOUT, call)
        .await
        .expect("call did not unblock on disconnect")
        .unwrap();
    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn client_can_be_stopped_and_restarted() {
    // ---
    let fx = setup().await;

    fx.client.stop().await;
    fx.client
        .start(HOST, PORT, CONNECT_TIMEOUT)
        .await
        .expect("restart failed");
    await_admission(&fx.server).await;

    let _ = fx.server.broadcast(&Greeting { text: HELLO.into() });

    assert!(fx.client.await_message(RECEIVE_TIMEOUT).await.is_some());
}

#[tokio::test]
async fn starting_an_already_running_client_is_an_error() {
    // ---
    let fx = setup().await;

    let result = fx.client.start(HOST, PORT, CONNECT_TIMEOUT).await;
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn stopping_an_already_stopped_client_has_no_effect() {
    // ---
    let fx = setup().await;

    fx.client.stop().await;
    fx.client.stop().await;
}

#[tokio::test]
async fn awaiting_message_returns_none_if_timeout_expires_first() {
    // ---
    let fx = setup().await;

    assert!(fx.client.await_message(SHORT_TIMEOUT).await.is_none());
}

#[tokio::test]
async fn sending_on_a_stopped_client_is_an_invalid_state() {
    // ---
    let fx = setup().await;

    fx.client.stop().await;

    let result = fx
        .client
        .send_async(&Greeting { text: HELLO.into() })
        .await;
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn connecting_to_an_unbound_address_fails() {
    // ---
    let hub = MemoryHub::new();

    let client = RpcClient::new(
        create_memory_client_transport_with_hub(hub),
        RpcConfig::default(),
    );

    let result = client.start(HOST, PORT, CONNECT_TIMEOUT).await;
    assert!(matches!(result, Err(Error::Connect(_))));
}
