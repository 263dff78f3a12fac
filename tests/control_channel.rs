//! Control channel tests against a local WebSocket controller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use upstream_relay::config::ControlConfig;
use upstream_relay::control::{ChannelEvent, ConnectionState, ControlChannel, OutboundMessage, Outbox};
use upstream_relay::dispatcher::Dispatcher;
use upstream_relay::lifecycle::Shutdown;
use upstream_relay::operations::OperationRegistry;
use upstream_relay::relay::ResponseRelay;
use upstream_relay::upstream::{HttpUpstream, RequestExecutor};

mod common;
use common::{start_message, start_mock_backend, upstream_config, MockResponse};

const WAIT: Duration = Duration::from_secs(5);

type Controller = WebSocketStream<TcpStream>;

/// Accepts WebSocket connections and hands each one to the test.
async fn start_controller() -> (SocketAddr, mpsc::UnboundedReceiver<Controller>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(socket).await {
                if tx.send(ws).is_err() {
                    break;
                }
            }
        }
    });

    (addr, rx)
}

fn control_config(addr: SocketAddr) -> ControlConfig {
    ControlConfig {
        endpoint: format!("ws://{addr}"),
        reconnect_delay_ms: 50,
        connect_retry_delay_ms: 50,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("event stream ended")
}

async fn next_text(controller: &mut Controller) -> String {
    loop {
        let frame = tokio::time::timeout(WAIT, controller.next())
            .await
            .expect("timed out waiting for relay frame")
            .expect("relay closed the socket")
            .unwrap();
        if let Message::Text(text) = frame {
            return text.to_string();
        }
    }
}

#[tokio::test]
async fn test_connect_receive_and_send() {
    let (addr, mut accepted) = start_controller().await;
    let (channel, mut events) = ControlChannel::new(control_config(addr));

    channel.connect().await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Connected);
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);

    let mut controller = accepted.recv().await.unwrap();
    controller.send(Message::Text("hello relay".into())).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Message("hello relay".to_string())
    );

    let message = OutboundMessage::StreamClose {
        request_id: "op-1".into(),
    };
    assert!(channel.transmit(&message));
    let text = next_text(&mut controller).await;
    let decoded: OutboundMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, message);

    channel.close();
}

#[tokio::test]
async fn test_send_while_disconnected_fails() {
    let (channel, _events) = ControlChannel::new(control_config("127.0.0.1:9".parse().unwrap()));
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(!channel.send(&OutboundMessage::StreamClose {
        request_id: "op-1".into(),
    }));
}

#[tokio::test]
async fn test_reconnects_after_controller_drop() {
    let (addr, mut accepted) = start_controller().await;
    let (channel, mut events) = ControlChannel::new(control_config(addr));

    channel.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);

    let controller = accepted.recv().await.unwrap();
    drop(controller);

    assert_eq!(next_event(&mut events).await, ChannelEvent::Disconnected);
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    assert_eq!(channel.state(), ConnectionState::Connected);
    assert_eq!(channel.reconnect_attempts(), 0);

    let mut controller = tokio::time::timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    assert!(channel.send(&OutboundMessage::StreamClose {
        request_id: "op-2".into(),
    }));
    assert!(next_text(&mut controller).await.contains("stream_close"));

    channel.close();
}

#[tokio::test]
async fn test_establish_waits_for_controller() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (channel, mut events) = ControlChannel::new(control_config(addr));
    let connecting = channel.clone();
    let establish = tokio::spawn(async move { connecting.establish().await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_ne!(channel.state(), ConnectionState::Connected);

    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            let _ws = tokio_tungstenite::accept_async(socket).await;
            tokio::time::sleep(WAIT).await;
        }
    });

    tokio::time::timeout(WAIT, establish).await.unwrap().unwrap().unwrap();
    assert_eq!(next_event(&mut events).await, ChannelEvent::Connected);
    channel.close();
}

#[tokio::test]
async fn test_close_stops_establish() {
    let (channel, _events) = ControlChannel::new(control_config("127.0.0.1:9".parse().unwrap()));
    let connecting = channel.clone();
    let establish = tokio::spawn(async move { connecting.establish().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    channel.close();
    let result = tokio::time::timeout(WAIT, establish).await.unwrap().unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_full_relay_over_websocket() {
    let backend = start_mock_backend(MockResponse::chunked(
        "text/event-stream",
        &["data: one\n\n", "data: two\n\n"],
        Duration::from_millis(20),
    ))
    .await;
    let (addr, mut accepted) = start_controller().await;
    let (channel, events) = ControlChannel::new(control_config(addr));
    let outbox: Arc<dyn Outbox> = Arc::new(channel.clone());

    let client = Arc::new(HttpUpstream::new().unwrap());
    let executor = RequestExecutor::new(client, &upstream_config(&backend.base_url())).unwrap();
    let relay = ResponseRelay::new(outbox.clone(), &Default::default());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(OperationRegistry::new()),
        executor,
        relay,
        outbox,
    ));

    let shutdown = Shutdown::new();
    let run = tokio::spawn(dispatcher.clone().run(events, shutdown.subscribe()));
    channel.connect().await.unwrap();
    let mut controller = accepted.recv().await.unwrap();

    let start = start_message("op-ws", "POST", "/v1beta/models/x:streamGenerateContent", "real");
    controller.send(Message::Text(start.into())).await.unwrap();

    let mut received = Vec::new();
    loop {
        let message: OutboundMessage = serde_json::from_str(&next_text(&mut controller).await).unwrap();
        let done = message.is_terminal();
        received.push(message);
        if done {
            break;
        }
    }

    let chunks: Vec<_> = received
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::Chunk { data, .. } => Some(data.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["data: one\n", "\n", "data: two\n", "\n"]);
    assert!(matches!(received.first(), Some(OutboundMessage::ResponseHeaders { status: 200, .. })));
    assert!(matches!(received.last(), Some(OutboundMessage::StreamClose { .. })));

    shutdown.trigger();
    channel.close();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
}
