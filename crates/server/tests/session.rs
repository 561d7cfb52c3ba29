//! End-to-end session tests over a real WebSocket connection.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use protocol::BatchUpdate;
use server::Config;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let mut config = Config::default();
    config.server.workers = 2;
    tokio::spawn(async move {
        let _ = server::serve(listener, config).await;
    });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("connect");
    socket
}

/// Wait for the next text frame, skipping interleaved batch updates.
async fn next_text(socket: &mut Socket) -> serde_json::Value {
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        while let Some(message) = socket.next().await {
            if let Message::Text(text) = message.expect("frame") {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
        }
        panic!("connection closed before a text frame arrived");
    })
    .await
    .expect("timed out waiting for a text frame")
}

/// Wait for the next batch update, skipping text frames.
async fn next_batch(socket: &mut Socket) -> BatchUpdate {
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        while let Some(message) = socket.next().await {
            if let Message::Binary(bytes) = message.expect("frame") {
                return BatchUpdate::decode(&bytes).expect("batch frame");
            }
        }
        panic!("connection closed before a batch arrived");
    })
    .await
    .expect("timed out waiting for a batch frame")
}

#[tokio::test]
async fn ping_pong_round_trip() {
    let addr = start_server().await;
    let mut socket = connect(addr).await;

    socket
        .send(Message::text(
            json!({"type": "ping", "clientTime": 1000}).to_string(),
        ))
        .await
        .expect("send ping");

    let pong = next_text(&mut socket).await;
    assert_eq!(pong["messageType"], "pong");
    assert_eq!(pong["clientTime"], 1000);
    assert!(pong["serverTime"].as_i64().expect("serverTime") > 0);
}

#[tokio::test]
async fn join_streams_batches_without_self() {
    let addr = start_server().await;
    let mut socket = connect(addr).await;

    socket
        .send(Message::text(
            json!({"type": "join", "id": "A", "username": "alice",
                   "position": {"x": 200.0, "y": 200.0}})
            .to_string(),
        ))
        .await
        .expect("send join");

    // batches arrive every player tick; none may echo the player back
    for _ in 0..3 {
        let batch = next_batch(&mut socket).await;
        assert_eq!(batch.message_type, "batch_update");
        assert!(batch.updates.iter().all(|u| u.id != "A"));
    }
}

#[tokio::test]
async fn two_connections_see_each_other() {
    let addr = start_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    alice
        .send(Message::text(
            json!({"type": "join", "id": "A", "position": {"x": 200.0, "y": 200.0}}).to_string(),
        ))
        .await
        .expect("join A");
    bob.send(Message::text(
        json!({"type": "join", "id": "B", "position": {"x": 250.0, "y": 200.0}}).to_string(),
    ))
    .await
    .expect("join B");

    // connections land on different workers; each must still observe the
    // other through the shared grid within a few ticks
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            let batch = next_batch(&mut alice).await;
            if let Some(b) = batch.updates.iter().find(|u| u.id == "B") {
                assert!((b.position.x - 250.0).abs() < 1.0);
                assert!((b.position.y - 200.0).abs() < 1.0);
                break;
            }
        }
    })
    .await
    .expect("alice never saw bob");

    tokio::time::timeout(deadline, async {
        loop {
            let batch = next_batch(&mut bob).await;
            if let Some(a) = batch.updates.iter().find(|u| u.id == "A") {
                assert!((a.position.x - 200.0).abs() < 1.0);
                break;
            }
        }
    })
    .await
    .expect("bob never saw alice");
}
