//! Integration tests for the Meshcall signaling server
//!
//! Each test boots the hub on a random port and drives it with real
//! WebSocket clients.
//!
//! Run with: cargo test -p meshcall-server --test integration_tests

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meshcall_protocol::{CandidateData, Envelope, OfferData, Payload, StartCallData, CODE_NAME_TAKEN};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: std::net::SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let config = meshcall_server::state::Config {
            bind_address: "127.0.0.1:0".to_string(),
        };

        let router = meshcall_server::create_app(config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn connect(ws_url: &str) -> anyhow::Result<WsStream> {
    let (ws_stream, _) = connect_async(ws_url).await?;
    Ok(ws_stream)
}

async fn send_envelope(stream: &mut WsStream, envelope: &Envelope) -> anyhow::Result<()> {
    let json = serde_json::to_string(envelope)?;
    stream.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn recv_envelope(stream: &mut WsStream) -> anyhow::Result<Envelope> {
    loop {
        let msg = timeout(Duration::from_secs(5), stream.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream ended"))??;

        match msg {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("unexpected frame: {:?}", other),
        }
    }
}

async fn expect_silence(stream: &mut WsStream) {
    let result = timeout(Duration::from_millis(300), stream.next()).await;
    assert!(result.is_err(), "expected no envelope, got {:?}", result);
}

async fn join(stream: &mut WsStream, username: &str, room: &str) -> anyhow::Result<()> {
    send_envelope(
        stream,
        &Envelope::ok(
            Payload::StartCall(StartCallData {
                username: username.into(),
                meeting_id: room.into(),
                audio: true,
                video: true,
            }),
            "start-call",
        ),
    )
    .await
}

fn roster_names(envelope: &Envelope) -> Vec<String> {
    match &envelope.payload {
        Payload::Users(data) => data.users.iter().map(|u| u.username.clone()).collect(),
        other => panic!("expected users envelope, got {:?}", other),
    }
}

#[tokio::test]
async fn joins_broadcast_rosters_in_join_order() {
    let server = TestServer::start().await.unwrap();

    let mut alice = connect(&server.ws_url()).await.unwrap();
    let mut bob = connect(&server.ws_url()).await.unwrap();
    let mut carol = connect(&server.ws_url()).await.unwrap();

    join(&mut alice, "alice", "42").await.unwrap();
    assert_eq!(roster_names(&recv_envelope(&mut alice).await.unwrap()), ["alice"]);

    join(&mut bob, "bob", "42").await.unwrap();
    assert_eq!(
        roster_names(&recv_envelope(&mut alice).await.unwrap()),
        ["alice", "bob"]
    );
    assert_eq!(
        roster_names(&recv_envelope(&mut bob).await.unwrap()),
        ["alice", "bob"]
    );

    join(&mut carol, "carol", "42").await.unwrap();
    for stream in [&mut alice, &mut bob, &mut carol] {
        assert_eq!(
            roster_names(&recv_envelope(stream).await.unwrap()),
            ["alice", "bob", "carol"]
        );
    }
}

#[tokio::test]
async fn duplicate_name_gets_code_300_and_no_broadcast() {
    let server = TestServer::start().await.unwrap();

    let mut alice = connect(&server.ws_url()).await.unwrap();
    join(&mut alice, "alice", "42").await.unwrap();
    recv_envelope(&mut alice).await.unwrap();

    let mut impostor = connect(&server.ws_url()).await.unwrap();
    join(&mut impostor, "alice", "42").await.unwrap();

    let rejection = recv_envelope(&mut impostor).await.unwrap();
    assert_eq!(rejection.code, CODE_NAME_TAKEN);
    assert!(matches!(rejection.payload, Payload::CallState(_)));

    // No roster update reaches the existing member.
    expect_silence(&mut alice).await;

    // The impostor can still join under a free name; roster is [alice, bob].
    join(&mut impostor, "bob", "42").await.unwrap();
    assert_eq!(
        roster_names(&recv_envelope(&mut impostor).await.unwrap()),
        ["alice", "bob"]
    );
}

#[tokio::test]
async fn offer_and_candidate_are_relayed_to_target_only() {
    let server = TestServer::start().await.unwrap();

    let mut alice = connect(&server.ws_url()).await.unwrap();
    let mut bob = connect(&server.ws_url()).await.unwrap();

    join(&mut alice, "alice", "42").await.unwrap();
    recv_envelope(&mut alice).await.unwrap();
    join(&mut bob, "bob", "42").await.unwrap();
    recv_envelope(&mut alice).await.unwrap();
    recv_envelope(&mut bob).await.unwrap();

    send_envelope(
        &mut alice,
        &Envelope::ok(
            Payload::Offer(OfferData {
                offer: json!({ "type": "offer", "sdp": "v=0" }),
                connected_name: "bob".into(),
                call_name: "alice".into(),
                meeting_id: "42".into(),
            }),
            "offer",
        ),
    )
    .await
    .unwrap();

    let relayed = recv_envelope(&mut bob).await.unwrap();
    match relayed.payload {
        Payload::Offer(data) => {
            assert_eq!(data.call_name, "alice");
            assert_eq!(data.offer["sdp"], "v=0");
        }
        other => panic!("expected offer, got {:?}", other),
    }

    send_envelope(
        &mut bob,
        &Envelope::ok(
            Payload::Candidate(CandidateData {
                candidate: json!({ "candidate": "candidate:1", "sdpMid": "0" }),
                connected_name: "alice".into(),
                call_name: "bob".into(),
                meeting_id: "42".into(),
            }),
            "candidate",
        ),
    )
    .await
    .unwrap();

    let relayed = recv_envelope(&mut alice).await.unwrap();
    match relayed.payload {
        Payload::Candidate(data) => assert_eq!(data.call_name, "bob"),
        other => panic!("expected candidate, got {:?}", other),
    }
}

#[tokio::test]
async fn candidate_to_absent_target_is_dropped_without_error() {
    let server = TestServer::start().await.unwrap();

    let mut alice = connect(&server.ws_url()).await.unwrap();
    join(&mut alice, "alice", "42").await.unwrap();
    recv_envelope(&mut alice).await.unwrap();

    send_envelope(
        &mut alice,
        &Envelope::ok(
            Payload::Candidate(CandidateData {
                candidate: json!({ "candidate": "candidate:1" }),
                connected_name: "ghost".into(),
                call_name: "alice".into(),
                meeting_id: "42".into(),
            }),
            "candidate",
        ),
    )
    .await
    .unwrap();

    expect_silence(&mut alice).await;

    // The room is intact: a second participant still sees [alice, bob].
    let mut bob = connect(&server.ws_url()).await.unwrap();
    join(&mut bob, "bob", "42").await.unwrap();
    assert_eq!(
        roster_names(&recv_envelope(&mut bob).await.unwrap()),
        ["alice", "bob"]
    );
}

#[tokio::test]
async fn disconnect_broadcasts_remaining_roster() {
    let server = TestServer::start().await.unwrap();

    let mut alice = connect(&server.ws_url()).await.unwrap();
    let mut bob = connect(&server.ws_url()).await.unwrap();

    join(&mut alice, "alice", "42").await.unwrap();
    recv_envelope(&mut alice).await.unwrap();
    join(&mut bob, "bob", "42").await.unwrap();
    recv_envelope(&mut alice).await.unwrap();
    recv_envelope(&mut bob).await.unwrap();

    alice.close(None).await.unwrap();

    assert_eq!(roster_names(&recv_envelope(&mut bob).await.unwrap()), ["bob"]);
}

#[tokio::test]
async fn room_identifier_is_reusable_after_everyone_leaves() {
    let server = TestServer::start().await.unwrap();

    let mut alice = connect(&server.ws_url()).await.unwrap();
    join(&mut alice, "alice", "42").await.unwrap();
    recv_envelope(&mut alice).await.unwrap();
    alice.close(None).await.unwrap();

    // Give the server a moment to tear the room down.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut bob = connect(&server.ws_url()).await.unwrap();
    join(&mut bob, "alice", "42").await.unwrap();
    assert_eq!(roster_names(&recv_envelope(&mut bob).await.unwrap()), ["alice"]);
}
