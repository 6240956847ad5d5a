//! Integration tests for WebSocket walk-event streaming.
//!
//! These tests validate connection handling, the events published while
//! interactions are walked, and concurrent client support.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;
use tutor_orchestrator::events::WalkCompletedPayload;
use tutor_orchestrator::{
    create_router, AppState, Config, Context, MemoryStore, Node, Orchestrator, WalkEvent,
};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the test server and returns its base address.
async fn spawn_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let ctx = Context::new(Arc::new(Config::default()), Arc::new(MemoryStore::new()));
    let router = create_router(AppState::new(Orchestrator::new(ctx)));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, handle)
}

/// Connects a WebSocket client and consumes its connected event.
async fn connect_client(addr: &str) -> WsClient {
    let (mut ws_stream, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect to WebSocket");
    let event = receive_event(&mut ws_stream).await;
    assert!(
        matches!(event, WalkEvent::Connected(_)),
        "Expected Connected event, got: {event:?}"
    );
    // The server subscribes right after sending the connected event.
    tokio::time::sleep(Duration::from_millis(20)).await;
    ws_stream
}

/// Posts an interaction and returns the response body.
async fn post_interaction(addr: &str, body: Value) -> Value {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/interactions"))
        .json(&body)
        .send()
        .await
        .expect("Failed to send HTTP request")
        .json()
        .await
        .expect("Invalid JSON response")
}

/// Receives the next text message from the WebSocket and parses it as a
/// `WalkEvent`. Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> WalkEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Collects the events of one walk, up to and including `walk_completed`.
async fn receive_walk(client: &mut WsClient) -> (Vec<WalkEvent>, WalkCompletedPayload) {
    let mut events = Vec::new();
    loop {
        match receive_event(client).await {
            WalkEvent::WalkCompleted(payload) => return (events, payload),
            event => events.push(event),
        }
    }
}

fn entered_nodes(events: &[WalkEvent]) -> Vec<Node> {
    events
        .iter()
        .filter_map(|event| match event {
            WalkEvent::NodeEntered(payload) => Some(payload.node),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Connection Tests
// ============================================================================

/// Tests that a WebSocket client receives the service status on connection.
#[tokio::test]
async fn test_client_receives_connected_event_on_connect() {
    let (addr, _handle) = spawn_test_server().await;

    let (mut client, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect to WebSocket");
    let event = receive_event(&mut client).await;

    if let WalkEvent::Connected(payload) = event {
        assert_eq!(payload.status.status, "running");
        assert_eq!(payload.status.active_speaking_sessions, 0);
    } else {
        panic!("Expected Connected event, got: {event:?}");
    }
}

/// Tests that multiple clients can connect concurrently.
#[tokio::test]
async fn test_multiple_clients_can_connect() {
    let (addr, _handle) = spawn_test_server().await;

    let _client1 = connect_client(&addr).await;
    let _client2 = connect_client(&addr).await;
    let _client3 = connect_client(&addr).await;

    let status: Value = reqwest::get(format!("http://{addr}/api/status"))
        .await
        .expect("Failed to get status")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(status["eventSubscribers"], 3);
}

// ============================================================================
// Walk Event Tests
// ============================================================================

/// Tests the event sequence of a successful walk.
#[tokio::test]
async fn test_walk_events_follow_the_graph() {
    let (addr, _handle) = spawn_test_server().await;
    let mut client = connect_client(&addr).await;

    let body = post_interaction(
        &addr,
        json!({"learner_id": "ana", "request_type": "get_progress"}),
    )
    .await;

    let (events, completed) = receive_walk(&mut client).await;

    match &events[0] {
        WalkEvent::WalkStarted(payload) => {
            assert_eq!(payload.learner_id, "ana");
            assert_eq!(payload.request_type, "get_progress");
            assert_eq!(payload.request_id, body["request_id"]);
        }
        other => panic!("Expected WalkStarted event, got: {other:?}"),
    }
    assert_eq!(
        entered_nodes(&events),
        vec![Node::Router, Node::Progress, Node::Finalize]
    );
    assert_eq!(completed.status, "success");
    assert_eq!(completed.steps, 3);
    assert!(completed.error.is_none());
}

/// Tests that a failing capability is reported and the walk still completes.
#[tokio::test]
async fn test_failed_node_is_broadcast() {
    let (addr, _handle) = spawn_test_server().await;
    let mut client = connect_client(&addr).await;

    // A vocabulary answer without the expected answer is invalid input.
    post_interaction(
        &addr,
        json!({
            "learner_id": "ana",
            "request_type": "vocabulary_exercise",
            "activity_input": {"word_id": "w_time", "answer": "time"}
        }),
    )
    .await;

    let (events, completed) = receive_walk(&mut client).await;

    let failure = events.iter().find_map(|event| match event {
        WalkEvent::NodeFailed(payload) => Some(payload),
        _ => None,
    });
    let failure = failure.expect("Expected a NodeFailed event");
    assert_eq!(failure.node, Node::Vocabulary);
    assert!(failure.message.contains("correct_answer"));

    assert_eq!(entered_nodes(&events).last(), Some(&Node::Finalize));
    assert_eq!(completed.status, "error");
    assert!(completed.error.is_some());
}

/// Tests that an unroutable request goes straight to finalize.
#[tokio::test]
async fn test_unknown_request_type_walk() {
    let (addr, _handle) = spawn_test_server().await;
    let mut client = connect_client(&addr).await;

    post_interaction(
        &addr,
        json!({"learner_id": "ana", "request_type": "teleport"}),
    )
    .await;

    let (events, completed) = receive_walk(&mut client).await;
    assert_eq!(entered_nodes(&events), vec![Node::Router, Node::Finalize]);
    assert_eq!(completed.status, "error");
    assert!(completed
        .error
        .is_some_and(|e| e.contains("Unknown request type")));
}

/// Tests that events are broadcast to all connected clients.
#[tokio::test]
async fn test_events_broadcast_to_all_clients() {
    let (addr, _handle) = spawn_test_server().await;

    let mut client1 = connect_client(&addr).await;
    let mut client2 = connect_client(&addr).await;

    post_interaction(
        &addr,
        json!({"learner_id": "ana", "request_type": "get_next_activity"}),
    )
    .await;

    let (_, completed1) = receive_walk(&mut client1).await;
    let (_, completed2) = receive_walk(&mut client2).await;

    assert_eq!(completed1.request_id, completed2.request_id);
    assert_eq!(completed1.status, "success");
}

// ============================================================================
// Disconnection Tests
// ============================================================================

/// Tests that client can cleanly disconnect.
#[tokio::test]
async fn test_client_can_disconnect() {
    let (addr, _handle) = spawn_test_server().await;

    let mut client = connect_client(&addr).await;

    client
        .close(None)
        .await
        .expect("Failed to close connection");
}

/// Tests that the server keeps walking and broadcasting after a client leaves.
#[tokio::test]
async fn test_server_continues_after_client_disconnect() {
    let (addr, _handle) = spawn_test_server().await;

    let mut client1 = connect_client(&addr).await;
    client1.close(None).await.ok();
    drop(client1);

    // Give server time to process disconnect
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client2 = connect_client(&addr).await;

    let body = post_interaction(
        &addr,
        json!({"learner_id": "ana", "request_type": "get_progress"}),
    )
    .await;
    assert_eq!(body["status"], "success");

    let (_, completed) = receive_walk(&mut client2).await;
    assert_eq!(completed.request_id, body["request_id"]);
}
