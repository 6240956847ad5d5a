//! Walk events and their WebSocket stream.
//!
//! Every walk publishes its progress on a broadcast channel so operators
//! can watch interactions as they are processed. Clients connect to `/ws`
//! and receive each event as a JSON object with `event` and `payload`
//! fields.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes service status
//! - `walk_started` - A request entered the router
//! - `node_entered` - The walk moved to a node
//! - `node_failed` - A capability failed; the walk continues
//! - `walk_completed` - Finalize ran
//!
//! # Example
//!
//! ```
//! use tutor_orchestrator::events::{EventBroadcaster, WalkEvent};
//! use tutor_orchestrator::Node;
//!
//! let broadcaster = EventBroadcaster::new(16);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(WalkEvent::node_entered("req_1", Node::Router, 1));
//! let event = receiver.try_recv().unwrap();
//! assert_eq!(event.event_name(), "node_entered");
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{AppState, ServiceStatus};
use crate::graph::Node;
use crate::state::InteractionState;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Service status at connection time.
    pub status: ServiceStatus,
}

/// Payload for the `walk_started` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkStartedPayload {
    /// Interaction identifier.
    pub request_id: String,
    /// Learner the interaction belongs to.
    pub learner_id: String,
    /// Request type as received.
    pub request_type: String,
    /// When the walk started.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `node_entered` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEnteredPayload {
    /// Interaction identifier.
    pub request_id: String,
    /// Node being entered.
    pub node: Node,
    /// 1-based position of the node in the walk.
    pub step: usize,
}

/// Payload for the `node_failed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFailedPayload {
    /// Interaction identifier.
    pub request_id: String,
    /// Node that failed.
    pub node: Node,
    /// Human-readable error message.
    pub message: String,
}

/// Payload for the `walk_completed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkCompletedPayload {
    /// Interaction identifier.
    pub request_id: String,
    /// Final response status.
    pub status: String,
    /// Nodes visited, finalize included.
    pub steps: usize,
    /// First failure, if any node failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events published while walking interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum WalkEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// A walk started.
    WalkStarted(WalkStartedPayload),
    /// The walk entered a node.
    NodeEntered(NodeEnteredPayload),
    /// A capability failed.
    NodeFailed(NodeFailedPayload),
    /// A walk finished.
    WalkCompleted(WalkCompletedPayload),
}

impl WalkEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(status: ServiceStatus) -> Self {
        Self::Connected(ConnectedPayload { status })
    }

    /// Creates a `WalkStarted` event.
    #[must_use]
    pub fn walk_started(request_id: &str, learner_id: &str, request_type: &str) -> Self {
        Self::WalkStarted(WalkStartedPayload {
            request_id: request_id.to_string(),
            learner_id: learner_id.to_string(),
            request_type: request_type.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Creates a `NodeEntered` event.
    #[must_use]
    pub fn node_entered(request_id: &str, node: Node, step: usize) -> Self {
        Self::NodeEntered(NodeEnteredPayload {
            request_id: request_id.to_string(),
            node,
            step,
        })
    }

    /// Creates a `NodeFailed` event.
    #[must_use]
    pub fn node_failed(request_id: &str, node: Node, message: impl Into<String>) -> Self {
        Self::NodeFailed(NodeFailedPayload {
            request_id: request_id.to_string(),
            node,
            message: message.into(),
        })
    }

    /// Creates a `WalkCompleted` event from a finalized state.
    #[must_use]
    pub fn walk_completed(state: &InteractionState, steps: usize) -> Self {
        let status = state
            .response
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string();
        Self::WalkCompleted(WalkCompletedPayload {
            request_id: state.request_id.clone(),
            status,
            steps,
            error: state.error_message().map(str::to_string),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::WalkStarted(_) => "walk_started",
            Self::NodeEntered(_) => "node_entered",
            Self::NodeFailed(_) => "node_failed",
            Self::WalkCompleted(_) => "walk_completed",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans walk events out to every subscriber.
///
/// Events are not kept for clients that connect later.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<WalkEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives a `Lagged` error and misses
    /// the oldest events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WalkEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event and returns how many subscribers will see it.
    pub fn send(&self, event: WalkEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Counts pings the client has not answered yet.
#[derive(Debug, Default)]
struct PongTracker {
    missed: u8,
}

impl PongTracker {
    fn pong(&mut self) {
        self.missed = 0;
    }

    /// Records a sent ping; false once the client has missed too many.
    fn ping(&mut self) -> bool {
        self.missed = self.missed.saturating_add(1);
        self.missed < MAX_MISSED_PONGS
    }
}

/// Encodes an event as a text frame, or `None` when it cannot be serialized.
fn encode(event: &WalkEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!("Failed to serialize {} event: {}", event.event_name(), e);
            None
        }
    }
}

/// Applies one client frame; false when the connection should end.
///
/// Pings are answered by axum itself, so only pongs and closes matter here.
fn accept_frame(frame: Option<Result<Message, axum::Error>>, pongs: &mut PongTracker) -> bool {
    match frame {
        Some(Ok(Message::Pong(_))) => {
            pongs.pong();
            true
        }
        Some(Ok(Message::Close(_))) | None => false,
        Some(Ok(_)) => true,
        Some(Err(e)) => {
            debug!("WebSocket error: {}", e);
            false
        }
    }
}

/// Streams walk events to one client until it leaves or stops answering
/// heartbeats.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let connected = WalkEvent::connected(state.status().await);
    let Some(message) = encode(&connected) else {
        return;
    };
    if sender.send(message).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }
    info!("WebSocket client connected");

    let mut events = state.orchestrator.events().subscribe();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let mut pongs = PongTracker::default();

    loop {
        let outgoing = tokio::select! {
            frame = receiver.next() => {
                if !accept_frame(frame, &mut pongs) {
                    break;
                }
                None
            }
            event = events.recv() => match event {
                Ok(event) => encode(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Client lagged, missed {} events", n);
                    None
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = heartbeat.tick() => {
                if !pongs.ping() {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
                Some(Message::Ping(Vec::new()))
            }
        };

        if let Some(message) = outgoing {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    }

    info!("WebSocket client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
