//! Orchestration graph and walker.
//!
//! A walk starts at the router, visits one or more capability nodes and
//! always ends at finalize. Transitions are a pure function of the node
//! that just ran and the interaction state it left behind; the walker adds
//! a per-node timeout, the interaction's cancellation token and a hard step
//! budget on top.
//!
//! ```text
//! router ─► assessment ─┬─► assessment (while steps remain, at most 4)
//!                       ├─► progress ─► finalize
//!                       └─► finalize
//! router ─► scheduler ─► finalize
//! router ─► domain ─┬─► error_integration ─► progress ─► finalize
//!                   ├─► progress ─► finalize
//!                   └─► finalize
//! ```

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capabilities::{
    assessment, error_integration, grammar, progress, pronunciation, scheduling, speaking,
    vocabulary, Context,
};
use crate::error::{Result, TutorError};
use crate::events::{EventBroadcaster, WalkEvent};
use crate::router::{self, RequestType};
use crate::state::{InteractionRequest, InteractionState, ASSESSMENT_STEPS};

/// Upper bound on node visits in one walk.
///
/// Router, one capability, error integration, progress and finalize, plus
/// the extra visits of the assessment self-loop.
pub const MAX_STEPS: usize = 5 + ASSESSMENT_STEPS as usize;

// ============================================================================
// Nodes
// ============================================================================

/// A node of the orchestration graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// Entry node; picks the first capability.
    Router,
    /// Placement and continuous assessment.
    Assessment,
    /// Daily schedule and next activity.
    Scheduler,
    /// Progress bookkeeping and overview.
    Progress,
    /// Vocabulary exercises.
    Vocabulary,
    /// Grammar lessons and exercises.
    Grammar,
    /// Pronunciation and shadowing.
    Pronunciation,
    /// Conversational practice.
    Speaking,
    /// Turns collected mistakes into follow-up activities.
    ErrorIntegration,
    /// Terminal node.
    Finalize,
}

impl Node {
    /// Node name as written to the trace log and events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Assessment => "assessment",
            Self::Scheduler => "scheduler",
            Self::Progress => "progress",
            Self::Vocabulary => "vocabulary",
            Self::Grammar => "grammar",
            Self::Pronunciation => "pronunciation",
            Self::Speaking => "speaking",
            Self::ErrorIntegration => "error_integration",
            Self::Finalize => "finalize",
        }
    }

    /// Returns `true` for the learning-domain capabilities.
    #[must_use]
    pub const fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::Vocabulary | Self::Grammar | Self::Pronunciation | Self::Speaking
        )
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// The node that follows `node`, given the state it left behind.
///
/// Pure; the router's side effects live in [`router::route`].
///
/// # Examples
///
/// ```
/// use tutor_orchestrator::graph::next;
/// use tutor_orchestrator::{InteractionRequest, InteractionState, Level, Node};
///
/// let request = InteractionRequest::new("ana", "get_schedule");
/// let state = InteractionState::new(&request, None, 30, Level::Beginner);
///
/// assert_eq!(next(Node::Router, &state), Node::Scheduler);
/// assert_eq!(next(Node::Scheduler, &state), Node::Finalize);
/// assert_eq!(next(Node::Vocabulary, &state), Node::Finalize);
/// ```
#[must_use]
pub fn next(node: Node, state: &InteractionState) -> Node {
    match node {
        Node::Router => state
            .request_type
            .parse::<RequestType>()
            .map_or(Node::Finalize, |t| t.first_node()),
        Node::Assessment => {
            if state.assessment.can_continue() {
                Node::Assessment
            } else if state.assessment.final_scores.is_some() {
                Node::Progress
            } else {
                Node::Finalize
            }
        }
        Node::Speaking if state.speaking.is_active => Node::Finalize,
        Node::Vocabulary | Node::Grammar | Node::Pronunciation | Node::Speaking => {
            if state.errors.has_errors {
                Node::ErrorIntegration
            } else if state.activity_output.is_some() {
                Node::Progress
            } else {
                Node::Finalize
            }
        }
        Node::ErrorIntegration => Node::Progress,
        Node::Scheduler | Node::Progress | Node::Finalize => Node::Finalize,
    }
}

// ============================================================================
// Finalize
// ============================================================================

/// Stamps completion metadata onto the response and marks the state complete.
///
/// The response always carries `type`, `status`, `timestamp` and
/// `request_id`; when any node failed it also carries `error`.
pub fn finalize(state: &mut InteractionState) {
    if !state.response.contains_key("type") {
        let response_type = state.request_type.clone();
        state.respond("type", response_type);
    }

    if let Some(message) = state.error_message().map(str::to_string) {
        state.respond("status", "error");
        if !state.response.contains_key("error") {
            state.respond("error", message);
        }
    } else if !state.response.contains_key("status") {
        state.respond("status", "success");
    }

    let request_id = state.request_id.clone();
    state.respond("timestamp", Utc::now().to_rfc3339());
    state.respond("request_id", request_id);
    state.is_complete = true;
    state.add_message(Node::Finalize.as_str(), "Interaction complete");
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Walks interactions through the graph.
///
/// Cheap to clone; clones share collaborators and the event channel.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Context,
    events: EventBroadcaster,
    node_timeout: Duration,
}

impl Orchestrator {
    /// Creates an orchestrator using the configured node timeout.
    #[must_use]
    pub fn new(ctx: Context) -> Self {
        let node_timeout = ctx.config.node_timeout();
        Self {
            ctx,
            events: EventBroadcaster::default(),
            node_timeout,
        }
    }

    /// Overrides the per-node timeout.
    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Uses an existing event channel.
    #[must_use]
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    /// Shared collaborators.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.ctx
    }

    /// The walk-event channel.
    #[must_use]
    pub const fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Handles one request and returns the finalized response.
    pub async fn handle(&self, request: &InteractionRequest) -> Map<String, Value> {
        self.walk(request, CancellationToken::new()).await.response
    }

    /// Walks one request to finalize and returns the final state.
    ///
    /// Cancelling `cancel` interrupts the node that is running; the
    /// interruption is recorded as a failure and the walk still finalizes.
    pub async fn walk(
        &self,
        request: &InteractionRequest,
        cancel: CancellationToken,
    ) -> InteractionState {
        let profile = match self.ctx.store.get_learner(&request.learner_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(
                    learner_id = %request.learner_id,
                    error = %e,
                    "Could not load learner profile"
                );
                None
            }
        };
        let config = &self.ctx.config;
        let mut state = InteractionState::new(
            request,
            profile.as_ref(),
            config.default_daily_goal_minutes,
            config.default_level,
        );

        info!(
            request_id = %state.request_id,
            learner_id = %request.learner_id,
            request_type = %request.request_type,
            "Walk started"
        );
        self.events.send(WalkEvent::walk_started(
            &state.request_id,
            &request.learner_id,
            &request.request_type,
        ));

        let mut node = Node::Router;
        let mut steps = 0usize;
        loop {
            steps += 1;
            self.events
                .send(WalkEvent::node_entered(&state.request_id, node, steps));
            debug!(request_id = %state.request_id, node = %node, step = steps, "Entering node");

            if node == Node::Finalize {
                break;
            }
            if steps >= MAX_STEPS {
                warn!(request_id = %state.request_id, node = %node, "Step budget exhausted");
                state.record_error(
                    "orchestrator",
                    format!("Walk exceeded {MAX_STEPS} steps at '{node}'"),
                );
                node = Node::Finalize;
                continue;
            }

            node = if node == Node::Router {
                router::route(&mut state)
            } else {
                if let Err(e) = self.run_node(node, &mut state, &cancel).await {
                    warn!(
                        request_id = %state.request_id,
                        node = %node,
                        error = %e,
                        "Capability failed"
                    );
                    self.events
                        .send(WalkEvent::node_failed(&state.request_id, node, e.to_string()));
                    state.record_error(node.as_str(), e.to_string());
                }
                next(node, &state)
            };
        }

        finalize(&mut state);
        info!(
            request_id = %state.request_id,
            steps,
            has_error = state.has_error(),
            "Walk completed"
        );
        self.events.send(WalkEvent::walk_completed(&state, steps));
        state
    }

    /// Runs one capability under the node timeout and the cancellation token.
    async fn run_node(
        &self,
        node: Node,
        state: &mut InteractionState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let work = dispatch(node, state, &self.ctx);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TutorError::Cancelled {
                node: node.to_string(),
            }),
            outcome = tokio::time::timeout(self.node_timeout, work) => {
                outcome.unwrap_or_else(|_| {
                    Err(TutorError::NodeTimeout {
                        node: node.to_string(),
                        timeout_secs: self.node_timeout.as_secs(),
                    })
                })
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("node_timeout", &self.node_timeout)
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Runs the capability behind `node`.
async fn dispatch(node: Node, state: &mut InteractionState, ctx: &Context) -> Result<()> {
    match node {
        Node::Assessment => assessment::run(state, ctx).await,
        Node::Scheduler => scheduling::run(state, ctx).await,
        Node::Progress => progress::run(state, ctx).await,
        Node::Vocabulary => vocabulary::run(state, ctx).await,
        Node::Grammar => grammar::run(state, ctx).await,
        Node::Pronunciation => pronunciation::run(state, ctx).await,
        Node::Speaking => speaking::run(state, ctx).await,
        Node::ErrorIntegration => error_integration::run(state, ctx).await,
        Node::Router | Node::Finalize => Ok(()),
    }
}

// ============================================================================
// Tests
// ============================================================================
