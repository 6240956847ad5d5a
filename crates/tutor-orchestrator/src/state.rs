//! Interaction state threaded through one walk of the orchestration graph.
//!
//! An [`InteractionState`] is created once per inbound request and owned by
//! the single walk that processes it. Capabilities read and write it in
//! sequence; the trace log only grows, and the error flag, once raised,
//! stays raised until finalize reports it.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tutor_srs::Quality;

use crate::model::{
    LearnerProfile, Level, Pillar, PillarScores, ReviewItem, Schedule, StepResult,
};

/// Number of steps in the initial placement assessment.
pub const ASSESSMENT_STEPS: u8 = 4;

// ============================================================================
// Request
// ============================================================================

/// An inbound learner interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    /// The learner the interaction belongs to.
    pub learner_id: String,
    /// Declared request type. Validated by the router, not here.
    pub request_type: String,
    /// Caller-supplied input for the current step.
    #[serde(default)]
    pub activity_input: Value,
}

impl InteractionRequest {
    /// Creates a request without activity input.
    #[must_use]
    pub fn new(learner_id: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            request_type: request_type.into(),
            activity_input: Value::Null,
        }
    }

    /// Attaches activity input.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.activity_input = input;
        self
    }
}

// ============================================================================
// Trace log
// ============================================================================

/// One entry in the append-only trace log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    /// Node that wrote the entry.
    pub agent: String,
    /// Human-readable message.
    pub message: String,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Substates
// ============================================================================

/// Snapshot of the learner taken when the interaction starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerSnapshot {
    /// Learner identifier.
    pub learner_id: String,
    /// Level at the start of the interaction.
    pub level: Level,
    /// Daily study goal.
    pub daily_goal_minutes: u32,
    /// Learning goals.
    pub learning_goals: Vec<String>,
    /// Whether the placement assessment was completed.
    pub initial_assessment_completed: bool,
    /// Completed activities since the last assessment.
    pub sessions_since_last_assessment: u32,
    /// Denormalized per-pillar scores.
    pub scores: PillarScores,
}

/// A mistake the learner made during an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerError {
    /// A grammar mistake.
    Grammar {
        /// Rule that was broken.
        rule: String,
        /// What the learner said or wrote.
        #[serde(default)]
        incorrect: String,
        /// The corrected form.
        #[serde(default)]
        correction: String,
    },
    /// A mispronounced word or sound.
    Pronunciation {
        /// Word that was mispronounced.
        word: String,
        /// Phoneme at fault, when the speech service isolated one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phoneme: Option<String>,
        /// Accuracy percentage reported by the speech service.
        accuracy: f64,
    },
}

impl LearnerError {
    /// Domain of the mistake.
    #[must_use]
    pub const fn pillar(&self) -> Pillar {
        match self {
            Self::Grammar { .. } => Pillar::Grammar,
            Self::Pronunciation { .. } => Pillar::Pronunciation,
        }
    }
}

/// Outcome of a learning activity, consumed by error integration and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOutput {
    /// Domain of the activity.
    pub pillar: Pillar,
    /// Reviewed item, if the activity targeted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Whether the learner answered correctly.
    pub correct: bool,
    /// Quality fed to the SRS engine.
    pub quality: Quality,
    /// Accuracy percentage, when the activity measured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Score (0-100) folded into the pillar score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    /// Time spent on the activity.
    #[serde(default)]
    pub time_spent_seconds: u32,
    /// Mistakes collected during the activity.
    #[serde(default)]
    pub errors: Vec<LearnerError>,
}

impl ActivityOutput {
    /// Creates an outcome without accuracy, score or errors.
    #[must_use]
    pub const fn new(pillar: Pillar, correct: bool, quality: Quality) -> Self {
        Self {
            pillar,
            item_id: None,
            correct,
            quality,
            accuracy: None,
            score: None,
            time_spent_seconds: 0,
            errors: Vec::new(),
        }
    }
}

/// Scheduling substate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SrsState {
    /// Total due items across domains.
    pub items_due_today: usize,
    /// Due items per domain.
    pub due: BTreeMap<Pillar, Vec<ReviewItem>>,
    /// Items not practiced recently.
    pub low_frequency: Vec<ReviewItem>,
    /// The single recommended next item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_item: Option<ReviewItem>,
}

/// Multi-step assessment substate.
///
/// `current_step` counts answered steps and never exceeds `total_steps`,
/// which is itself capped at [`ASSESSMENT_STEPS`]. `visits` counts runs of
/// the assessment node within one walk, failed runs included, and the
/// self-loop stops once it reaches `total_steps`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentState {
    /// Placement assessment.
    pub is_initial: bool,
    /// Periodic re-assessment.
    pub is_continuous: bool,
    /// Steps taken so far.
    pub current_step: u8,
    /// Steps in the sub-flow.
    pub total_steps: u8,
    /// Results recorded per pillar.
    pub results: BTreeMap<Pillar, StepResult>,
    /// Scores once the assessment is finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_scores: Option<PillarScores>,
    /// Level decided by the assessment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub determined_level: Option<Level>,
    /// Study recommendations.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// The next step's answers are not in this request.
    #[serde(default)]
    pub awaiting_input: bool,
    /// Node runs in the current walk.
    #[serde(skip)]
    pub visits: u8,
}

impl AssessmentState {
    /// Returns `true` while the initial sub-flow has steps left.
    #[must_use]
    pub const fn has_remaining_steps(&self) -> bool {
        self.is_initial && self.current_step < self.total_steps
    }

    /// Returns `true` when the node should run again within this walk.
    #[must_use]
    pub const fn can_continue(&self) -> bool {
        self.has_remaining_steps() && !self.awaiting_input && self.visits < self.total_steps
    }
}

/// Speaking-session substate mirrored from the session store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingState {
    /// Active session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Conversation topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Learner turns taken.
    pub current_turn: u32,
    /// Whether the session is still running.
    pub is_active: bool,
    /// Whether this interaction processed a session at all.
    pub touched: bool,
}

/// Progress substate, filled by the progress capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Whether this interaction updated stored progress.
    pub updated: bool,
    /// Overview payload, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<Value>,
}

/// Error-integration substate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    /// Whether learner errors await integration.
    pub has_errors: bool,
    /// Errors waiting for error integration.
    pub pending_errors: Vec<LearnerError>,
    /// Activities generated from those errors.
    pub generated_activity_ids: Vec<String>,
}

// ============================================================================
// InteractionState
// ============================================================================

/// The record threaded through one walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionState {
    /// Unique identifier of this interaction.
    pub request_id: String,
    /// Declared request type, as received.
    pub request_type: String,
    /// Learner snapshot.
    pub learner: LearnerSnapshot,
    /// Scratch area for the currently active activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_activity: Option<Value>,
    /// Caller-supplied input for the current step.
    #[serde(default)]
    pub activity_input: Value,
    /// Outcome written by the capability that just ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_output: Option<ActivityOutput>,
    /// Scheduling substate.
    #[serde(default)]
    pub srs: SrsState,
    /// Today's schedule, when the scheduler ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_schedule: Option<Schedule>,
    /// Schedule date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_date: Option<NaiveDate>,
    /// Assessment sub-flow.
    #[serde(default)]
    pub assessment: AssessmentState,
    /// Speaking session.
    #[serde(default)]
    pub speaking: SpeakingState,
    /// Progress substate.
    #[serde(default)]
    pub progress: ProgressState,
    /// Error-integration substate.
    #[serde(default)]
    pub errors: ErrorState,
    /// Append-only trace log.
    #[serde(default)]
    pub messages: Vec<TraceMessage>,
    /// Response payload.
    #[serde(default)]
    pub response: Map<String, Value>,
    /// Set by finalize.
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl InteractionState {
    /// Creates the state for a new request.
    ///
    /// When a persisted profile is supplied the learner snapshot is taken
    /// from it; otherwise the snapshot holds first-visit defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::{InteractionRequest, InteractionState, Level};
    ///
    /// let request = InteractionRequest::new("ana", "get_schedule");
    /// let state = InteractionState::new(&request, None, 30, Level::Beginner);
    ///
    /// assert!(state.request_id.starts_with("req_ana_"));
    /// assert_eq!(state.learner.daily_goal_minutes, 30);
    /// assert!(!state.has_error());
    /// assert!(state.messages.is_empty());
    /// ```
    #[must_use]
    pub fn new(
        request: &InteractionRequest,
        profile: Option<&LearnerProfile>,
        default_goal_minutes: u32,
        default_level: Level,
    ) -> Self {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let request_id = format!(
            "req_{}_{}_{}",
            request.learner_id,
            now.timestamp_millis(),
            &suffix[..8]
        );

        let learner = profile.map_or_else(
            || LearnerSnapshot {
                learner_id: request.learner_id.clone(),
                level: default_level,
                daily_goal_minutes: default_goal_minutes,
                learning_goals: vec!["general".to_string()],
                initial_assessment_completed: false,
                sessions_since_last_assessment: 0,
                scores: PillarScores::default(),
            },
            |p| LearnerSnapshot {
                learner_id: p.id.clone(),
                level: p.level,
                daily_goal_minutes: p.daily_goal_minutes,
                learning_goals: p.learning_goals.clone(),
                initial_assessment_completed: p.initial_assessment_completed,
                sessions_since_last_assessment: p.sessions_since_last_assessment,
                scores: p.scores,
            },
        );

        Self {
            request_id,
            request_type: request.request_type.clone(),
            learner,
            current_activity: None,
            activity_input: request.activity_input.clone(),
            activity_output: None,
            srs: SrsState::default(),
            daily_schedule: None,
            schedule_date: None,
            assessment: AssessmentState::default(),
            speaking: SpeakingState::default(),
            progress: ProgressState::default(),
            errors: ErrorState::default(),
            messages: Vec::new(),
            response: Map::new(),
            is_complete: false,
            has_error: false,
            error_message: None,
        }
    }

    /// Appends a timestamped trace message.
    pub fn add_message(&mut self, agent: &str, message: impl Into<String>) {
        self.push_message(agent, message.into(), None);
    }

    /// Appends a timestamped trace message with structured detail.
    pub fn add_message_with_data(&mut self, agent: &str, message: impl Into<String>, data: Value) {
        self.push_message(agent, message.into(), Some(data));
    }

    fn push_message(&mut self, agent: &str, message: String, data: Option<Value>) {
        self.messages.push(TraceMessage {
            agent: agent.to_string(),
            message,
            timestamp: Utc::now(),
            data,
        });
    }

    /// Raises the error flag. The first message recorded is kept; later
    /// failures are appended to the trace log only.
    pub fn record_error(&mut self, agent: &str, message: impl Into<String>) {
        let message = message.into();
        self.add_message(agent, format!("Error: {message}"));
        self.mark_error(message);
    }

    /// Raises the error flag without writing a trace entry.
    pub(crate) fn mark_error(&mut self, message: String) {
        if !self.has_error {
            self.has_error = true;
            self.error_message = Some(message);
        }
    }

    /// Whether any capability reported a failure.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.has_error
    }

    /// The first failure message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Inserts a field into the response payload.
    pub fn respond(&mut self, key: &str, value: impl Into<Value>) {
        self.response.insert(key.to_string(), value.into());
    }

    /// Replaces the response payload with `type` and `status` fields.
    pub fn reset_response(&mut self, response_type: &str, status: &str) {
        self.response.clear();
        self.respond("type", response_type);
        self.respond("status", status);
    }

    /// Reads a string field from the activity input.
    #[must_use]
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.activity_input.get(key).and_then(Value::as_str)
    }

    /// Reads an unsigned integer field from the activity input.
    #[must_use]
    pub fn input_u64(&self, key: &str) -> Option<u64> {
        self.activity_input.get(key).and_then(Value::as_u64)
    }

    /// Reads a number field from the activity input.
    #[must_use]
    pub fn input_f64(&self, key: &str) -> Option<f64> {
        self.activity_input.get(key).and_then(Value::as_f64)
    }

    /// Returns `true` when the caller supplied any activity input.
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.activity_input
            .as_object()
            .is_some_and(|input| !input.is_empty())
    }
}
