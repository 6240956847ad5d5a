//! Capability nodes.
//!
//! Each capability is an async function over the interaction state and the
//! shared [`Context`]. A capability returns `Err` for failures it cannot
//! absorb; the walker records them on the state and keeps walking.

pub mod assessment;
pub mod error_integration;
pub mod grammar;
pub mod progress;
pub mod pronunciation;
pub mod scheduling;
pub mod speaking;
pub mod vocabulary;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::error::{Result, TutorError};
use crate::model::LearnerProfile;
use crate::services::{
    ContentService, ExerciseRequest, OfflineContent, OfflineSpeech, SpeechService,
};
use crate::session::{MemorySessionStore, SessionStore};
use crate::state::{ActivityOutput, InteractionState};
use crate::store::Persistence;

/// Collaborators and settings shared by every walk.
#[derive(Clone)]
pub struct Context {
    /// Service configuration.
    pub config: Arc<Config>,
    /// Persistence collaborator.
    pub store: Arc<dyn Persistence>,
    /// Speaking-session store.
    pub sessions: Arc<dyn SessionStore>,
    /// Generative content collaborator.
    pub content: Arc<dyn ContentService>,
    /// Speech collaborator.
    pub speech: Arc<dyn SpeechService>,
}

impl Context {
    /// Creates a context with an in-memory session store sized from the
    /// configuration and offline content and speech services.
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<dyn Persistence>) -> Self {
        let sessions = Arc::new(MemorySessionStore::new(
            config.session.ttl(),
            config.session.max_sessions,
        ));
        Self {
            config,
            store,
            sessions,
            content: Arc::new(OfflineContent),
            speech: Arc::new(OfflineSpeech),
        }
    }

    /// Replaces the content service.
    #[must_use]
    pub fn with_content(mut self, content: Arc<dyn ContentService>) -> Self {
        self.content = content;
        self
    }

    /// Replaces the speech service.
    #[must_use]
    pub fn with_speech(mut self, speech: Arc<dyn SpeechService>) -> Self {
        self.speech = speech;
        self
    }

    /// Replaces the session store.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Requests an exercise, using `fallback` when the content service fails.
    pub(crate) async fn exercise_or(
        &self,
        request: &ExerciseRequest,
        fallback: impl FnOnce() -> Value + Send,
    ) -> (Value, bool) {
        match self.content.exercise(request).await {
            Ok(exercise) => (exercise, false),
            Err(e) => {
                warn!(
                    pillar = %request.pillar,
                    focus = %request.focus,
                    error = %e,
                    "Content service failed, using fallback exercise"
                );
                (fallback(), true)
            }
        }
    }
}

/// Loads the learner's profile, or a fresh one built from the snapshot when
/// none is stored yet.
pub(crate) async fn load_profile(
    state: &InteractionState,
    ctx: &Context,
) -> Result<LearnerProfile> {
    let learner_id = &state.learner.learner_id;
    if let Some(profile) = ctx.store.get_learner(learner_id).await? {
        return Ok(profile);
    }
    let mut profile = LearnerProfile::new(learner_id.clone(), state.learner.daily_goal_minutes);
    profile.level = state.learner.level;
    profile
        .learning_goals
        .clone_from(&state.learner.learning_goals);
    Ok(profile)
}

/// Publishes an activity outcome for error integration and progress.
pub(crate) fn publish_outcome(state: &mut InteractionState, output: ActivityOutput) {
    if !output.errors.is_empty() {
        let errors = &mut state.errors;
        errors.has_errors = true;
        errors.pending_errors.extend_from_slice(&output.errors);
    }
    state.activity_output = Some(output);
}

/// Reads an optional `YYYY-MM-DD` date from the activity input.
pub(crate) fn input_date(state: &InteractionState, key: &str) -> Result<NaiveDate> {
    match state.input_str(key) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            TutorError::invalid_input(format!("'{key}' must be a date in YYYY-MM-DD format"))
        }),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Elapsed seconds for a response time in milliseconds.
pub(crate) fn seconds_from_ms(ms: u64) -> u32 {
    u32::try_from(ms / 1000).unwrap_or(u32::MAX)
}
