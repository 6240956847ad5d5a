//! Content and speech collaborators.
//!
//! Exercise authoring, conversation replies and pronunciation scoring are
//! external services. Capabilities call them through these traits and fall
//! back to deterministic content when a call fails. The `Offline*`
//! implementations always report the service as unavailable, which makes
//! every capability run on its fallbacks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServiceKind, TutorError};
use crate::model::{Level, Pillar};
use crate::session::Exchange;
use crate::state::LearnerError;

// ============================================================================
// Content service
// ============================================================================

/// What a capability asks the content service to author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseRequest {
    /// Domain of the exercise.
    pub pillar: Pillar,
    /// Exercise flavor, e.g. `multiple_choice`, `lesson`, `shadowing`.
    pub kind: String,
    /// Learner level.
    pub level: Level,
    /// Word, rule or sound the exercise targets.
    pub focus: String,
    /// Vocabulary context derived from the learner's goals.
    pub context: String,
}

/// The content service's answer to one learner utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationReply {
    /// What the tutor says next.
    pub reply: String,
    /// Grammar mistakes spotted in the learner's utterance.
    #[serde(default)]
    pub grammar_errors: Vec<LearnerError>,
}

/// Generative content collaborator.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Authors an exercise. The returned JSON is passed to the caller as is.
    async fn exercise(&self, request: &ExerciseRequest) -> Result<Value>;

    /// Continues a conversation. `utterance` is `None` for the opening line.
    async fn conversation_reply(
        &self,
        topic: &str,
        level: Level,
        history: &[Exchange],
        utterance: Option<&str>,
    ) -> Result<ConversationReply>;
}

/// Content service that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineContent;

#[async_trait]
impl ContentService for OfflineContent {
    async fn exercise(&self, _request: &ExerciseRequest) -> Result<Value> {
        Err(TutorError::unavailable(
            ServiceKind::Content,
            "no content service configured",
        ))
    }

    async fn conversation_reply(
        &self,
        _topic: &str,
        _level: Level,
        _history: &[Exchange],
        _utterance: Option<&str>,
    ) -> Result<ConversationReply> {
        Err(TutorError::unavailable(
            ServiceKind::Content,
            "no content service configured",
        ))
    }
}

// ============================================================================
// Speech service
// ============================================================================

/// Accuracy of one phoneme inside a word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeScore {
    /// Phoneme symbol.
    pub phoneme: String,
    /// Accuracy percentage.
    pub accuracy: f64,
}

/// Accuracy of one spoken word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordScore {
    /// The word.
    pub word: String,
    /// Accuracy percentage.
    pub accuracy: f64,
    /// Per-phoneme breakdown, when available.
    #[serde(default)]
    pub phonemes: Vec<PhonemeScore>,
}

impl WordScore {
    /// The worst phoneme of the word, if any was scored.
    #[must_use]
    pub fn worst_phoneme(&self) -> Option<&PhonemeScore> {
        self.phonemes
            .iter()
            .min_by(|a, b| a.accuracy.total_cmp(&b.accuracy))
    }
}

/// Pronunciation scores for one utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PronunciationAssessment {
    /// Overall accuracy percentage.
    pub accuracy: f64,
    /// Fluency percentage, when measured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluency: Option<f64>,
    /// Text the recognizer heard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognized_text: Option<String>,
    /// Per-word breakdown.
    #[serde(default)]
    pub words: Vec<WordScore>,
}

impl PronunciationAssessment {
    /// Words scored below `threshold`, worst first.
    #[must_use]
    pub fn problem_words(&self, threshold: f64) -> Vec<&WordScore> {
        let mut words: Vec<&WordScore> = self
            .words
            .iter()
            .filter(|w| w.accuracy < threshold)
            .collect();
        words.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));
        words
    }

    /// Converts the problem words into learner errors.
    #[must_use]
    pub fn learner_errors(&self, threshold: f64) -> Vec<LearnerError> {
        self.problem_words(threshold)
            .into_iter()
            .map(|w| LearnerError::Pronunciation {
                word: w.word.clone(),
                phoneme: w
                    .worst_phoneme()
                    .filter(|p| p.accuracy < threshold)
                    .map(|p| p.phoneme.clone()),
                accuracy: w.accuracy,
            })
            .collect()
    }
}

/// Speech collaborator.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Scores an utterance against a reference text. `audio` is opaque to
    /// the core and forwarded unchanged.
    async fn assess_pronunciation(
        &self,
        reference_text: &str,
        audio: &str,
    ) -> Result<PronunciationAssessment>;
}

/// Speech service that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSpeech;

#[async_trait]
impl SpeechService for OfflineSpeech {
    async fn assess_pronunciation(
        &self,
        _reference_text: &str,
        _audio: &str,
    ) -> Result<PronunciationAssessment> {
        Err(TutorError::unavailable(
            ServiceKind::Speech,
            "no speech service configured",
        ))
    }
}

/// Picks the vocabulary context for a learner's goals.
#[must_use]
pub fn context_for_goals(goals: &[String]) -> &'static str {
    let has = |goal: &str| goals.iter().any(|g| g == goal);
    if has("data_engineering") {
        "data_engineering"
    } else if has("ai") || has("artificial_intelligence") {
        "ai"
    } else if has("technology") || has("programming") {
        "technology"
    } else {
        "general"
    }
}
