//! Capability routing.
//!
//! Request types form a closed set. Each maps to exactly one first node;
//! anything outside the set goes straight to finalize with an error payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::TutorError;
use crate::graph::Node;
use crate::state::InteractionState;

/// Supported request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Placement assessment, stepped through in several requests.
    AssessmentInitial,
    /// Periodic re-assessment from stored statistics.
    AssessmentContinuous,
    /// Today's review schedule.
    GetSchedule,
    /// The single best next activity.
    GetNextActivity,
    /// Progress overview.
    GetProgress,
    /// Vocabulary exercise or answer.
    VocabularyExercise,
    /// Grammar lesson or explanation.
    GrammarLesson,
    /// Grammar exercise or answer.
    GrammarExercise,
    /// Pronunciation exercise or attempt.
    PronunciationExercise,
    /// Shadowing attempt.
    Shadowing,
    /// Conversational practice turn.
    SpeakingSession,
}

impl RequestType {
    /// Every supported request type.
    pub const ALL: [Self; 11] = [
        Self::AssessmentInitial,
        Self::AssessmentContinuous,
        Self::GetSchedule,
        Self::GetNextActivity,
        Self::GetProgress,
        Self::VocabularyExercise,
        Self::GrammarLesson,
        Self::GrammarExercise,
        Self::PronunciationExercise,
        Self::Shadowing,
        Self::SpeakingSession,
    ];

    /// Wire name of the request type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AssessmentInitial => "assessment_initial",
            Self::AssessmentContinuous => "assessment_continuous",
            Self::GetSchedule => "get_schedule",
            Self::GetNextActivity => "get_next_activity",
            Self::GetProgress => "get_progress",
            Self::VocabularyExercise => "vocabulary_exercise",
            Self::GrammarLesson => "grammar_lesson",
            Self::GrammarExercise => "grammar_exercise",
            Self::PronunciationExercise => "pronunciation_exercise",
            Self::Shadowing => "shadowing",
            Self::SpeakingSession => "speaking_session",
        }
    }

    /// The first capability node for this request type.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::{Node, RequestType};
    ///
    /// assert_eq!(RequestType::GetSchedule.first_node(), Node::Scheduler);
    /// assert_eq!(RequestType::Shadowing.first_node(), Node::Pronunciation);
    /// ```
    #[must_use]
    pub const fn first_node(&self) -> Node {
        match self {
            Self::AssessmentInitial | Self::AssessmentContinuous => Node::Assessment,
            Self::GetSchedule | Self::GetNextActivity => Node::Scheduler,
            Self::GetProgress => Node::Progress,
            Self::VocabularyExercise => Node::Vocabulary,
            Self::GrammarLesson | Self::GrammarExercise => Node::Grammar,
            Self::PronunciationExercise | Self::Shadowing => Node::Pronunciation,
            Self::SpeakingSession => Node::Speaking,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TutorError::routing(s))
    }
}

/// Decides the first node for the interaction.
///
/// Appends exactly one trace message. For an unknown request type the
/// response is replaced by an error payload and the error flag is raised.
pub fn route(state: &mut InteractionState) -> Node {
    let node = match state.request_type.parse::<RequestType>() {
        Ok(request_type) => {
            let node = request_type.first_node();
            info!(
                request_id = %state.request_id,
                request_type = %request_type,
                node = %node,
                "Routing request"
            );
            node
        }
        Err(_) => {
            let message = format!("Unknown request type: {}", state.request_type);
            warn!(
                request_id = %state.request_id,
                request_type = %state.request_type,
                "Unroutable request"
            );
            state.reset_response("error", "error");
            state.respond("error", message.clone());
            state.respond(
                "supported_types",
                json!(RequestType::ALL.map(|t| t.as_str())),
            );
            state.mark_error(message);
            Node::Finalize
        }
    };

    state.add_message("router", format!("Routing to: {node}"));
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Level;
    use crate::state::InteractionRequest;

    fn state_for(request_type: &str) -> InteractionState {
        InteractionState::new(
            &InteractionRequest::new("ana", request_type),
            None,
            30,
            Level::Beginner,
        )
    }

    #[test]
    fn test_every_request_type_routes_to_a_capability() {
        for request_type in RequestType::ALL {
            let mut state = state_for(request_type.as_str());
            let node = route(&mut state);
            assert_ne!(node, Node::Finalize, "{request_type} fell through");
            assert_ne!(node, Node::Router);
            assert!(!state.has_error());
            assert_eq!(state.messages.len(), 1);
        }
    }

    #[test]
    fn test_specific_routes() {
        for (request_type, node) in [
            ("assessment_initial", Node::Assessment),
            ("get_next_activity", Node::Scheduler),
            ("get_progress", Node::Progress),
            ("grammar_lesson", Node::Grammar),
            ("speaking_session", Node::Speaking),
        ] {
            assert_eq!(route(&mut state_for(request_type)), node, "{request_type}");
        }
    }

    #[test]
    fn test_unknown_type_routes_to_finalize_with_error() {
        let mut state = state_for("bogus_type");
        let node = route(&mut state);
        assert_eq!(node, Node::Finalize);
        assert!(state.has_error());
        assert_eq!(
            state.response.get("error").and_then(|v| v.as_str()),
            Some("Unknown request type: bogus_type")
        );
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].message, "Routing to: finalize");
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert!("GET_SCHEDULE".parse::<RequestType>().is_err());
        assert_eq!(
            "get_schedule".parse::<RequestType>().ok(),
            Some(RequestType::GetSchedule)
        );
    }
}
