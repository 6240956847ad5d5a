//! Conversational practice.
//!
//! A conversation spans several interactions: `start` opens a session in the
//! session store, each `turn` adds one learner utterance and the tutor's
//! reply, and `end` (or reaching the turn limit) closes it. Only a closed
//! session produces an activity outcome.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use tutor_srs::Quality;

use super::{publish_outcome, Context};
use crate::error::{Result, TutorError};
use crate::model::{Level, Pillar};
use crate::services::PronunciationAssessment;
use crate::session::{Speaker, SpeakingSession};
use crate::state::{ActivityOutput, InteractionState, LearnerError};

const AGENT: &str = "speaking";

/// Word accuracy below which a spoken word counts as a mistake.
pub const WORD_ACCURACY_THRESHOLD: f64 = 70.0;

/// A built-in conversation topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topic {
    /// Topic name.
    pub name: &'static str,
    /// Level the topic suits.
    pub level: Level,
    /// Opening question.
    pub opening: &'static str,
    /// Example answers offered to beginners.
    pub suggestions: [&'static str; 3],
}

/// Built-in topics.
pub const TOPICS: &[Topic] = &[
    Topic {
        name: "daily routine",
        level: Level::Beginner,
        opening: "What time do you usually wake up in the morning?",
        suggestions: [
            "I usually wake up at 7 AM.",
            "I wake up early, around 6 o'clock.",
            "I'm not a morning person, so I wake up late.",
        ],
    },
    Topic {
        name: "weekend plans",
        level: Level::Beginner,
        opening: "What do you like to do on the weekend?",
        suggestions: [
            "I like to relax and watch movies.",
            "I usually spend time with my family.",
            "I enjoy going out with friends.",
        ],
    },
    Topic {
        name: "food",
        level: Level::Beginner,
        opening: "What is your favorite food?",
        suggestions: [
            "I really like pizza and pasta.",
            "My favorite food is Brazilian barbecue.",
            "I enjoy trying different cuisines.",
        ],
    },
    Topic {
        name: "work projects",
        level: Level::Intermediate,
        opening: "Tell me about a project at work that you are proud of.",
        suggestions: [
            "Last year I led a data migration.",
            "I built a dashboard for our sales team.",
            "I helped redesign our deployment process.",
        ],
    },
    Topic {
        name: "travel",
        level: Level::Intermediate,
        opening: "What is the most interesting place you have visited?",
        suggestions: [
            "I visited Lisbon a few years ago.",
            "I loved the beaches in the north of Brazil.",
            "I haven't traveled much, but I'd like to see Japan.",
        ],
    },
];

/// Picks a topic by name, or the first one suiting the level.
#[must_use]
pub fn pick_topic(requested: Option<&str>, level: Level) -> Option<&'static Topic> {
    match requested {
        Some(name) => TOPICS.iter().find(|t| t.name.eq_ignore_ascii_case(name)),
        None => TOPICS.iter().find(|t| t.level == level),
    }
}

/// Session feedback tier for an error count.
#[must_use]
pub const fn session_feedback(total_errors: usize) -> (&'static str, Quality) {
    match total_errors {
        0 => (
            "Excellent session! No mistakes detected. Keep practicing to stay at this level.",
            5,
        ),
        1..=2 => (
            "Great session! Only a few mistakes. Review the highlighted points to improve even more.",
            4,
        ),
        3..=5 => (
            "Good practice session! Some mistakes were found, which is part of learning. Practice the generated activities.",
            3,
        ),
        _ => (
            "Productive session! Several points to improve were found. Review the activities generated for each mistake.",
            2,
        ),
    }
}

/// Runs the speaking node.
pub async fn run(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    state.speaking.touched = true;
    let action = state.input_str("action").unwrap_or("start").to_string();
    match action.as_str() {
        "start" => start(state, ctx).await,
        "turn" => turn(state, ctx).await,
        "end" => {
            let session = load_session(state, ctx).await?;
            end(state, ctx, session, "speaking_session_end").await
        }
        other => Err(TutorError::invalid_input(format!(
            "unknown speaking action '{other}': expected start, turn or end"
        ))),
    }
}

fn mirror(state: &mut InteractionState, session: &SpeakingSession) {
    state.speaking.session_id = Some(session.id.clone());
    state.speaking.topic = Some(session.topic.clone());
    state.speaking.current_turn = session.current_turn;
    state.speaking.is_active = session.is_active;
}

async fn load_session(state: &InteractionState, ctx: &Context) -> Result<SpeakingSession> {
    let id = state
        .input_str("session_id")
        .map(ToString::to_string)
        .or_else(|| state.speaking.session_id.clone())
        .ok_or_else(|| TutorError::invalid_input("speaking action requires 'session_id'"))?;
    match ctx.sessions.get(&id).await? {
        Some(session) if session.learner_id == state.learner.learner_id => Ok(session),
        _ => Err(TutorError::not_found("speaking session", id)),
    }
}

async fn start(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let level = state.learner.level;
    let requested = state.input_str("topic");
    let topic = pick_topic(requested, level);
    let topic_name = topic
        .map(|t| t.name.to_string())
        .or_else(|| requested.map(ToString::to_string))
        .unwrap_or_else(|| "general conversation".to_string());

    let mut session = SpeakingSession::start(state.learner.learner_id.clone(), topic_name.clone());
    let opening = match ctx
        .content
        .conversation_reply(&topic_name, level, &[], None)
        .await
    {
        Ok(reply) if !reply.reply.is_empty() => reply.reply,
        Ok(_) | Err(_) => topic.map_or_else(
            || format!("Let's talk about {topic_name}. What would you like to say?"),
            |t| t.opening.to_string(),
        ),
    };
    session.push_exchange(Speaker::Tutor, opening.clone());
    ctx.sessions.put(session.clone()).await?;
    mirror(state, &session);

    state.reset_response("speaking_session_start", "success");
    state.respond("session_id", session.id.as_str());
    state.respond("topic", topic_name.as_str());
    state.respond("opening_prompt", opening);
    let suggestions = match (level, topic) {
        (Level::Beginner, Some(t)) => json!(t.suggestions),
        _ => json!([]),
    };
    state.respond("suggested_responses", suggestions);
    state.respond("max_turns", ctx.config.session.max_turns);

    info!(session_id = %session.id, topic = %topic_name, "Speaking session started");
    state.add_message(AGENT, format!("Started speaking session on {topic_name}"));
    Ok(())
}

async fn turn_pronunciation(
    state: &InteractionState,
    ctx: &Context,
    text: &str,
) -> Vec<LearnerError> {
    let assessment = if let Some(precomputed) = state.activity_input.get("assessment") {
        serde_json::from_value::<PronunciationAssessment>(precomputed.clone()).ok()
    } else if let Some(audio) = state.input_str("audio_base64") {
        match ctx.speech.assess_pronunciation(text, audio).await {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                warn!(error = %e, "Pronunciation scoring failed for speaking turn");
                None
            }
        }
    } else {
        None
    };
    assessment.map_or_else(Vec::new, |a| a.learner_errors(WORD_ACCURACY_THRESHOLD))
}

async fn turn(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let mut session = load_session(state, ctx).await?;
    if !session.is_active {
        mirror(state, &session);
        state.reset_response("speaking_turn", "session_ended");
        state.respond("message", "This session has already ended.");
        return Ok(());
    }

    let text = state
        .input_str("user_text")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| TutorError::invalid_input("speaking turn requires 'user_text'"))?;

    let pronunciation_errors = turn_pronunciation(state, ctx, &text).await;
    let level = state.learner.level;
    let (reply, grammar_errors) = match ctx
        .content
        .conversation_reply(
            &session.topic,
            level,
            &session.exchanges,
            Some(text.as_str()),
        )
        .await
    {
        Ok(reply) => (reply.reply, reply.grammar_errors),
        Err(e) => {
            warn!(
                session_id = %session.id,
                error = %e,
                "Conversation reply failed, using fallback"
            );
            (
                "That's interesting! Can you tell me more?".to_string(),
                Vec::new(),
            )
        }
    };

    session.current_turn += 1;
    let turn_number = session.current_turn;
    session.push_exchange(Speaker::Learner, text.as_str());
    session.push_exchange(Speaker::Tutor, reply.as_str());
    session.grammar_errors.extend_from_slice(&grammar_errors);
    session
        .pronunciation_errors
        .extend_from_slice(&pronunciation_errors);

    let errors_detected = grammar_errors.len() + pronunciation_errors.len();
    let limit_reached = turn_number >= ctx.config.session.max_turns;

    state.add_message(
        AGENT,
        format!(
            "Processed turn {turn_number}: detected {} grammar and {} pronunciation errors",
            grammar_errors.len(),
            pronunciation_errors.len()
        ),
    );

    if limit_reached {
        end(state, ctx, session, "speaking_turn").await?;
    } else {
        ctx.sessions.put(session.clone()).await?;
        mirror(state, &session);
        state.reset_response("speaking_turn", "success");
    }

    state.respond("turn_number", turn_number);
    state.respond("user_input", text);
    state.respond("agent_response", reply);
    state.respond("errors_detected", errors_detected);
    state.respond("grammar_errors", serde_json::to_value(&grammar_errors)?);
    state.respond(
        "pronunciation_errors",
        serde_json::to_value(&pronunciation_errors)?,
    );
    state.respond("conversation_continuing", !limit_reached);
    state.respond(
        "end_suggestion",
        if limit_reached {
            Value::from(
                "Turn limit reached. The session was closed so you can review your mistakes.",
            )
        } else {
            Value::Null
        },
    );
    Ok(())
}

async fn end(
    state: &mut InteractionState,
    ctx: &Context,
    mut session: SpeakingSession,
    response_type: &str,
) -> Result<()> {
    session.is_active = false;
    session.last_touched = Utc::now();
    ctx.sessions.delete(&session.id).await?;
    mirror(state, &session);

    let errors = session.all_errors();
    let (feedback, quality) = session_feedback(errors.len());
    let mut rules: Vec<&str> = session
        .grammar_errors
        .iter()
        .filter_map(|e| match e {
            LearnerError::Grammar { rule, .. } => Some(rule.as_str()),
            LearnerError::Pronunciation { .. } => None,
        })
        .collect();
    rules.sort_unstable();
    rules.dedup();
    let mut phonemes: Vec<&str> = session
        .pronunciation_errors
        .iter()
        .filter_map(|e| match e {
            LearnerError::Pronunciation { phoneme, .. } => phoneme.as_deref(),
            LearnerError::Grammar { .. } => None,
        })
        .collect();
    phonemes.sort_unstable();
    phonemes.dedup();

    let duration = session.elapsed_seconds();
    let summary = json!({
        "total_turns": session.current_turn,
        "duration_seconds": duration,
        "total_errors": errors.len(),
        "grammar_error_count": session.grammar_errors.len(),
        "pronunciation_error_count": session.pronunciation_errors.len(),
        "unique_grammar_rules_violated": rules,
        "problematic_phonemes": phonemes,
        "overall_feedback": feedback,
    });

    state.reset_response(response_type, "success");
    state.respond("session_id", session.id.as_str());
    state.respond("session_summary", summary);
    state.respond("errors_pending_activities", errors.len());

    let mut output = ActivityOutput::new(Pillar::Speaking, true, quality);
    output.time_spent_seconds = duration;
    output.errors = errors;
    publish_outcome(state, output);

    info!(
        session_id = %session.id,
        turns = session.current_turn,
        grammar_errors = session.grammar_errors.len(),
        pronunciation_errors = session.pronunciation_errors.len(),
        "Speaking session ended"
    );
    state.add_message(
        AGENT,
        format!(
            "Ended session {}: {} turns, {} grammar errors, {} pronunciation errors",
            session.id,
            session.current_turn,
            session.grammar_errors.len(),
            session.pronunciation_errors.len()
        ),
    );
    Ok(())
}
