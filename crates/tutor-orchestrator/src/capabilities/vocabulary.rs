//! Vocabulary capability.
//!
//! Without an answer in the input it serves an exercise for the best word to
//! practice. With an answer it checks it, updates the word's review record
//! and publishes the outcome.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use tutor_srs::quality_from_response;

use super::{load_profile, publish_outcome, seconds_from_ms, Context};
use crate::error::{Result, TutorError};
use crate::model::{Pillar, ReviewItem};
use crate::scheduler::{apply_practice, Practice};
use crate::services::{context_for_goals, ExerciseRequest};
use crate::state::{ActivityOutput, InteractionState};

const AGENT: &str = "vocabulary";

/// A built-in word used when nothing is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarterWord {
    /// Stable word identifier.
    pub id: &'static str,
    /// The word.
    pub word: &'static str,
    /// Part of speech.
    pub part_of_speech: &'static str,
    /// Short definition.
    pub definition: &'static str,
    /// Example sentence containing the word.
    pub example: &'static str,
    /// Vocabulary context the word belongs to.
    pub context: &'static str,
}

const fn starter(
    id: &'static str,
    word: &'static str,
    part_of_speech: &'static str,
    definition: &'static str,
    example: &'static str,
    context: &'static str,
) -> StarterWord {
    StarterWord {
        id,
        word,
        part_of_speech,
        definition,
        example,
        context,
    }
}

/// Built-in words, most frequent first within each context.
pub const STARTER_WORDS: &[StarterWord] = &[
    starter(
        "w_time",
        "time",
        "noun",
        "The thing measured in minutes and hours.",
        "I don't have much time today.",
        "general",
    ),
    starter(
        "w_people",
        "people",
        "noun",
        "Men, women and children.",
        "Many people live in this city.",
        "general",
    ),
    starter(
        "w_work",
        "work",
        "verb",
        "To do a job.",
        "She works at a hospital.",
        "general",
    ),
    starter(
        "w_important",
        "important",
        "adjective",
        "Having great value or effect.",
        "Sleep is important for your health.",
        "general",
    ),
    starter(
        "w_because",
        "because",
        "conjunction",
        "For the reason that.",
        "I stayed home because it was raining.",
        "general",
    ),
    starter(
        "w_answer",
        "answer",
        "noun",
        "A reply to a question.",
        "Do you know the answer?",
        "general",
    ),
    starter(
        "w_pipeline",
        "pipeline",
        "noun",
        "A sequence of data processing steps.",
        "The pipeline loads the data every night.",
        "data_engineering",
    ),
    starter(
        "w_schema",
        "schema",
        "noun",
        "The structure of a dataset or database.",
        "We changed the schema of the orders table.",
        "data_engineering",
    ),
    starter(
        "w_dataset",
        "dataset",
        "noun",
        "A collection of related data.",
        "The model was trained on a large dataset.",
        "ai",
    ),
    starter(
        "w_inference",
        "inference",
        "noun",
        "Running a trained model on new input.",
        "Inference is fast on this GPU.",
        "ai",
    ),
    starter(
        "w_deploy",
        "deploy",
        "verb",
        "To release software to an environment.",
        "We deploy the app on Fridays.",
        "technology",
    ),
    starter(
        "w_bug",
        "bug",
        "noun",
        "A mistake in a program.",
        "She found a bug in the login page.",
        "technology",
    ),
];

const DISTRACTORS: [&str; 3] = ["something", "anything", "nothing"];

/// Looks up a built-in word by identifier.
#[must_use]
pub fn starter_word(id: &str) -> Option<&'static StarterWord> {
    STARTER_WORDS.iter().find(|w| w.id == id)
}

/// Mastery label for a word's review record.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use tutor_orchestrator::capabilities::vocabulary::mastery_level;
/// use tutor_orchestrator::model::{Pillar, ReviewItem};
/// use tutor_srs::SrsConfig;
///
/// let config = SrsConfig::default();
/// let item = ReviewItem::new("ana", "w_time", Pillar::Vocabulary, &config, Utc::now());
/// assert_eq!(mastery_level(&item), "new");
/// ```
#[must_use]
pub fn mastery_level(item: &ReviewItem) -> &'static str {
    if item.practice_count == 0 {
        return "new";
    }
    let reps = item.srs.repetition_count;
    match item.accuracy {
        a if reps >= 5 && a >= 85.0 => "mastered",
        a if reps >= 2 && a >= 70.0 => "reviewing",
        _ if reps >= 1 => "learning",
        _ => "new",
    }
}

/// Deterministic multiple-choice exercise built from a word's own data.
#[must_use]
pub fn fallback_exercise(word: &str, definition: &str, example: &str) -> Value {
    let sentence = if example.contains(word) {
        example.replacen(word, "___", 1)
    } else {
        "Please use the word ___ in a sentence.".to_string()
    };
    let mut options: Vec<&str> = std::iter::once(word).chain(DISTRACTORS).collect();
    let correct_index = word.len() % options.len();
    options.swap(0, correct_index);

    json!({
        "type": "fill_in_blank",
        "sentence": sentence,
        "options": options,
        "correct_answer": word,
        "correct_index": correct_index,
        "explanation": definition,
        "example_usage": example,
    })
}

/// Checks an answer given as option index or text.
///
/// An index answer is compared to `correct_index` when both are present;
/// anything else falls back to a trimmed, case-insensitive text comparison.
#[must_use]
pub fn check_answer(
    answer: &Value,
    correct_answer: Option<&str>,
    correct_index: Option<u64>,
) -> bool {
    if let Some(index) = correct_index {
        let given = answer
            .as_u64()
            .or_else(|| answer.as_str().and_then(|s| s.trim().parse().ok()));
        if let Some(given) = given {
            return given == index;
        }
    }
    match (answer.as_str(), correct_answer) {
        (Some(given), Some(expected)) => given.trim().eq_ignore_ascii_case(expected.trim()),
        _ => false,
    }
}

/// Runs the vocabulary node.
pub async fn run(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    if state.activity_input.get("answer").is_some() {
        process_answer(state, ctx).await
    } else {
        serve_exercise(state, ctx).await
    }
}

struct Selected {
    id: String,
    word: String,
    part_of_speech: Option<&'static str>,
    definition: &'static str,
    example: &'static str,
    due: bool,
}

impl Selected {
    fn from_starter(word: &StarterWord) -> Self {
        Self {
            id: word.id.to_string(),
            word: word.word.to_string(),
            part_of_speech: Some(word.part_of_speech),
            definition: word.definition,
            example: word.example,
            due: false,
        }
    }

    fn from_item(item: &ReviewItem) -> Self {
        if let Some(word) = starter_word(&item.item_id) {
            return Self {
                due: true,
                ..Self::from_starter(word)
            };
        }
        let word = if item.text.is_empty() {
            item.item_id.clone()
        } else {
            item.text.clone()
        };
        Self {
            id: item.item_id.clone(),
            word,
            part_of_speech: None,
            definition: "",
            example: "",
            due: true,
        }
    }
}

async fn select_word(
    state: &InteractionState,
    ctx: &Context,
    context: &str,
) -> Result<Option<Selected>> {
    let learner_id = &state.learner.learner_id;
    let now = Utc::now();

    if let Some(id) = state.input_str("word_id") {
        if let Some(item) = ctx.store.get_review_item(learner_id, id).await? {
            return Ok(Some(Selected::from_item(&item)));
        }
        return starter_word(id)
            .map(|w| Some(Selected::from_starter(w)))
            .ok_or_else(|| TutorError::not_found("word", id));
    }

    let due = ctx
        .store
        .due_items(learner_id, Pillar::Vocabulary, now)
        .await?;
    if let Some(item) = due.first() {
        return Ok(Some(Selected::from_item(item)));
    }

    let known = ctx
        .store
        .list_review_items(learner_id, Pillar::Vocabulary)
        .await?;
    let unseen = |w: &&StarterWord| !known.iter().any(|k| k.item_id == w.id);
    let fresh = STARTER_WORDS
        .iter()
        .filter(|w| w.context == context)
        .find(unseen)
        .or_else(|| {
            STARTER_WORDS
                .iter()
                .filter(|w| w.context == "general")
                .find(unseen)
        })
        .or_else(|| STARTER_WORDS.iter().find(unseen));
    Ok(fresh.map(Selected::from_starter))
}

async fn serve_exercise(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let context = context_for_goals(&state.learner.learning_goals);
    let Some(word) = select_word(state, ctx, context).await? else {
        state.reset_response("vocabulary_exercise", "no_words");
        state.respond(
            "message",
            "Every available word has been learned. Well done!",
        );
        state.add_message(AGENT, "No words left to practice");
        return Ok(());
    };

    let request = ExerciseRequest {
        pillar: Pillar::Vocabulary,
        kind: "multiple_choice".to_string(),
        level: state.learner.level,
        focus: word.word.clone(),
        context: context.to_string(),
    };
    let (exercise, fallback) = ctx
        .exercise_or(&request, || {
            fallback_exercise(&word.word, word.definition, word.example)
        })
        .await;

    let activity_id = format!(
        "vocab_{}_{}",
        state.learner.learner_id,
        Utc::now().timestamp_millis()
    );
    state.current_activity = Some(json!({
        "activity_id": activity_id,
        "pillar": "vocabulary",
        "word_id": word.id,
        "word": word.word,
        "exercise": exercise,
    }));

    state.reset_response("vocabulary_exercise", "success");
    state.respond("activity_id", activity_id);
    state.respond("word_id", word.id.as_str());
    state.respond("word", word.word.as_str());
    state.respond(
        "part_of_speech",
        word.part_of_speech.map_or(Value::Null, Value::from),
    );
    state.respond("due_review", word.due);
    state.respond("context", context);
    state.respond("exercise", exercise);
    state.respond("fallback_content", fallback);

    debug!(word_id = %word.id, fallback, "Served vocabulary exercise");
    state.add_message(
        AGENT,
        format!("Generated vocabulary exercise for word: {}", word.word),
    );
    Ok(())
}

async fn process_answer(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let Some(word_id) = state.input_str("word_id").map(ToString::to_string) else {
        return Err(TutorError::invalid_input("vocabulary answer requires 'word_id'"));
    };
    let correct_answer = state.input_str("correct_answer").map(ToString::to_string);
    let correct_index = state.input_u64("correct_index");
    if correct_answer.is_none() && correct_index.is_none() {
        return Err(TutorError::invalid_input(
            "vocabulary answer requires 'correct_answer' or 'correct_index'",
        ));
    }

    let answer = state
        .activity_input
        .get("answer")
        .cloned()
        .unwrap_or(Value::Null);
    let correct = check_answer(&answer, correct_answer.as_deref(), correct_index);
    let response_ms = state
        .input_u64("response_time_ms")
        .unwrap_or(ctx.config.srs.expected_response_ms);
    let quality = quality_from_response(correct, response_ms, ctx.config.srs.expected_response_ms);

    let profile = load_profile(state, ctx).await?;
    let text = starter_word(&word_id).map_or(word_id.as_str(), |w| w.word);
    let now = Utc::now();
    let item = apply_practice(
        ctx.store.as_ref(),
        &ctx.config.srs,
        Practice {
            learner_id: &profile.id,
            item_id: &word_id,
            pillar: Pillar::Vocabulary,
            text,
            quality,
            accuracy: if correct { 100.0 } else { 0.0 },
        },
        now,
    )
    .await?;
    let mastery = mastery_level(&item);

    let explanation = state
        .input_str("explanation")
        .map(ToString::to_string)
        .or_else(|| starter_word(&word_id).map(|w| w.definition.to_string()))
        .unwrap_or_default();

    state.reset_response("vocabulary_answer", "success");
    state.respond("correct", correct);
    state.respond("user_answer", answer);
    state.respond(
        "correct_answer",
        correct_answer.map_or(Value::Null, Value::from),
    );
    state.respond("explanation", explanation);
    state.respond("quality", quality);
    state.respond("mastery_level", mastery);
    state.respond("next_review_days", item.srs.interval_days);
    state.respond("next_review", item.srs.next_due.to_rfc3339());

    let mut output = ActivityOutput::new(Pillar::Vocabulary, correct, quality);
    output.item_id = Some(word_id.clone());
    output.accuracy = Some(if correct { 100.0 } else { 0.0 });
    output.score = Some(u32::from(quality) * 20);
    output.time_spent_seconds = seconds_from_ms(response_ms);
    publish_outcome(state, output);

    info!(word_id = %word_id, correct, quality, mastery, "Vocabulary answer processed");
    state.add_message(
        AGENT,
        format!("Processed answer for word: {word_id}, correct: {correct}"),
    );
    Ok(())
}
