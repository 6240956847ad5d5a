//! Grammar capability: lessons, explanation scoring and exercise sets.
//!
//! The walk is stateless across requests, so exercise answers arrive
//! together with the expected answers the client received with the set.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use tutor_srs::{quality_from_accuracy, quality_from_response};

use super::vocabulary::{check_answer, mastery_level};
use super::{publish_outcome, seconds_from_ms, Context};
use crate::error::{Result, TutorError};
use crate::model::{Pillar, ReviewItem};
use crate::router::RequestType;
use crate::scheduler::{apply_practice, Practice};
use crate::services::{context_for_goals, ExerciseRequest};
use crate::state::{ActivityOutput, InteractionState, LearnerError};

const AGENT: &str = "grammar";

/// Explanation score needed to pass a lesson.
pub const MIN_EXPLANATION_SCORE: f64 = 70.0;

/// Share of correct answers needed to pass an exercise set.
pub const PASSING_ACCURACY: f64 = 0.6;

/// A built-in grammar rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarterRule {
    /// Stable rule identifier.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Rule family.
    pub category: &'static str,
    /// Short explanation.
    pub explanation: &'static str,
    /// Typical mistakes as `(incorrect, correct)`.
    pub common_errors: &'static [(&'static str, &'static str)],
    /// Correct example sentences.
    pub examples: &'static [&'static str],
}

/// Built-in rules in teaching order.
pub const STARTER_RULES: &[StarterRule] = &[
    StarterRule {
        id: "present_simple_third_person",
        name: "Present simple: third person -s",
        category: "verb_tenses",
        explanation: "Add -s or -es to the verb after he, she and it.",
        common_errors: &[
            ("She work here.", "She works here."),
            ("He go to school.", "He goes to school."),
        ],
        examples: &["My brother plays the guitar.", "It rains a lot in April."],
    },
    StarterRule {
        id: "articles_a_an",
        name: "Articles: a and an",
        category: "articles",
        explanation: "Use 'an' before a vowel sound and 'a' before a consonant sound.",
        common_errors: &[
            ("I ate a apple.", "I ate an apple."),
            ("She is an teacher.", "She is a teacher."),
        ],
        examples: &["He waited an hour.", "We saw a university."],
    },
    StarterRule {
        id: "past_simple_regular",
        name: "Past simple: regular verbs",
        category: "verb_tenses",
        explanation: "Regular verbs form the past simple with -ed.",
        common_errors: &[("Yesterday I walk home.", "Yesterday I walked home.")],
        examples: &["They watched a film last night.", "I cleaned the kitchen."],
    },
    StarterRule {
        id: "there_is_there_are",
        name: "There is and there are",
        category: "sentence_structure",
        explanation: "Use 'there is' with singular nouns and 'there are' with plural nouns.",
        common_errors: &[
            ("There is many people here.", "There are many people here."),
            ("Have a book on the table.", "There is a book on the table."),
        ],
        examples: &[
            "There are two cats in the garden.",
            "There is a problem with the report.",
        ],
    },
];

/// Looks up a built-in rule by identifier.
#[must_use]
pub fn starter_rule(id: &str) -> Option<&'static StarterRule> {
    STARTER_RULES.iter().find(|r| r.id == id)
}

/// Exercises built from a rule's own data.
///
/// Common errors become two-option corrections; examples become
/// fill-in-the-blank items with the last word removed. At most five.
#[must_use]
pub fn fallback_exercises(rule: &StarterRule) -> Vec<Value> {
    let corrections = rule.common_errors.iter().map(|(incorrect, correct)| {
        json!({
            "type": "error_correction",
            "instruction": "Choose the correct sentence:",
            "sentence": "Which is correct?",
            "options": [incorrect, correct],
            "correct_answer": correct,
            "correct_index": 1,
            "explanation": rule.explanation,
        })
    });
    let blanks = rule.examples.iter().filter_map(|example| {
        let body = example.trim_end_matches(['.', '!', '?']);
        let (head, last) = body.rsplit_once(' ')?;
        Some(json!({
            "type": "fill_in_blank",
            "instruction": "Complete the sentence:",
            "sentence": format!("{head} ___{}", &example[body.len()..]),
            "options": null,
            "correct_answer": last,
            "correct_index": null,
            "explanation": format!("The correct sentence is: {example}"),
        }))
    });
    corrections.chain(blanks).take(5).collect()
}

/// One answered exercise.
#[derive(Debug, Clone, Deserialize)]
pub struct ExerciseAnswer {
    /// The learner's answer, as option index or text.
    #[serde(default)]
    pub answer: Value,
    /// Expected text answer.
    #[serde(default)]
    pub correct_answer: Option<String>,
    /// Expected option index.
    #[serde(default)]
    pub correct_index: Option<u64>,
}

impl ExerciseAnswer {
    /// Whether the answer matches.
    #[must_use]
    pub fn is_correct(&self) -> bool {
        check_answer(
            &self.answer,
            self.correct_answer.as_deref(),
            self.correct_index,
        )
    }
}

/// Runs the grammar node.
pub async fn run(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let lesson = state.request_type.parse::<RequestType>().ok() == Some(RequestType::GrammarLesson);
    let input = &state.activity_input;
    match (lesson, input.get("score").is_some(), has_answers(input)) {
        (true, true, _) => score_explanation(state, ctx).await,
        (true, false, _) => serve_lesson(state, ctx).await,
        (false, _, true) => score_exercises(state, ctx).await,
        (false, _, false) => serve_exercises(state, ctx).await,
    }
}

fn has_answers(input: &Value) -> bool {
    input.get("answers").is_some() || input.get("answer").is_some()
}

async fn select_rule(
    state: &InteractionState,
    ctx: &Context,
) -> Result<Option<&'static StarterRule>> {
    let learner_id = &state.learner.learner_id;
    if let Some(id) = state.input_str("rule_id") {
        return starter_rule(id)
            .map(Some)
            .ok_or_else(|| TutorError::not_found("grammar rule", id));
    }

    let due = ctx
        .store
        .due_items(learner_id, Pillar::Grammar, Utc::now())
        .await?;
    if let Some(rule) = due.iter().find_map(|item| starter_rule(&item.item_id)) {
        return Ok(Some(rule));
    }

    let known = ctx
        .store
        .list_review_items(learner_id, Pillar::Grammar)
        .await?;
    let category = state.input_str("category");
    Ok(STARTER_RULES
        .iter()
        .filter(|r| category.map_or(true, |c| r.category == c))
        .find(|r| !known.iter().any(|k| k.item_id == r.id)))
}

fn rule_json(rule: &StarterRule) -> Value {
    json!({
        "id": rule.id,
        "name": rule.name,
        "category": rule.category,
        "explanation": rule.explanation,
        "common_errors": rule
            .common_errors
            .iter()
            .map(|(incorrect, correct)| json!({"incorrect": incorrect, "correct": correct}))
            .collect::<Vec<_>>(),
        "examples": rule.examples,
    })
}

fn no_rules(state: &mut InteractionState, response_type: &str) {
    state.reset_response(response_type, "no_rules");
    state.respond(
        "message",
        "Every available rule has been studied. Well done!",
    );
    state.add_message(AGENT, "No grammar rules left to study");
}

async fn serve_lesson(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let Some(rule) = select_rule(state, ctx).await? else {
        no_rules(state, "grammar_lesson");
        return Ok(());
    };

    let request = ExerciseRequest {
        pillar: Pillar::Grammar,
        kind: "lesson".to_string(),
        level: state.learner.level,
        focus: rule.id.to_string(),
        context: context_for_goals(&state.learner.learning_goals).to_string(),
    };
    let (lesson, fallback) = ctx.exercise_or(&request, || rule_json(rule)).await;

    let progress = ctx
        .store
        .get_review_item(&state.learner.learner_id, rule.id)
        .await?;
    let user_progress = progress.as_ref().map_or_else(
        || json!({"practice_count": 0, "accuracy": 0.0, "mastery_level": "not_started"}),
        |item| {
            json!({
                "practice_count": item.practice_count,
                "accuracy": item.accuracy,
                "mastery_level": mastery_level(item),
                "last_practiced": item.last_practiced,
            })
        },
    );

    state.current_activity = Some(json!({"pillar": "grammar", "rule_id": rule.id}));
    state.reset_response("grammar_lesson", "success");
    state.respond("rule", rule_json(rule));
    state.respond("lesson", lesson);
    state.respond("user_progress", user_progress);
    state.respond("fallback_content", fallback);
    state.add_message(
        AGENT,
        format!("Generated grammar lesson for rule: {}", rule.name),
    );
    Ok(())
}

async fn serve_exercises(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let Some(rule) = select_rule(state, ctx).await? else {
        no_rules(state, "grammar_exercises");
        return Ok(());
    };

    let request = ExerciseRequest {
        pillar: Pillar::Grammar,
        kind: "exercise_set".to_string(),
        level: state.learner.level,
        focus: rule.id.to_string(),
        context: context_for_goals(&state.learner.learning_goals).to_string(),
    };
    let (generated, fallback) = ctx
        .exercise_or(&request, || Value::Array(fallback_exercises(rule)))
        .await;
    let exercises = match generated {
        Value::Array(items) if !items.is_empty() => items,
        Value::Object(mut set) => match set.remove("exercises") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => fallback_exercises(rule),
        },
        _ => fallback_exercises(rule),
    };

    state.current_activity = Some(json!({"pillar": "grammar", "rule_id": rule.id}));
    state.reset_response("grammar_exercises", "success");
    state.respond("rule_id", rule.id);
    state.respond("rule_name", rule.name);
    state.respond("total_exercises", exercises.len());
    state.respond("fallback_content", fallback);
    let count = exercises.len();
    state.respond("exercises", Value::Array(exercises));
    state.add_message(
        AGENT,
        format!("Generated {count} exercises for rule: {}", rule.name),
    );
    Ok(())
}

fn required_rule_id(state: &InteractionState) -> Result<String> {
    state
        .input_str("rule_id")
        .map(ToString::to_string)
        .ok_or_else(|| TutorError::invalid_input("grammar answers require 'rule_id'"))
}

async fn practice(
    state: &InteractionState,
    ctx: &Context,
    rule_id: &str,
    quality: u8,
    accuracy: f64,
) -> Result<ReviewItem> {
    let text = starter_rule(rule_id).map_or(rule_id, |r| r.name);
    apply_practice(
        ctx.store.as_ref(),
        &ctx.config.srs,
        Practice {
            learner_id: &state.learner.learner_id,
            item_id: rule_id,
            pillar: Pillar::Grammar,
            text,
            quality,
            accuracy,
        },
        Utc::now(),
    )
    .await
}

async fn score_explanation(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let rule_id = required_rule_id(state)?;
    let score = state
        .input_f64("score")
        .filter(|s| (0.0..=100.0).contains(s))
        .ok_or_else(|| TutorError::invalid_input("'score' must be a number between 0 and 100"))?;

    let passed = score >= MIN_EXPLANATION_SCORE;
    let quality = quality_from_accuracy(score);
    let item = practice(state, ctx, &rule_id, quality, score).await?;

    state.reset_response("grammar_explanation", "success");
    state.respond("rule_id", rule_id.as_str());
    state.respond("score", score);
    state.respond("passed", passed);
    state.respond("quality", quality);
    state.respond("mastery_level", mastery_level(&item));
    state.respond("next_review_days", item.srs.interval_days);

    let mut output = ActivityOutput::new(Pillar::Grammar, passed, quality);
    output.item_id = Some(rule_id.clone());
    output.accuracy = Some(score);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = score.round() as u32;
    output.score = Some(rounded);
    publish_outcome(state, output);

    state.add_message(
        AGENT,
        format!("Scored explanation for rule: {rule_id}, passed: {passed}"),
    );
    Ok(())
}

fn collect_answers(input: &Value) -> Result<Vec<ExerciseAnswer>> {
    let parsed = match input.get("answers") {
        Some(answers) => serde_json::from_value::<Vec<ExerciseAnswer>>(answers.clone()),
        None => serde_json::from_value::<ExerciseAnswer>(input.clone()).map(|a| vec![a]),
    };
    let answers = parsed.map_err(|e| TutorError::invalid_input(format!("malformed answers: {e}")))?;
    if answers.is_empty() {
        return Err(TutorError::invalid_input("'answers' must not be empty"));
    }
    if answers
        .iter()
        .any(|a| a.correct_answer.is_none() && a.correct_index.is_none())
    {
        return Err(TutorError::invalid_input(
            "every answer requires 'correct_answer' or 'correct_index'",
        ));
    }
    Ok(answers)
}

async fn score_exercises(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let rule_id = required_rule_id(state)?;
    let answers = collect_answers(&state.activity_input)?;
    let response_ms = state
        .input_u64("response_time_ms")
        .unwrap_or(ctx.config.srs.expected_response_ms);

    let results: Vec<bool> = answers.iter().map(ExerciseAnswer::is_correct).collect();
    let correct_count = results.iter().filter(|c| **c).count();
    #[allow(clippy::cast_precision_loss)]
    let accuracy = correct_count as f64 / answers.len() as f64;
    let passed = accuracy >= PASSING_ACCURACY;
    let quality = quality_from_response(passed, response_ms, ctx.config.srs.expected_response_ms);

    let item = practice(state, ctx, &rule_id, quality, accuracy * 100.0).await?;

    let errors: Vec<LearnerError> = answers
        .iter()
        .zip(&results)
        .filter(|(_, correct)| !**correct)
        .map(|(a, _)| LearnerError::Grammar {
            rule: rule_id.clone(),
            incorrect: a
                .answer
                .as_str()
                .map_or_else(|| a.answer.to_string(), ToString::to_string),
            correction: a.correct_answer.clone().unwrap_or_default(),
        })
        .collect();

    state.reset_response("grammar_exercise_answer", "success");
    state.respond("rule_id", rule_id.as_str());
    state.respond("correct", passed);
    state.respond("results", json!(results));
    state.respond("exercises_completed", answers.len());
    state.respond("exercises_correct", correct_count);
    state.respond("accuracy", accuracy);
    state.respond("quality", quality);
    state.respond("mastery_level", mastery_level(&item));
    state.respond("next_review_days", item.srs.interval_days);

    let mut output = ActivityOutput::new(Pillar::Grammar, passed, quality);
    output.item_id = Some(rule_id.clone());
    output.accuracy = Some(accuracy * 100.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = (accuracy * 100.0).round() as u32;
    output.score = Some(percent);
    output.time_spent_seconds = seconds_from_ms(response_ms);
    output.errors = errors;
    publish_outcome(state, output);

    info!(
        rule_id = %rule_id,
        correct_count,
        total = answers.len(),
        quality,
        "Grammar exercises scored"
    );
    state.add_message(
        AGENT,
        format!(
            "Processed {} answers for rule: {rule_id}, {correct_count} correct",
            answers.len()
        ),
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capabilities::testing::{context, state};
    use crate::store::Persistence;

    // ------------------------------------------------------------------------
    // Fallback content
    // ------------------------------------------------------------------------

    #[test]
    fn test_fallback_exercises_from_rule_data() {
        let rule = starter_rule("articles_a_an").unwrap();
        let exercises = fallback_exercises(rule);
        assert_eq!(exercises.len(), 4);
        assert_eq!(exercises[0]["correct_answer"], "I ate an apple.");
        assert_eq!(exercises[0]["correct_index"], 1);
        assert_eq!(exercises[2]["sentence"], "He waited an ___.");
        assert_eq!(exercises[2]["correct_answer"], "hour");
    }

    #[test]
    fn test_every_starter_rule_has_exercises() {
        for rule in STARTER_RULES {
            let exercises = fallback_exercises(rule);
            assert!(!exercises.is_empty(), "{}", rule.id);
            assert!(exercises.len() <= 5);
        }
    }

    // ------------------------------------------------------------------------
    // Lessons
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_lesson_picks_first_unseen_rule() {
        let (ctx, _store) = context();
        let mut state = state("grammar_lesson", json!({}));
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "grammar_lesson");
        assert_eq!(state.response["rule"]["id"], "present_simple_third_person");
        assert_eq!(
            state.response["user_progress"]["mastery_level"],
            "not_started"
        );
        assert_eq!(state.response["fallback_content"], true);
        assert!(state.activity_output.is_none());
    }

    #[tokio::test]
    async fn test_lesson_filters_by_category() {
        let (ctx, _store) = context();
        let mut state = state("grammar_lesson", json!({"category": "articles"}));
        run(&mut state, &ctx).await.unwrap();
        assert_eq!(state.response["rule"]["id"], "articles_a_an");
    }

    #[tokio::test]
    async fn test_unknown_rule_is_not_found() {
        let (ctx, _store) = context();
        let mut state = state("grammar_lesson", json!({"rule_id": "subjunctive"}));
        let err = run(&mut state, &ctx).await.unwrap_err();
        assert!(matches!(err, TutorError::NotFound { kind, .. } if kind == "grammar rule"));
    }

    #[tokio::test]
    async fn test_explanation_score_updates_rule() {
        let (ctx, store) = context();
        let mut state = state(
            "grammar_lesson",
            json!({"rule_id": "articles_a_an", "score": 88}),
        );
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "grammar_explanation");
        assert_eq!(state.response["passed"], true);
        assert_eq!(state.response["quality"], 4);
        let output = state.activity_output.as_ref().unwrap();
        assert_eq!(output.score, Some(88));
        let item = store
            .get_review_item("ana", "articles_a_an")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.text, "Articles: a and an");
    }

    #[tokio::test]
    async fn test_explanation_score_out_of_range() {
        let (ctx, _store) = context();
        let mut state = state(
            "grammar_lesson",
            json!({"rule_id": "articles_a_an", "score": 140}),
        );
        assert!(run(&mut state, &ctx).await.is_err());
    }

    // ------------------------------------------------------------------------
    // Exercises
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_exercise_set_served_with_answers() {
        let (ctx, _store) = context();
        let mut state = state(
            "grammar_exercise",
            json!({"rule_id": "past_simple_regular"}),
        );
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "grammar_exercises");
        assert_eq!(state.response["total_exercises"], 3);
        assert_eq!(
            state.response["exercises"][0]["correct_answer"],
            "Yesterday I walked home."
        );
    }

    #[tokio::test]
    async fn test_answers_scored_and_errors_collected() {
        let (ctx, store) = context();
        let mut state = state(
            "grammar_exercise",
            json!({
                "rule_id": "articles_a_an",
                "response_time_ms": 2000,
                "answers": [
                    {"answer": 1, "correct_index": 1, "correct_answer": "I ate an apple."},
                    {"answer": "a hour", "correct_answer": "an hour"},
                    {"answer": "hour", "correct_answer": "hour"},
                ],
            }),
        );
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "grammar_exercise_answer");
        assert_eq!(state.response["exercises_correct"], 2);
        assert_eq!(state.response["correct"], true);
        assert_eq!(state.response["results"], json!([true, false, true]));
        assert!(state.errors.has_errors);
        assert_eq!(
            state.errors.pending_errors,
            vec![LearnerError::Grammar {
                rule: "articles_a_an".to_string(),
                incorrect: "a hour".to_string(),
                correction: "an hour".to_string(),
            }]
        );
        let output = state.activity_output.as_ref().unwrap();
        assert_eq!(output.score, Some(67));
        assert_eq!(output.quality, 5);
        let item = store.get_review_item("ana", "articles_a_an").await.unwrap();
        assert!(item.is_some());
    }

    #[tokio::test]
    async fn test_single_answer_below_passing() {
        let (ctx, _store) = context();
        let mut state = state(
            "grammar_exercise",
            json!({
                "rule_id": "articles_a_an",
                "answer": 0,
                "correct_index": 1,
                "response_time_ms": 1000,
            }),
        );
        run(&mut state, &ctx).await.unwrap();
        assert_eq!(state.response["correct"], false);
        assert_eq!(state.activity_output.as_ref().unwrap().quality, 2);
        assert_eq!(state.errors.pending_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_answers_without_rule_are_invalid() {
        let (ctx, _store) = context();
        let mut state = state(
            "grammar_exercise",
            json!({"answer": "x", "correct_answer": "y"}),
        );
        let err = run(&mut state, &ctx).await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidInput { .. }));
    }
}
