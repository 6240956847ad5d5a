//! Error integration capability.
//!
//! Turns the mistakes collected during an activity into remedial activities
//! stored on the learner's profile.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use super::{load_profile, Context};
use crate::error::Result;
use crate::model::{PendingActivity, Pillar};
use crate::router::RequestType;
use crate::state::{InteractionState, LearnerError};

const AGENT: &str = "error_integration";

/// A grammar rule broken one or more times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarGroup {
    /// The broken rule.
    pub rule: String,
    /// Times the rule was broken.
    pub occurrences: usize,
    /// The most informative example, `incorrect -> correction`.
    pub example: Option<String>,
}

/// A sound or word mispronounced one or more times.
#[derive(Debug, Clone, PartialEq)]
pub struct PronunciationGroup {
    /// Phoneme when known, else the word.
    pub focus: String,
    /// Word of the worst occurrence.
    pub word: String,
    /// Times the sound was mispronounced.
    pub occurrences: usize,
    /// Mean accuracy across occurrences.
    pub average_accuracy: f64,
}

/// Groups grammar mistakes by rule, most frequent first.
///
/// Ties keep first-seen order.
#[must_use]
pub fn group_grammar(errors: &[LearnerError]) -> Vec<GrammarGroup> {
    let mut groups: Vec<GrammarGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for error in errors {
        let LearnerError::Grammar {
            rule,
            incorrect,
            correction,
        } = error
        else {
            continue;
        };
        let example = (!incorrect.is_empty()).then(|| format!("{incorrect} -> {correction}"));
        if let Some(&i) = index.get(rule.as_str()) {
            let group = &mut groups[i];
            group.occurrences += 1;
            let longer = example
                .as_ref()
                .is_some_and(|e| group.example.as_ref().map_or(true, |g| e.len() > g.len()));
            if longer {
                group.example = example;
            }
        } else {
            index.insert(rule, groups.len());
            groups.push(GrammarGroup {
                rule: rule.clone(),
                occurrences: 1,
                example,
            });
        }
    }

    groups.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    groups
}

/// Groups pronunciation mistakes by phoneme, or by word when no phoneme was
/// isolated. Worst average accuracy first.
#[must_use]
pub fn group_pronunciation(errors: &[LearnerError]) -> Vec<PronunciationGroup> {
    struct Acc<'a> {
        focus: &'a str,
        worst_word: &'a str,
        worst: f64,
        sum: f64,
        count: usize,
    }

    let mut order: Vec<Acc<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for error in errors {
        let LearnerError::Pronunciation {
            word,
            phoneme,
            accuracy,
        } = error
        else {
            continue;
        };
        let focus = phoneme.as_deref().unwrap_or(word);
        if let Some(&i) = index.get(focus) {
            let acc = &mut order[i];
            acc.sum += accuracy;
            acc.count += 1;
            if *accuracy < acc.worst {
                acc.worst = *accuracy;
                acc.worst_word = word.as_str();
            }
        } else {
            index.insert(focus, order.len());
            order.push(Acc {
                focus,
                worst_word: word,
                worst: *accuracy,
                sum: *accuracy,
                count: 1,
            });
        }
    }

    let mut groups: Vec<PronunciationGroup> = order
        .into_iter()
        .map(|acc| {
            #[allow(clippy::cast_precision_loss)]
            let average = acc.sum / acc.count as f64;
            PronunciationGroup {
                focus: acc.focus.to_string(),
                word: acc.worst_word.to_string(),
                occurrences: acc.count,
                average_accuracy: (average * 10.0).round() / 10.0,
            }
        })
        .collect();
    groups.sort_by(|a, b| a.average_accuracy.total_cmp(&b.average_accuracy));
    groups
}

/// Splits `max` activities between grammar and pronunciation groups.
///
/// When both lists fit they are kept whole. Otherwise pronunciation gets up
/// to half of the budget plus one and grammar the rest.
///
/// # Examples
///
/// ```
/// use tutor_orchestrator::capabilities::error_integration::split_budget;
///
/// assert_eq!(split_budget(3, 2, 10), (3, 2));
/// assert_eq!(split_budget(12, 12, 10), (4, 6));
/// assert_eq!(split_budget(12, 1, 10), (9, 1));
/// ```
#[must_use]
pub fn split_budget(grammar: usize, pronunciation: usize, max: usize) -> (usize, usize) {
    if grammar + pronunciation <= max {
        return (grammar, pronunciation);
    }
    let pronunciation_limit = pronunciation.min(max / 2 + 1).min(max);
    let grammar_limit = (max - pronunciation_limit).min(grammar);
    (grammar_limit, pronunciation_limit)
}

fn pending_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("act_{}", &suffix[..8])
}

/// Builds remedial activities for a batch of learner errors.
#[must_use]
pub fn plan_activities(
    errors: &[LearnerError],
    max: usize,
    now: DateTime<Utc>,
) -> Vec<PendingActivity> {
    let grammar = group_grammar(errors);
    let pronunciation = group_pronunciation(errors);
    let (grammar_limit, pronunciation_limit) =
        split_budget(grammar.len(), pronunciation.len(), max);

    let grammar_activities = grammar.into_iter().take(grammar_limit).map(|g| PendingActivity {
        id: pending_id(),
        pillar: Pillar::Grammar,
        kind: RequestType::GrammarExercise.as_str().to_string(),
        focus: g.rule,
        example: g.example,
        created_at: now,
    });
    let pronunciation_activities = pronunciation
        .into_iter()
        .take(pronunciation_limit)
        .map(|p| PendingActivity {
            id: pending_id(),
            pillar: Pillar::Pronunciation,
            kind: RequestType::PronunciationExercise.as_str().to_string(),
            example: (p.word != p.focus).then_some(p.word),
            focus: p.focus,
            created_at: now,
        });

    grammar_activities.chain(pronunciation_activities).collect()
}

/// Runs the error integration node.
pub async fn run(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    if !state.errors.has_errors || state.errors.pending_errors.is_empty() {
        debug!(request_id = %state.request_id, "No errors to process");
        state.add_message(AGENT, "No errors to process");
        return Ok(());
    }

    let errors = std::mem::take(&mut state.errors.pending_errors);
    let planned = plan_activities(&errors, ctx.config.policy.max_error_activities, Utc::now());

    let mut profile = load_profile(state, ctx).await?;
    let mut generated = Vec::with_capacity(planned.len());
    for activity in planned {
        let already_pending = profile
            .pending_activities
            .iter()
            .any(|a| a.pillar == activity.pillar && a.focus == activity.focus);
        if already_pending {
            debug!(focus = %activity.focus, "Remedial activity already pending");
            continue;
        }
        generated.push(activity.id.clone());
        profile.pending_activities.push(activity);
    }
    ctx.store.put_learner(&profile).await?;

    info!(
        learner_id = %profile.id,
        errors = errors.len(),
        activities = generated.len(),
        "Generated remedial activities"
    );
    state.add_message_with_data(
        AGENT,
        format!(
            "Generated {} corrective activities from {} errors",
            generated.len(),
            errors.len()
        ),
        json!({ "activity_ids": generated }),
    );
    state.respond("generated_activities", json!(generated));
    state.respond("activities_count", generated.len());
    state.errors.generated_activity_ids = generated;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capabilities::testing::{context, state};
    use crate::store::Persistence;

    fn grammar(rule: &str, incorrect: &str) -> LearnerError {
        LearnerError::Grammar {
            rule: rule.to_string(),
            incorrect: incorrect.to_string(),
            correction: "fixed".to_string(),
        }
    }

    fn sound(word: &str, phoneme: Option<&str>, accuracy: f64) -> LearnerError {
        LearnerError::Pronunciation {
            word: word.to_string(),
            phoneme: phoneme.map(ToString::to_string),
            accuracy,
        }
    }

    // ------------------------------------------------------------------------
    // Grouping
    // ------------------------------------------------------------------------

    #[test]
    fn test_grammar_grouped_by_rule_most_frequent_first() {
        let errors = vec![
            grammar("articles", "a apple"),
            grammar("past_simple", "I goed"),
            grammar("past_simple", "she runned home"),
            sound("think", Some("θ"), 40.0),
        ];
        let groups = group_grammar(&errors);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].rule, "past_simple");
        assert_eq!(groups[0].occurrences, 2);
        assert_eq!(
            groups[0].example.as_deref(),
            Some("she runned home -> fixed")
        );
        assert_eq!(groups[1].rule, "articles");
    }

    #[test]
    fn test_pronunciation_grouped_by_phoneme_or_word() {
        let errors = vec![
            sound("think", Some("θ"), 60.0),
            sound("three", Some("θ"), 40.0),
            sound("world", None, 45.0),
            sound("world", None, 55.0),
            sound("ship", Some("ʃ"), 30.0),
        ];
        let groups = group_pronunciation(&errors);
        let foci: Vec<&str> = groups.iter().map(|g| g.focus.as_str()).collect();
        assert_eq!(foci, vec!["ʃ", "θ", "world"]);
        assert_eq!(groups[1].word, "three");
        assert_eq!(groups[1].occurrences, 2);
        assert!((groups[1].average_accuracy - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_split() {
        assert_eq!(split_budget(0, 0, 10), (0, 0));
        assert_eq!(split_budget(10, 0, 10), (10, 0));
        assert_eq!(split_budget(11, 0, 10), (10, 0));
        assert_eq!(split_budget(2, 20, 10), (2, 6));
        assert_eq!(split_budget(5, 5, 1), (0, 1));
    }

    #[test]
    fn test_plan_respects_cap() {
        let errors: Vec<LearnerError> = (0..8)
            .map(|i| grammar(&format!("rule_{i}"), "x"))
            .chain((0..8).map(|i| sound(&format!("w{i}"), None, 50.0)))
            .collect();
        let planned = plan_activities(&errors, 10, Utc::now());
        assert_eq!(planned.len(), 10);
        for activity in &planned {
            assert!(activity.id.starts_with("act_") && activity.id.len() == 12);
        }
        let pronunciation = planned.iter().filter(|a| a.pillar == Pillar::Pronunciation);
        assert_eq!(pronunciation.count(), 6);
        assert_eq!(planned[0].kind, "grammar_exercise");
    }

    // ------------------------------------------------------------------------
    // Node
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_run_persists_pending_activities() {
        let (ctx, store) = context();
        let mut state = state("speaking_session", json!({}));
        state.errors.has_errors = true;
        state.errors.pending_errors = vec![
            grammar("past_simple", "I goed"),
            sound("think", Some("θ"), 40.0),
        ];

        run(&mut state, &ctx).await.unwrap();

        assert!(state.errors.pending_errors.is_empty());
        assert_eq!(state.errors.generated_activity_ids.len(), 2);
        assert_eq!(state.response["activities_count"], 2);
        let profile = store.get_learner("ana").await.unwrap().unwrap();
        assert_eq!(profile.pending_activities.len(), 2);
        let second = &profile.pending_activities[1];
        assert_eq!(second.focus, "θ");
        assert_eq!(second.example.as_deref(), Some("think"));
    }

    #[tokio::test]
    async fn test_run_skips_focus_already_pending() {
        let (ctx, store) = context();
        let mut state = state("grammar_exercise", json!({}));
        state.errors.has_errors = true;
        state.errors.pending_errors = vec![grammar("articles", "a apple")];
        run(&mut state, &ctx).await.unwrap();

        state.errors.pending_errors = vec![grammar("articles", "a egg")];
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["activities_count"], 0);
        let profile = store.get_learner("ana").await.unwrap().unwrap();
        assert_eq!(profile.pending_activities.len(), 1);
    }

    #[tokio::test]
    async fn test_run_without_errors_is_a_no_op() {
        let (ctx, store) = context();
        let mut state = state("grammar_exercise", json!({}));
        run(&mut state, &ctx).await.unwrap();
        assert_eq!(state.messages[0].message, "No errors to process");
        assert!(store.get_learner("ana").await.unwrap().is_none());
    }
}
