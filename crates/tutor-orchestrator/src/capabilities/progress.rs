//! Progress capability.
//!
//! After an activity it folds the outcome into the learner's stored scores,
//! study time and streak. On `get_progress` it reports an overview.

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, warn};

use super::assessment::should_run_continuous;
use super::{input_date, load_profile, Context};
use crate::error::{Result, TutorError};
use crate::model::{LearnerProfile, Level, Pillar, StudyStats};
use crate::router::RequestType;
use crate::scheduler::complete_entry;
use crate::state::{ActivityOutput, InteractionState};

const AGENT: &str = "progress";

/// Runs the progress node.
pub async fn run(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    if let Some(output) = state.activity_output.clone() {
        record_activity(state, ctx, &output).await?;
    } else if state.assessment.final_scores.is_some() {
        state.add_message(AGENT, "Assessment scores recorded");
    } else {
        debug!(request_id = %state.request_id, "No activity outcome to record");
    }

    if state.request_type.parse::<RequestType>().ok() == Some(RequestType::GetProgress) {
        overview(state, ctx).await?;
    }
    Ok(())
}

/// Blends a new activity score into a pillar score, weighting history 70/30.
///
/// # Examples
///
/// ```
/// use tutor_orchestrator::capabilities::progress::blend_score;
///
/// assert_eq!(blend_score(50, 100), 65);
/// assert_eq!(blend_score(0, 33), 9);
/// ```
#[must_use]
pub const fn blend_score(old: u32, new: u32) -> u32 {
    (7 * old + 3 * new) / 10
}

/// Updates the study streak for activity on `today`.
///
/// Activity on the day after the last active day extends the streak; a gap
/// restarts it at one. Repeated activity on the same day changes nothing.
pub fn update_streak(stats: &mut StudyStats, today: NaiveDate) {
    let yesterday = today.pred_opt();
    match stats.last_activity_date {
        Some(last) if last == today => {
            stats.current_streak = stats.current_streak.max(1);
        }
        Some(last) if Some(last) == yesterday => {
            stats.current_streak += 1;
        }
        _ => stats.current_streak = 1,
    }
    stats.longest_streak = stats.longest_streak.max(stats.current_streak);
    stats.last_activity_date = Some(today);
}

/// The streak as of `today`: zero once a full day has been missed.
#[must_use]
pub fn live_streak(stats: &StudyStats, today: NaiveDate) -> u32 {
    match stats.last_activity_date {
        Some(last) if Some(last) >= today.pred_opt() => stats.current_streak,
        _ => 0,
    }
}

async fn record_activity(
    state: &mut InteractionState,
    ctx: &Context,
    output: &ActivityOutput,
) -> Result<()> {
    let now = Utc::now();
    let mut profile = load_profile(state, ctx).await?;

    profile.sessions_since_last_assessment += 1;
    profile.stats.total_activities += 1;
    profile.stats.total_minutes += output.time_spent_seconds / 60;
    update_streak(&mut profile.stats, now.date_naive());

    if output.pillar == Pillar::Speaking {
        profile.mastery.speaking_sessions += 1;
        let score = profile
            .mastery
            .speaking_sessions
            .saturating_mul(ctx.config.policy.progress_speaking_points_per_session);
        profile.scores.set(Pillar::Speaking, score);
    } else if let Some(score) = output.score {
        let old = profile.scores.get(output.pillar);
        profile
            .scores
            .set(output.pillar, blend_score(old, score.min(100)));
    }

    if let Some(pending_id) = state.input_str("pending_activity_id") {
        profile.pending_activities.retain(|a| a.id != pending_id);
    }

    if let Some(entry_id) = state.input_str("schedule_entry_id").map(str::to_owned) {
        let date = input_date(state, "schedule_date")?;
        let seconds = output.time_spent_seconds;
        let minutes = (seconds > 0).then(|| seconds.div_ceil(60));
        let store = ctx.store.as_ref();
        match complete_entry(store, &profile.id, date, &entry_id, minutes, now).await {
            Ok(schedule) => {
                state.add_message(AGENT, format!("Completed schedule entry {entry_id}"));
                state.daily_schedule = Some(schedule);
            }
            Err(e @ TutorError::NotFound { .. }) => {
                warn!(entry_id = %entry_id, error = %e, "Schedule entry not completed");
                state.add_message(AGENT, format!("Schedule entry not completed: {e}"));
            }
            Err(e) => return Err(e),
        }
    }

    ctx.store.put_learner(&profile).await?;

    state.learner.scores = profile.scores;
    state.learner.sessions_since_last_assessment = profile.sessions_since_last_assessment;
    state.progress.updated = true;
    state.respond(
        "progress",
        json!({
            "pillar": output.pillar,
            "pillar_score": profile.scores.get(output.pillar),
            "sessions_since_last_assessment": profile.sessions_since_last_assessment,
            "current_streak": profile.stats.current_streak,
            "total_minutes": profile.stats.total_minutes,
            "assessment_due": should_run_continuous(&profile, &ctx.config.policy),
        }),
    );
    state.add_message_with_data(
        AGENT,
        format!("Progress updated for {}", output.pillar),
        json!({
            "score": profile.scores.get(output.pillar),
            "streak": profile.stats.current_streak,
        }),
    );
    Ok(())
}

async fn overview(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let profile = load_profile(state, ctx).await?;
    let today = Utc::now().date_naive();
    let policy = &ctx.config.policy;

    let scores = profile.scores;
    let overall = scores.overall();
    let weakest = scores.weakest();
    let streak = live_streak(&profile.stats, today);
    let ready = profile.level == Level::Beginner
        && Pillar::ALL
            .into_iter()
            .all(|p| f64::from(scores.get(p)) >= policy.upgrade_threshold);

    let payload = json!({
        "level": profile.level.as_str(),
        "scores": scores,
        "overall_score": overall,
        "weakest_pillar": weakest.as_str(),
        "ready_for_level_up": ready,
        "current_streak": streak,
        "longest_streak": profile.stats.longest_streak,
        "streak_active": streak > 0,
        "speaking_score": scores.speaking,
        "speaking_sessions": profile.mastery.speaking_sessions,
        "total_minutes": profile.stats.total_minutes,
        "total_activities": profile.stats.total_activities,
        "pending_activities": profile.pending_activities.len(),
        "assessment_due": should_run_continuous(&profile, policy),
        "message": progress_message(&profile, overall, streak, ready),
    });

    state.reset_response("progress_overview", "success");
    if let Some(fields) = payload.as_object() {
        for (key, value) in fields {
            state.respond(key, value.clone());
        }
    }
    state.progress.overview = Some(payload);
    state.add_message_with_data(
        AGENT,
        "Progress overview ready",
        json!({ "weakest": weakest, "streak": streak }),
    );
    Ok(())
}

fn progress_message(profile: &LearnerProfile, overall: f64, streak: u32, ready: bool) -> String {
    let level = match profile.level {
        Level::Beginner => "Beginner",
        Level::Intermediate => "Intermediate",
    };
    let mut parts = vec![format!("Level: {level} | Overall: {overall:.0}%")];
    if streak > 0 {
        parts.push(format!("{streak} day streak!"));
    }
    parts.push(format!("Focus area: {}", profile.scores.weakest()));
    if ready {
        parts.push("Ready for intermediate level!".to_string());
    }
    parts.join(" | ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capabilities::testing::{context, state};
    use crate::config::Config;
    use crate::scheduler::build_daily_schedule;
    use crate::store::Persistence;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    // ------------------------------------------------------------------------
    // Streaks
    // ------------------------------------------------------------------------

    #[test]
    fn test_streak_extends_on_consecutive_days() {
        let mut stats = StudyStats::default();
        update_streak(&mut stats, day(1));
        update_streak(&mut stats, day(2));
        update_streak(&mut stats, day(2));
        update_streak(&mut stats, day(3));
        assert_eq!(stats.current_streak, 3);
        assert_eq!(stats.longest_streak, 3);
    }

    #[test]
    fn test_streak_resets_after_gap() {
        let mut stats = StudyStats {
            current_streak: 5,
            longest_streak: 5,
            last_activity_date: Some(day(1)),
            ..StudyStats::default()
        };
        update_streak(&mut stats, day(4));
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.longest_streak, 5);
        assert_eq!(live_streak(&stats, day(5)), 1);
        assert_eq!(live_streak(&stats, day(6)), 0);
    }

    #[test]
    fn test_blend_score_floors() {
        assert_eq!(blend_score(0, 100), 30);
        assert_eq!(blend_score(80, 80), 80);
        assert_eq!(blend_score(99, 100), 99);
    }

    // ------------------------------------------------------------------------
    // Node
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_activity_outcome_updates_profile() {
        let (ctx, store) = context();
        let mut state = state("grammar_exercise", json!({}));
        let mut output = ActivityOutput::new(Pillar::Grammar, true, 4);
        output.score = Some(80);
        output.time_spent_seconds = 150;
        state.activity_output = Some(output);

        run(&mut state, &ctx).await.unwrap();

        let profile = store.get_learner("ana").await.unwrap().unwrap();
        assert_eq!(profile.scores.grammar, 24);
        assert_eq!(profile.sessions_since_last_assessment, 1);
        assert_eq!(profile.stats.total_minutes, 2);
        assert_eq!(profile.stats.current_streak, 1);
        assert!(state.progress.updated);
        assert_eq!(state.response["progress"]["pillar_score"], 24);
    }

    #[tokio::test]
    async fn test_speaking_scored_from_session_count() {
        let (ctx, store) = context();
        let mut profile = LearnerProfile::new("ana", 30);
        profile.mastery.speaking_sessions = 3;
        store.put_learner(&profile).await.unwrap();

        let mut state = state("speaking_session", json!({}));
        state.activity_output = Some(ActivityOutput::new(Pillar::Speaking, true, 4));
        run(&mut state, &ctx).await.unwrap();

        let profile = store.get_learner("ana").await.unwrap().unwrap();
        assert_eq!(profile.mastery.speaking_sessions, 4);
        assert_eq!(profile.scores.speaking, 20);
    }

    #[tokio::test]
    async fn test_completes_pending_and_schedule_entry() {
        let (ctx, store) = context();
        let now = Utc::now();
        let today = now.date_naive();
        build_daily_schedule(store.as_ref(), &Config::default(), "ana", 30, today, now)
            .await
            .unwrap();

        let mut profile = LearnerProfile::new("ana", 30);
        profile.pending_activities.push(crate::model::PendingActivity {
            id: "act_1".to_string(),
            pillar: Pillar::Grammar,
            kind: "grammar_exercise".to_string(),
            focus: "past_simple".to_string(),
            example: None,
            created_at: now,
        });
        store.put_learner(&profile).await.unwrap();

        let mut state = state(
            "grammar_exercise",
            json!({"pending_activity_id": "act_1", "schedule_entry_id": "review_1"}),
        );
        let mut output = ActivityOutput::new(Pillar::Grammar, true, 5);
        output.time_spent_seconds = 61;
        state.activity_output = Some(output);
        run(&mut state, &ctx).await.unwrap();

        let profile = store.get_learner("ana").await.unwrap().unwrap();
        assert!(profile.pending_activities.is_empty());
        let schedule = store.get_schedule("ana", today).await.unwrap().unwrap();
        assert_eq!(schedule.goal_progress.activities_completed, 1);
        assert_eq!(schedule.goal_progress.minutes_studied, 2);
    }

    #[tokio::test]
    async fn test_unknown_schedule_entry_does_not_fail() {
        let (ctx, _store) = context();
        let mut state = state(
            "vocabulary_exercise",
            json!({"schedule_entry_id": "review_7"}),
        );
        state.activity_output = Some(ActivityOutput::new(Pillar::Vocabulary, false, 1));
        run(&mut state, &ctx).await.unwrap();
        assert!(state
            .messages
            .iter()
            .any(|m| m.message.starts_with("Schedule entry not completed")));
    }

    #[tokio::test]
    async fn test_overview_fields() {
        let (ctx, store) = context();
        let mut profile = LearnerProfile::new("ana", 30);
        profile.scores.vocabulary = 90;
        profile.scores.grammar = 40;
        profile.initial_assessment_completed = true;
        profile.sessions_since_last_assessment = 5;
        store.put_learner(&profile).await.unwrap();

        let mut state = state("get_progress", json!({}));
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "progress_overview");
        assert_eq!(state.response["status"], "success");
        assert_eq!(state.response["weakest_pillar"], "pronunciation");
        assert_eq!(state.response["ready_for_level_up"], false);
        assert_eq!(state.response["assessment_due"], true);
        assert_eq!(state.response["current_streak"], 0);
        assert!(state.progress.overview.is_some());
    }
}
