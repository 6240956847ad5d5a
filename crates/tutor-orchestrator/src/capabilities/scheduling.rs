//! Scheduler capability: daily schedule and next activity.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

use super::{input_date, load_profile, Context};
use crate::error::{Result, TutorError};
use crate::router::RequestType;
use crate::scheduler::{
    build_daily_schedule, gather_sources, next_activity, pick_next, ReviewSources,
};
use crate::state::InteractionState;

const AGENT: &str = "scheduler";

/// Runs the scheduler node.
pub async fn run(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let now = Utc::now();
    let learner_id = state.learner.learner_id.clone();
    let sources = gather_sources(ctx.store.as_ref(), &learner_id, &ctx.config.srs, now).await?;
    fill_srs_state(state, &sources, ctx, now);

    match state.request_type.parse::<RequestType>() {
        Ok(RequestType::GetNextActivity) => {
            let profile = load_profile(state, ctx).await?;
            let next = next_activity(&profile, &sources, &ctx.config, now);
            let message = match (&next.pending, &next.review) {
                (Some(pending), _) => format!(
                    "Next activity: pending {} - {}",
                    pending.kind, pending.pillar
                ),
                (None, Some(review)) => {
                    format!("Next activity: {} - {}", review.kind, review.item.pillar)
                }
                (None, None) => "No reviews due".to_string(),
            };

            state.reset_response("next_activity", "success");
            state.respond("source", serde_json::to_value(next.source)?);
            let activity = match (&next.pending, &next.review) {
                (Some(pending), _) => serde_json::to_value(pending)?,
                (None, Some(review)) => serde_json::to_value(review)?,
                (None, None) => Value::Null,
            };
            state.respond("activity", activity);
            if next.pending.is_none() && next.review.is_none() {
                state.respond("message", "No reviews due! Ready for new learning.");
                state.respond("suggestions", serde_json::to_value(&next.suggestions)?);
            }
            state.add_message(AGENT, message);
        }
        Ok(_) => {
            let date = input_date(state, "date")?;
            let schedule = build_daily_schedule(
                ctx.store.as_ref(),
                &ctx.config,
                &learner_id,
                state.learner.daily_goal_minutes,
                date,
                now,
            )
            .await?;

            info!(
                learner_id = %learner_id,
                %date,
                activities = schedule.scheduled_reviews.len(),
                "Schedule ready"
            );
            state.reset_response("daily_schedule", "success");
            state.respond("schedule", serde_json::to_value(&schedule)?);
            state.respond("items_due_today", state.srs.items_due_today);
            state.respond("estimated_minutes", schedule.planned_minutes());
            state.add_message(
                AGENT,
                format!(
                    "Schedule ready: {} activities for {date}",
                    schedule.scheduled_reviews.len()
                ),
            );
            state.schedule_date = Some(date);
            state.daily_schedule = Some(schedule);
        }
        Err(e) => return Err(TutorError::capability(AGENT, e.to_string())),
    }

    Ok(())
}

fn fill_srs_state(
    state: &mut InteractionState,
    sources: &ReviewSources,
    ctx: &Context,
    now: DateTime<Utc>,
) {
    state.srs.items_due_today = sources.due_count();
    state.srs.due.clone_from(&sources.due);
    state.srs.low_frequency.clone_from(&sources.low_frequency);
    state.srs.next_item = pick_next(sources, &ctx.config.srs, now).map(|c| c.item);
    state.add_message_with_data(
        AGENT,
        format!(
            "SRS refreshed: {} items due today",
            state.srs.items_due_today
        ),
        json!({
            "low_frequency": state.srs.low_frequency.len(),
        }),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use tutor_srs::SrsConfig;

    use super::*;
    use crate::capabilities::testing::{context, state};
    use crate::model::{Pillar, ReviewItem};
    use crate::store::Persistence;

    #[tokio::test]
    async fn test_get_schedule_for_explicit_date() {
        let (ctx, store) = context();
        let mut state = state("get_schedule", json!({"date": "2026-10-15"}));
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "daily_schedule");
        assert_eq!(state.response["schedule"]["id"], "schedule_ana_2026-10-15");
        assert_eq!(
            state.response["schedule"]["goal_progress"]["total_activities"],
            1
        );
        let date = state.schedule_date.unwrap();
        assert!(store.get_schedule("ana", date).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bad_date_is_an_error() {
        let (ctx, _store) = context();
        let mut state = state("get_schedule", json!({"date": "15/10/2026"}));
        let err = run(&mut state, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[tokio::test]
    async fn test_next_activity_reports_srs_item() {
        let (ctx, store) = context();
        let now = Utc::now();
        let mut item = ReviewItem::new(
            "ana",
            "casa",
            Pillar::Vocabulary,
            &SrsConfig::default(),
            now,
        );
        item.srs.next_due = now - Duration::days(2);
        item.last_practiced = Some(now - Duration::days(2));
        store.put_review_item(&item).await.unwrap();

        let mut state = state("get_next_activity", json!({}));
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["source"], "srs");
        assert_eq!(state.response["activity"]["item"]["item_id"], "casa");
        assert_eq!(state.srs.items_due_today, 1);
        assert_eq!(state.srs.next_item.as_ref().unwrap().item_id, "casa");
    }

    #[tokio::test]
    async fn test_next_activity_without_items_suggests() {
        let (ctx, _store) = context();
        let mut state = state("get_next_activity", json!({}));
        run(&mut state, &ctx).await.unwrap();
        assert_eq!(state.response["source"], "none");
        assert!(state.response["activity"].is_null());
        assert!(!state.response["suggestions"].as_array().unwrap().is_empty());
    }
}
