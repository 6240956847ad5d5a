//! Review aggregation and daily scheduling.
//!
//! Due items come from three domains: vocabulary and grammar by SRS due
//! date, pronunciation by due date or weak accuracy. Vocabulary items that
//! have not been practiced for a while form a fourth, lower-ranked source.
//!
//! Two consumers read the merged sources:
//! - [`pick_next`] returns the single most urgent candidate.
//! - [`plan_entries`] fills a daily time budget greedily, source by source,
//!   and stops before the next candidate would exceed the budget.
//!
//! [`build_daily_schedule`] persists the plan once per (learner, date); a
//! later build for the same key returns the stored schedule unchanged.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tutor_srs::{
    calculate, classify, is_due, is_low_accuracy, quality_from_accuracy, Priority, Quality,
    SrsConfig,
};

use crate::config::{Config, SchedulerConfig};
use crate::error::{Result, TutorError};
use crate::model::{
    ActivityKind, EntryStatus, GoalProgress, LearnerProfile, PendingActivity, Pillar, ReviewItem,
    Schedule, ScheduleEntry, ScheduleReason,
};
use crate::router::RequestType;
use crate::store::Persistence;

/// Domains that contribute due items, in schedule order.
const DUE_DOMAINS: [Pillar; 3] = [Pillar::Vocabulary, Pillar::Grammar, Pillar::Pronunciation];

// ============================================================================
// Sources and candidates
// ============================================================================

/// Items eligible for review, grouped by source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSources {
    /// Due items per domain, most overdue first.
    pub due: BTreeMap<Pillar, Vec<ReviewItem>>,
    /// Vocabulary items not practiced recently and not already due.
    pub low_frequency: Vec<ReviewItem>,
}

impl ReviewSources {
    /// Total due items across domains.
    #[must_use]
    pub fn due_count(&self) -> usize {
        self.due.values().map(Vec::len).sum()
    }

    /// Every candidate in strict source order, without caps.
    #[must_use]
    pub fn candidates(&self, srs: &SrsConfig, now: DateTime<Utc>) -> Vec<Candidate> {
        let due = DUE_DOMAINS.into_iter().flat_map(|pillar| {
            self.due
                .get(&pillar)
                .into_iter()
                .flatten()
                .map(move |item| Candidate::due(item, pillar, srs, now))
        });
        let low = self
            .low_frequency
            .iter()
            .map(|item| Candidate::low_frequency(item, now));
        due.chain(low).collect()
    }
}

/// A review item together with why and how urgently it should be reviewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The item.
    pub item: ReviewItem,
    /// Activity that reviews it.
    pub kind: ActivityKind,
    /// Inclusion reason.
    pub reason: ScheduleReason,
    /// Urgency tier.
    pub priority: Priority,
}

impl Candidate {
    fn due(item: &ReviewItem, pillar: Pillar, srs: &SrsConfig, now: DateTime<Utc>) -> Self {
        let reason = if pillar == Pillar::Pronunciation
            && is_low_accuracy(item.accuracy, srs.low_accuracy_threshold)
        {
            ScheduleReason::LowAccuracy
        } else {
            ScheduleReason::SrsDue
        };
        Self {
            item: item.clone(),
            kind: ActivityKind::review_for(pillar),
            reason,
            priority: classify(&item.srs, now),
        }
    }

    fn low_frequency(item: &ReviewItem, now: DateTime<Utc>) -> Self {
        Self {
            item: item.clone(),
            kind: ActivityKind::VocabularyPractice,
            reason: ScheduleReason::LowFrequency,
            priority: classify(&item.srs, now),
        }
    }

    const fn is_low_frequency(&self) -> bool {
        matches!(self.reason, ScheduleReason::LowFrequency)
    }
}

/// Collects the review sources of one learner.
pub async fn gather_sources(
    store: &dyn Persistence,
    learner_id: &str,
    srs: &SrsConfig,
    now: DateTime<Utc>,
) -> Result<ReviewSources> {
    let mut due = BTreeMap::new();
    due.insert(
        Pillar::Vocabulary,
        store.due_items(learner_id, Pillar::Vocabulary, now).await?,
    );
    due.insert(
        Pillar::Grammar,
        store.due_items(learner_id, Pillar::Grammar, now).await?,
    );

    let mut pronunciation: Vec<ReviewItem> = store
        .list_review_items(learner_id, Pillar::Pronunciation)
        .await?
        .into_iter()
        .filter(|item| {
            is_due(&item.srs, now) || is_low_accuracy(item.accuracy, srs.low_accuracy_threshold)
        })
        .collect();
    pronunciation.sort_by(|a, b| {
        a.srs
            .next_due
            .cmp(&b.srs.next_due)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    due.insert(Pillar::Pronunciation, pronunciation);

    let low_frequency = store
        .low_activity_items(learner_id, srs.low_frequency_days, now)
        .await?
        .into_iter()
        .filter(|item| item.pillar == Pillar::Vocabulary && !is_due(&item.srs, now))
        .collect();

    let sources = ReviewSources { due, low_frequency };
    debug!(
        learner_id,
        due = sources.due_count(),
        low_frequency = sources.low_frequency.len(),
        "Gathered review sources"
    );
    Ok(sources)
}

/// The single most urgent candidate.
///
/// Due items always outrank low-frequency items. Within each group the
/// higher priority tier wins, then the earlier due date.
#[must_use]
pub fn pick_next(
    sources: &ReviewSources,
    srs: &SrsConfig,
    now: DateTime<Utc>,
) -> Option<Candidate> {
    sources
        .candidates(srs, now)
        .into_iter()
        .min_by_key(|c| (c.is_low_frequency(), Reverse(c.priority), c.item.srs.next_due))
}

// ============================================================================
// Daily plan
// ============================================================================

/// Fills a daily time budget from the sources.
///
/// Sources are walked in order: capped due items per domain, capped
/// low-frequency items, then one speaking filler. Planning stops at the
/// first candidate that would push the running total past `goal_minutes`,
/// so the plan never exceeds the goal.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use tutor_orchestrator::config::SchedulerConfig;
/// use tutor_orchestrator::scheduler::{plan_entries, ReviewSources};
/// use tutor_srs::SrsConfig;
///
/// let entries = plan_entries(
///     &ReviewSources::default(),
///     30,
///     &SchedulerConfig::default(),
///     &SrsConfig::default(),
///     Utc::now(),
/// );
/// assert_eq!(entries.len(), 1);
/// assert_eq!(entries[0].id, "review_1");
/// ```
#[must_use]
pub fn plan_entries(
    sources: &ReviewSources,
    goal_minutes: u32,
    config: &SchedulerConfig,
    srs: &SrsConfig,
    now: DateTime<Utc>,
) -> Vec<ScheduleEntry> {
    let cap_for = |pillar: Pillar| match pillar {
        Pillar::Vocabulary => config.vocabulary_cap,
        Pillar::Grammar => config.grammar_cap,
        Pillar::Pronunciation | Pillar::Speaking => config.pronunciation_cap,
    };

    let due = DUE_DOMAINS.into_iter().flat_map(|pillar| {
        sources
            .due
            .get(&pillar)
            .into_iter()
            .flatten()
            .take(cap_for(pillar))
            .map(move |item| Candidate::due(item, pillar, srs, now))
    });
    let low = sources
        .low_frequency
        .iter()
        .take(config.low_frequency_cap)
        .map(|item| Candidate::low_frequency(item, now));

    let mut entries = Vec::new();
    let mut planned = 0u32;

    for candidate in due.chain(low) {
        let minutes = config.minutes_for(candidate.kind);
        if planned + minutes > goal_minutes {
            return entries;
        }
        planned += minutes;
        entries.push(ScheduleEntry {
            id: format!("review_{}", entries.len() + 1),
            kind: candidate.kind,
            domain: candidate.kind.pillar(),
            item_id: Some(candidate.item.item_id),
            reason: candidate.reason,
            priority: candidate.priority,
            estimated_minutes: minutes,
            status: EntryStatus::Scheduled,
            completed_at: None,
        });
    }

    let filler = config.minutes_for(ActivityKind::SpeakingSession);
    if planned + filler <= goal_minutes {
        entries.push(ScheduleEntry {
            id: format!("review_{}", entries.len() + 1),
            kind: ActivityKind::SpeakingSession,
            domain: Pillar::Speaking,
            item_id: None,
            reason: ScheduleReason::DailyPractice,
            priority: Priority::Low,
            estimated_minutes: filler,
            status: EntryStatus::Scheduled,
            completed_at: None,
        });
    }

    entries
}

/// Returns the learner's schedule for `date`, building and persisting it on
/// first request.
pub async fn build_daily_schedule(
    store: &dyn Persistence,
    config: &Config,
    learner_id: &str,
    goal_minutes: u32,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Schedule> {
    if let Some(existing) = store.get_schedule(learner_id, date).await? {
        debug!(learner_id, %date, "Returning persisted schedule");
        return Ok(existing);
    }

    let sources = gather_sources(store, learner_id, &config.srs, now).await?;
    let entries = plan_entries(&sources, goal_minutes, &config.scheduler, &config.srs, now);
    let total = u32::try_from(entries.len()).unwrap_or(u32::MAX);

    let schedule = Schedule {
        id: Schedule::id_for(learner_id, date),
        learner_id: learner_id.to_string(),
        date,
        scheduled_reviews: entries,
        completed_reviews: Vec::new(),
        goal_progress: GoalProgress {
            minutes_studied: 0,
            activities_completed: 0,
            goal_minutes,
            total_activities: total,
        },
    };
    store.upsert_schedule(&schedule).await?;

    info!(
        learner_id,
        %date,
        activities = total,
        minutes = schedule.planned_minutes(),
        "Built daily schedule"
    );
    Ok(schedule)
}

/// Marks a schedule entry completed.
///
/// Completing an already completed entry is a no-op. `minutes` defaults to
/// the entry's estimate.
pub async fn complete_entry(
    store: &dyn Persistence,
    learner_id: &str,
    date: NaiveDate,
    entry_id: &str,
    minutes: Option<u32>,
    now: DateTime<Utc>,
) -> Result<Schedule> {
    let mut schedule = store
        .get_schedule(learner_id, date)
        .await?
        .ok_or_else(|| TutorError::not_found("schedule", Schedule::id_for(learner_id, date)))?;

    let entry = schedule
        .scheduled_reviews
        .iter_mut()
        .find(|e| e.id == entry_id)
        .ok_or_else(|| TutorError::not_found("schedule entry", entry_id))?;

    if entry.status == EntryStatus::Completed {
        return Ok(schedule);
    }

    entry.status = EntryStatus::Completed;
    entry.completed_at = Some(now);
    let spent = minutes.unwrap_or(entry.estimated_minutes);
    let completed = entry.clone();

    schedule.completed_reviews.push(completed);
    schedule.goal_progress.activities_completed += 1;
    schedule.goal_progress.minutes_studied += spent;
    store.upsert_schedule(&schedule).await?;

    debug!(learner_id, %date, entry_id, minutes = spent, "Completed schedule entry");
    Ok(schedule)
}

// ============================================================================
// Review updates
// ============================================================================

/// One observed practice of a review item.
#[derive(Debug, Clone, Copy)]
pub struct Practice<'a> {
    /// Owning learner.
    pub learner_id: &'a str,
    /// Practiced unit.
    pub item_id: &'a str,
    /// Domain of the unit.
    pub pillar: Pillar,
    /// Display text stored on first practice.
    pub text: &'a str,
    /// Quality fed to the SRS engine.
    pub quality: Quality,
    /// Accuracy percentage of this practice.
    pub accuracy: f64,
}

/// Applies a practice to the stored review item, creating it on first
/// practice.
pub async fn apply_practice(
    store: &dyn Persistence,
    srs: &SrsConfig,
    practice: Practice<'_>,
    now: DateTime<Utc>,
) -> Result<ReviewItem> {
    let mut item = match store
        .get_review_item(practice.learner_id, practice.item_id)
        .await?
    {
        Some(item) => item,
        None => {
            let mut item = ReviewItem::new(
                practice.learner_id,
                practice.item_id,
                practice.pillar,
                srs,
                now,
            );
            item.text = practice.text.to_string();
            item
        }
    };

    item.record_practice(practice.accuracy, now);
    item.srs = calculate(&item.srs, practice.quality, srs, now).record;
    store.put_review_item(&item).await?;

    debug!(
        learner_id = practice.learner_id,
        item_id = practice.item_id,
        quality = practice.quality,
        interval_days = item.srs.interval_days,
        "Updated review item"
    );
    Ok(item)
}

/// Applies an accuracy-scored practice.
pub async fn record_outcome(
    store: &dyn Persistence,
    srs: &SrsConfig,
    learner_id: &str,
    item_id: &str,
    pillar: Pillar,
    accuracy: f64,
    now: DateTime<Utc>,
) -> Result<ReviewItem> {
    let practice = Practice {
        learner_id,
        item_id,
        pillar,
        text: item_id,
        quality: quality_from_accuracy(accuracy),
        accuracy,
    };
    apply_practice(store, srs, practice, now).await
}

// ============================================================================
// Next activity
// ============================================================================

/// Where the recommended next activity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    /// A remedial activity generated from earlier mistakes.
    Pending,
    /// A review item.
    Srs,
    /// Nothing is due; see the suggestions.
    None,
}

/// A new-learning suggestion offered when nothing is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Request type that starts the activity.
    pub request_type: RequestType,
    /// Domain.
    pub pillar: Pillar,
    /// Vocabulary category, for goal-driven suggestions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Why it is suggested.
    pub reason: String,
}

/// The recommended next activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextActivity {
    /// Where it came from.
    pub source: ActivitySource,
    /// Remedial activity, for [`ActivitySource::Pending`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingActivity>,
    /// Review candidate, for [`ActivitySource::Srs`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<Candidate>,
    /// Suggestions, for [`ActivitySource::None`].
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

/// Picks what the learner should do next.
///
/// Pending remedial activities come first, then the most urgent review,
/// then suggestions for new learning.
#[must_use]
pub fn next_activity(
    learner: &LearnerProfile,
    sources: &ReviewSources,
    config: &Config,
    now: DateTime<Utc>,
) -> NextActivity {
    if let Some(pending) = learner.pending_activities.first() {
        return NextActivity {
            source: ActivitySource::Pending,
            pending: Some(pending.clone()),
            review: None,
            suggestions: Vec::new(),
        };
    }

    if let Some(candidate) = pick_next(sources, &config.srs, now) {
        return NextActivity {
            source: ActivitySource::Srs,
            pending: None,
            review: Some(candidate),
            suggestions: Vec::new(),
        };
    }

    NextActivity {
        source: ActivitySource::None,
        pending: None,
        review: None,
        suggestions: suggestions(learner, config.scheduler.max_suggestions),
    }
}

/// Request type that practices a domain.
const fn exercise_for(pillar: Pillar) -> RequestType {
    match pillar {
        Pillar::Vocabulary => RequestType::VocabularyExercise,
        Pillar::Grammar => RequestType::GrammarExercise,
        Pillar::Pronunciation => RequestType::PronunciationExercise,
        Pillar::Speaking => RequestType::SpeakingSession,
    }
}

fn suggestions(learner: &LearnerProfile, limit: usize) -> Vec<Suggestion> {
    let weakest = learner.scores.weakest();
    let mut suggestions = vec![Suggestion {
        request_type: exercise_for(weakest),
        pillar: weakest,
        category: None,
        reason: format!("Strengthen your weakest area: {weakest}"),
    }];

    let technical = learner
        .learning_goals
        .iter()
        .any(|g| g == "data_engineering" || g == "ai");
    if technical {
        suggestions.push(Suggestion {
            request_type: RequestType::VocabularyExercise,
            pillar: Pillar::Vocabulary,
            category: Some("technical".to_string()),
            reason: "Learn technical vocabulary for your field".to_string(),
        });
    }

    if weakest != Pillar::Speaking {
        suggestions.push(Suggestion {
            request_type: RequestType::SpeakingSession,
            pillar: Pillar::Speaking,
            category: None,
            reason: "Practice conversation skills".to_string(),
        });
    }

    suggestions.truncate(limit);
    suggestions
}
