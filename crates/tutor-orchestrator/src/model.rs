//! Persisted domain records.
//!
//! These are the shapes the persistence collaborator stores: learner
//! profiles, per-item review records and daily schedules.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tutor_srs::{Priority, ReviewRecord, SrsConfig};

// ============================================================================
// Pillar and Level
// ============================================================================

/// A learning domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    /// Word knowledge.
    Vocabulary,
    /// Grammar rules.
    Grammar,
    /// Sound production.
    Pronunciation,
    /// Conversational practice.
    Speaking,
}

impl Pillar {
    /// Every pillar, in assessment order.
    pub const ALL: [Self; 4] = [
        Self::Vocabulary,
        Self::Grammar,
        Self::Pronunciation,
        Self::Speaking,
    ];

    /// Returns the lowercase name used in payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vocabulary => "vocabulary",
            Self::Grammar => "grammar",
            Self::Pronunciation => "pronunciation",
            Self::Speaking => "speaking",
        }
    }

    /// Parses a payload name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proficiency level of a learner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Starting level.
    #[default]
    Beginner,
    /// Reached after passing the upgrade policy.
    Intermediate,
}

impl Level {
    /// Parses a string into a `Level`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            _ => None,
        }
    }

    /// Returns the lowercase name used in payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid level '{s}': expected one of 'beginner', 'intermediate'"
            ))
        })
    }
}

impl Serialize for Level {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Learner profile
// ============================================================================

/// Per-pillar scores on a 0-100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PillarScores {
    /// Vocabulary score.
    #[serde(default)]
    pub vocabulary: u32,
    /// Grammar score.
    #[serde(default)]
    pub grammar: u32,
    /// Pronunciation score.
    #[serde(default)]
    pub pronunciation: u32,
    /// Speaking score.
    #[serde(default)]
    pub speaking: u32,
}

impl PillarScores {
    /// Returns the score of one pillar.
    #[must_use]
    pub const fn get(&self, pillar: Pillar) -> u32 {
        match pillar {
            Pillar::Vocabulary => self.vocabulary,
            Pillar::Grammar => self.grammar,
            Pillar::Pronunciation => self.pronunciation,
            Pillar::Speaking => self.speaking,
        }
    }

    /// Sets the score of one pillar, capped at 100.
    pub fn set(&mut self, pillar: Pillar, score: u32) {
        let score = score.min(100);
        match pillar {
            Pillar::Vocabulary => self.vocabulary = score,
            Pillar::Grammar => self.grammar = score,
            Pillar::Pronunciation => self.pronunciation = score,
            Pillar::Speaking => self.speaking = score,
        }
    }

    /// Mean of the four pillar scores.
    #[must_use]
    pub fn overall(&self) -> f64 {
        f64::from(self.vocabulary + self.grammar + self.pronunciation + self.speaking) / 4.0
    }

    /// The lowest-scoring pillar. Ties go to the earlier pillar.
    #[must_use]
    pub fn weakest(&self) -> Pillar {
        Pillar::ALL
            .into_iter()
            .fold(Pillar::Vocabulary, |weakest, p| {
                if self.get(p) < self.get(weakest) {
                    p
                } else {
                    weakest
                }
            })
    }
}

/// Correct answers out of total for one assessment step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Correct answers.
    pub correct: u32,
    /// Questions asked.
    pub total: u32,
}

impl StepResult {
    /// Result with `correct` answers out of `total`.
    #[must_use]
    pub const fn new(correct: u32, total: u32) -> Self {
        Self { correct, total }
    }

    /// Percentage of correct answers, 0 when nothing was asked.
    #[must_use]
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.correct.min(self.total) * 100) / self.total
    }
}

/// Study-time bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyStats {
    /// Total minutes studied.
    #[serde(default)]
    pub total_minutes: u32,
    /// Completed activities.
    #[serde(default)]
    pub total_activities: u32,
    /// Consecutive study days up to the last activity.
    #[serde(default)]
    pub current_streak: u32,
    /// Longest streak ever reached.
    #[serde(default)]
    pub longest_streak: u32,
    /// Calendar date of the last activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_date: Option<NaiveDate>,
}

/// Counters used by the level-change policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteryStats {
    /// Vocabulary items with at least three consecutive correct reviews.
    #[serde(default)]
    pub vocabulary_mastered: u32,
    /// Distinct grammar rules practiced.
    #[serde(default)]
    pub grammar_rules_practiced: u32,
    /// Sounds with a mastered accuracy.
    #[serde(default)]
    pub pronunciation_mastered: u32,
    /// Completed speaking sessions.
    #[serde(default)]
    pub speaking_sessions: u32,
}

/// A remedial activity generated from collected learner errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingActivity {
    /// Identifier of the generated activity.
    pub id: String,
    /// Domain the activity trains.
    pub pillar: Pillar,
    /// Request type that runs the activity.
    pub kind: String,
    /// The grammar rule, phoneme or word the activity focuses on.
    pub focus: String,
    /// Example of the original mistake, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    /// When the activity was generated.
    pub created_at: DateTime<Utc>,
}

/// Persisted learner record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerProfile {
    /// Learner identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Current level.
    #[serde(default)]
    pub level: Level,
    /// Daily study goal.
    pub daily_goal_minutes: u32,
    /// Free-form learning goals such as `general` or `data_engineering`.
    #[serde(default)]
    pub learning_goals: Vec<String>,
    /// Whether the initial placement assessment was completed.
    #[serde(default)]
    pub initial_assessment_completed: bool,
    /// Completed activities since the last assessment.
    #[serde(default)]
    pub sessions_since_last_assessment: u32,
    /// When the last assessment finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_assessment_at: Option<DateTime<Utc>>,
    /// Per-pillar scores.
    #[serde(default)]
    pub scores: PillarScores,
    /// Study-time bookkeeping.
    #[serde(default)]
    pub stats: StudyStats,
    /// Mastery counters.
    #[serde(default)]
    pub mastery: MasteryStats,
    /// Remedial activities waiting to be served.
    #[serde(default)]
    pub pending_activities: Vec<PendingActivity>,
    /// Answered steps of an unfinished placement assessment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assessment_progress: BTreeMap<Pillar, StepResult>,
}

impl LearnerProfile {
    /// Creates a profile with default settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::{Level, LearnerProfile};
    ///
    /// let learner = LearnerProfile::new("ana", 30);
    /// assert_eq!(learner.level, Level::Beginner);
    /// assert_eq!(learner.learning_goals, vec!["general".to_string()]);
    /// assert!(!learner.initial_assessment_completed);
    /// ```
    #[must_use]
    pub fn new(id: impl Into<String>, daily_goal_minutes: u32) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            level: Level::Beginner,
            daily_goal_minutes,
            learning_goals: vec!["general".to_string()],
            initial_assessment_completed: false,
            sessions_since_last_assessment: 0,
            last_assessment_at: None,
            scores: PillarScores::default(),
            stats: StudyStats::default(),
            mastery: MasteryStats::default(),
            pending_activities: Vec::new(),
            assessment_progress: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Review items
// ============================================================================

/// Review record of one learned unit for one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Owning learner.
    pub learner_id: String,
    /// Identifier of the word, rule or sound.
    pub item_id: String,
    /// Domain of the unit.
    pub pillar: Pillar,
    /// Display text (the word, rule name or phoneme).
    #[serde(default)]
    pub text: String,
    /// SM-2 schedule.
    pub srs: ReviewRecord,
    /// When the unit was last practiced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_practiced: Option<DateTime<Utc>>,
    /// Running accuracy percentage.
    #[serde(default)]
    pub accuracy: f64,
    /// Number of practices.
    #[serde(default)]
    pub practice_count: u32,
}

impl ReviewItem {
    /// Creates the record for a unit practiced for the first time.
    #[must_use]
    pub fn new(
        learner_id: impl Into<String>,
        item_id: impl Into<String>,
        pillar: Pillar,
        config: &SrsConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            learner_id: learner_id.into(),
            item_id: item_id.into(),
            pillar,
            text: String::new(),
            srs: ReviewRecord::new(config, now),
            last_practiced: None,
            accuracy: 0.0,
            practice_count: 0,
        }
    }

    /// Folds a new accuracy observation into the running mean.
    pub fn record_practice(&mut self, accuracy: f64, now: DateTime<Utc>) {
        let previous = f64::from(self.practice_count);
        self.accuracy = self.accuracy.mul_add(previous, accuracy) / (previous + 1.0);
        self.practice_count = self.practice_count.saturating_add(1);
        self.last_practiced = Some(now);
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Kind of scheduled activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Review of a due vocabulary item.
    VocabularyReview,
    /// Review of a due grammar rule.
    GrammarReview,
    /// Review of a weak or due sound.
    PronunciationReview,
    /// Practice of a vocabulary item not seen for a while.
    VocabularyPractice,
    /// Free conversational practice.
    SpeakingSession,
}

impl ActivityKind {
    /// Domain the activity belongs to.
    #[must_use]
    pub const fn pillar(&self) -> Pillar {
        match self {
            Self::VocabularyReview | Self::VocabularyPractice => Pillar::Vocabulary,
            Self::GrammarReview => Pillar::Grammar,
            Self::PronunciationReview => Pillar::Pronunciation,
            Self::SpeakingSession => Pillar::Speaking,
        }
    }

    /// Returns the snake_case name used in payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::VocabularyReview => "vocabulary_review",
            Self::GrammarReview => "grammar_review",
            Self::PronunciationReview => "pronunciation_review",
            Self::VocabularyPractice => "vocabulary_practice",
            Self::SpeakingSession => "speaking_session",
        }
    }

    /// The review kind for a domain's due items.
    #[must_use]
    pub const fn review_for(pillar: Pillar) -> Self {
        match pillar {
            Pillar::Vocabulary => Self::VocabularyReview,
            Pillar::Grammar => Self::GrammarReview,
            Pillar::Pronunciation => Self::PronunciationReview,
            Pillar::Speaking => Self::SpeakingSession,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an entry was put on the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleReason {
    /// The item's SRS review is due.
    SrsDue,
    /// The item is due and its accuracy is weak.
    LowAccuracy,
    /// The item has not been practiced for a while.
    LowFrequency,
    /// Filler practice.
    DailyPractice,
}

/// Lifecycle of a schedule entry. Only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Planned.
    #[default]
    Scheduled,
    /// Done.
    Completed,
}

/// One planned activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Entry identifier, unique within the schedule.
    pub id: String,
    /// Activity kind.
    pub kind: ActivityKind,
    /// Domain.
    pub domain: Pillar,
    /// Reviewed item, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Inclusion reason.
    pub reason: ScheduleReason,
    /// Urgency tier.
    pub priority: Priority,
    /// Estimated duration.
    pub estimated_minutes: u32,
    /// Lifecycle status.
    #[serde(default)]
    pub status: EntryStatus,
    /// When the entry was completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Cumulative progress toward the daily goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalProgress {
    /// Minutes spent on completed entries.
    pub minutes_studied: u32,
    /// Completed entries.
    pub activities_completed: u32,
    /// The learner's daily goal.
    pub goal_minutes: u32,
    /// Planned entries.
    pub total_activities: u32,
}

/// A learner's plan for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule identifier, `schedule_{learner}_{date}`.
    pub id: String,
    /// Owning learner.
    pub learner_id: String,
    /// Calendar date.
    pub date: NaiveDate,
    /// Planned entries in order.
    pub scheduled_reviews: Vec<ScheduleEntry>,
    /// Entries completed so far, in completion order.
    #[serde(default)]
    pub completed_reviews: Vec<ScheduleEntry>,
    /// Goal counters.
    pub goal_progress: GoalProgress,
}

impl Schedule {
    /// Builds the schedule identifier for a learner and date.
    #[must_use]
    pub fn id_for(learner_id: &str, date: NaiveDate) -> String {
        format!("schedule_{learner_id}_{}", date.format("%Y-%m-%d"))
    }

    /// Sum of estimated minutes across planned entries.
    #[must_use]
    pub fn planned_minutes(&self) -> u32 {
        self.scheduled_reviews
            .iter()
            .map(|e| e.estimated_minutes)
            .sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pillar_parse_round_trip() {
        for pillar in Pillar::ALL {
            assert_eq!(Pillar::parse(pillar.as_str()), Some(pillar));
        }
        assert_eq!(Pillar::parse("listening"), None);
    }

    #[test]
    fn test_level_case_insensitive() {
        let level: Level = serde_json::from_str(r#""Intermediate""#).unwrap();
        assert_eq!(level, Level::Intermediate);
        let err = serde_json::from_str::<Level>(r#""expert""#).unwrap_err();
        assert!(err.to_string().contains("invalid level"));
    }

    #[test]
    fn test_scores_weakest_and_overall() {
        let scores = PillarScores {
            vocabulary: 80,
            grammar: 40,
            pronunciation: 60,
            speaking: 40,
        };
        assert_eq!(scores.weakest(), Pillar::Grammar);
        assert!((scores.overall() - 55.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scores_set_caps_at_hundred() {
        let mut scores = PillarScores::default();
        scores.set(Pillar::Speaking, 150);
        assert_eq!(scores.speaking, 100);
    }

    #[test]
    fn test_review_item_running_accuracy() {
        let now = Utc::now();
        let mut item = ReviewItem::new(
            "ana",
            "word_1",
            Pillar::Vocabulary,
            &SrsConfig::default(),
            now,
        );
        item.record_practice(100.0, now);
        item.record_practice(50.0, now);
        assert_eq!(item.practice_count, 2);
        assert!((item.accuracy - 75.0).abs() < 1e-9);
        assert_eq!(item.last_practiced, Some(now));
    }

    #[test]
    fn test_schedule_id_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(Schedule::id_for("ana", date), "schedule_ana_2026-03-09");
    }

    #[test]
    fn test_profile_defaults_from_minimal_json() {
        let json = r#"{"id": "ana", "daily_goal_minutes": 20}"#;
        let learner: LearnerProfile = serde_json::from_str(json).unwrap();
        assert_eq!(learner.level, Level::Beginner);
        assert_eq!(learner.scores, PillarScores::default());
        assert!(learner.pending_activities.is_empty());
    }
}
