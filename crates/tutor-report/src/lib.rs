//! Weekly progress reports.
//!
//! A [`WeeklyReport`] summarizes the seven days ending on a given date:
//! study time and activities per day, pillar scores, streaks,
//! achievements and areas to improve. Reports serialize to JSON for
//! programmatic access and render to Markdown for learners.
//!
//! The crate does not depend on the orchestrator; callers convert their
//! records into a [`ReportInput`].
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use tutor_report::{DayActivity, ReportInput, WeeklyReport};
//!
//! let week_end = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
//! let input = ReportInput {
//!     learner_id: "ana".to_string(),
//!     week_end,
//!     daily_goal_minutes: 20,
//!     days: vec![DayActivity {
//!         date: week_end,
//!         minutes_studied: 25,
//!         activities_completed: 4,
//!         planned_activities: 5,
//!     }],
//!     ..ReportInput::default()
//! };
//!
//! let report = WeeklyReport::build(&input).unwrap();
//! assert_eq!(report.daily_breakdown.len(), 7);
//! assert_eq!(report.total_study_minutes, 25);
//! assert_eq!(report.days_active, 1);
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Days covered by one report.
pub const DAYS_IN_WEEK: u32 = 7;

/// Maximum achievements listed.
const MAX_ACHIEVEMENTS: usize = 5;

/// Maximum areas to improve listed.
const MAX_AREAS: usize = 3;

/// Pillar score counted as a strength.
const STRONG_PILLAR_SCORE: u32 = 80;

/// Pillar score below which the pillar needs attention.
const WEAK_PILLAR_SCORE: u32 = 60;

/// Active days that count as a consistent week.
const CONSISTENT_DAYS: u32 = 5;

/// Speaking sessions below which more practice is suggested.
const MIN_SPEAKING_SESSIONS: u32 = 5;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Input
// ============================================================================

/// Per-pillar scores (0-100).
///
/// A local copy of the orchestrator's scores so this crate stays standalone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PillarScores {
    /// Vocabulary score.
    pub vocabulary: u32,
    /// Grammar score.
    pub grammar: u32,
    /// Pronunciation score.
    pub pronunciation: u32,
    /// Speaking score.
    pub speaking: u32,
}

impl PillarScores {
    /// Scores paired with pillar names, in display order.
    #[must_use]
    pub const fn entries(&self) -> [(&'static str, u32); 4] {
        [
            ("vocabulary", self.vocabulary),
            ("grammar", self.grammar),
            ("pronunciation", self.pronunciation),
            ("speaking", self.speaking),
        ]
    }

    /// Mean of the four scores.
    #[must_use]
    pub fn overall(&self) -> f64 {
        f64::from(self.vocabulary + self.grammar + self.pronunciation + self.speaking) / 4.0
    }
}

/// Mastery counters at report time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteryCounts {
    /// Words mastered.
    pub vocabulary_mastered: u32,
    /// Grammar rules practiced.
    pub grammar_rules_practiced: u32,
    /// Sounds mastered.
    pub pronunciation_mastered: u32,
    /// Speaking sessions completed.
    pub speaking_sessions: u32,
}

/// Study activity on one day, usually taken from that day's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayActivity {
    /// The day.
    pub date: NaiveDate,
    /// Minutes studied.
    pub minutes_studied: u32,
    /// Activities completed.
    pub activities_completed: u32,
    /// Activities planned.
    pub planned_activities: u32,
}

/// Everything needed to build a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportInput {
    /// Learner identifier.
    pub learner_id: String,
    /// Display name; the identifier is shown when empty.
    pub learner_name: String,
    /// Current level.
    pub level: String,
    /// Last day of the week (inclusive).
    pub week_end: NaiveDate,
    /// Daily study goal.
    pub daily_goal_minutes: u32,
    /// Current streak in days.
    pub current_streak: u32,
    /// Longest streak in days.
    pub longest_streak: u32,
    /// Pillar scores.
    pub scores: PillarScores,
    /// Mastery counters.
    pub mastery: MasteryCounts,
    /// Activity per day. Days without an entry count as idle.
    pub days: Vec<DayActivity>,
}

// ============================================================================
// Report
// ============================================================================

/// One row of the daily breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBreakdown {
    /// The day.
    pub date: NaiveDate,
    /// Minutes studied.
    pub minutes: u32,
    /// Activities completed.
    pub activities: u32,
    /// Whether the daily goal was reached.
    pub goal_met: bool,
}

/// A weekly progress report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    /// Learner identifier.
    pub learner_id: String,
    /// Display name.
    pub learner_name: String,
    /// Current level.
    pub level: String,
    /// First day of the week.
    pub week_start: NaiveDate,
    /// Last day of the week.
    pub week_end: NaiveDate,
    /// Minutes studied over the week.
    pub total_study_minutes: u32,
    /// Activities completed over the week.
    pub activities_completed: u32,
    /// Days with any study.
    pub days_active: u32,
    /// Daily goal times seven.
    pub weekly_goal_minutes: u32,
    /// Whether the weekly goal was reached.
    pub weekly_goal_met: bool,
    /// One row per day, oldest first.
    pub daily_breakdown: Vec<DailyBreakdown>,
    /// Pillar scores.
    pub scores: PillarScores,
    /// Mean pillar score.
    pub overall_score: f64,
    /// Mastery counters.
    pub mastery: MasteryCounts,
    /// Current streak in days.
    pub current_streak: u32,
    /// Longest streak in days.
    pub longest_streak: u32,
    /// Whether the streak covers the whole week.
    pub streak_maintained: bool,
    /// Highlights of the week.
    pub achievements: Vec<String>,
    /// Suggested focus areas.
    pub areas_to_improve: Vec<String>,
}

impl WeeklyReport {
    /// Builds the report for the week ending on `input.week_end`.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::InvalidData`] if a day falls outside the week
    /// or appears twice.
    pub fn build(input: &ReportInput) -> Result<Self> {
        let week_start = input
            .week_end
            .checked_sub_days(Days::new(u64::from(DAYS_IN_WEEK - 1)))
            .ok_or_else(|| {
                ReportError::InvalidData(format!("week end {} is out of range", input.week_end))
            })?;

        for (i, day) in input.days.iter().enumerate() {
            if day.date < week_start || day.date > input.week_end {
                return Err(ReportError::InvalidData(format!(
                    "{} is outside the week {week_start} to {}",
                    day.date, input.week_end
                )));
            }
            if input.days[..i].iter().any(|d| d.date == day.date) {
                return Err(ReportError::InvalidData(format!("{} appears twice", day.date)));
            }
        }

        let daily_breakdown: Vec<DailyBreakdown> = week_start
            .iter_days()
            .take(DAYS_IN_WEEK as usize)
            .map(|date| {
                let day = input.days.iter().find(|d| d.date == date);
                let minutes = day.map_or(0, |d| d.minutes_studied);
                DailyBreakdown {
                    date,
                    minutes,
                    activities: day.map_or(0, |d| d.activities_completed),
                    goal_met: input.daily_goal_minutes > 0 && minutes >= input.daily_goal_minutes,
                }
            })
            .collect();

        let total_study_minutes = daily_breakdown.iter().map(|d| d.minutes).sum();
        let activities_completed = daily_breakdown.iter().map(|d| d.activities).sum();
        let days_active = u32::try_from(
            daily_breakdown
                .iter()
                .filter(|d| d.minutes > 0 || d.activities > 0)
                .count(),
        )
        .unwrap_or(DAYS_IN_WEEK);
        let weekly_goal_minutes = input.daily_goal_minutes * DAYS_IN_WEEK;

        let mut report = Self {
            learner_id: input.learner_id.clone(),
            learner_name: input.learner_name.clone(),
            level: input.level.clone(),
            week_start,
            week_end: input.week_end,
            total_study_minutes,
            activities_completed,
            days_active,
            weekly_goal_minutes,
            weekly_goal_met: weekly_goal_minutes > 0 && total_study_minutes >= weekly_goal_minutes,
            daily_breakdown,
            scores: input.scores,
            overall_score: input.scores.overall(),
            mastery: input.mastery,
            current_streak: input.current_streak,
            longest_streak: input.longest_streak,
            streak_maintained: input.current_streak >= DAYS_IN_WEEK,
            achievements: Vec::new(),
            areas_to_improve: Vec::new(),
        };
        report.achievements = achievements(&report);
        report.areas_to_improve = areas_to_improve(&report);
        Ok(report)
    }

    /// Name shown in headings.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.learner_name.is_empty() {
            &self.learner_id
        } else {
            &self.learner_name
        }
    }

    /// Serializes the report to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }
}

fn achievements(report: &WeeklyReport) -> Vec<String> {
    let mut list = Vec::new();

    let streak = report.current_streak;
    if streak >= DAYS_IN_WEEK {
        list.push(format!("Week-long streak: {streak} days!"));
    } else if streak >= 3 {
        list.push(format!("{streak} day streak!"));
    }

    if report.days_active >= CONSISTENT_DAYS {
        list.push(format!("Studied on {} of {DAYS_IN_WEEK} days", report.days_active));
    }

    if report.weekly_goal_met {
        list.push(format!(
            "Weekly goal reached: {} of {} minutes",
            report.total_study_minutes, report.weekly_goal_minutes
        ));
    }

    for (pillar, score) in report.scores.entries() {
        if score >= STRONG_PILLAR_SCORE {
            list.push(format!("Strong {pillar}: {score}%"));
        }
    }

    let words = report.mastery.vocabulary_mastered;
    if words >= 100 {
        list.push(format!("Mastered {words} words!"));
    } else if words >= 50 {
        list.push(format!("Learning {words} words!"));
    }

    if report.mastery.speaking_sessions >= 10 {
        list.push(format!("{} speaking sessions!", report.mastery.speaking_sessions));
    }

    list.truncate(MAX_ACHIEVEMENTS);
    list
}

fn areas_to_improve(report: &WeeklyReport) -> Vec<String> {
    let mut weak: Vec<(&str, u32)> = report
        .scores
        .entries()
        .into_iter()
        .filter(|(_, score)| *score < WEAK_PILLAR_SCORE)
        .collect();
    weak.sort_by_key(|(_, score)| *score);

    let mut list: Vec<String> = weak
        .into_iter()
        .map(|(pillar, score)| format!("Focus on {pillar}: {score}%"))
        .collect();

    if report.mastery.speaking_sessions < MIN_SPEAKING_SESSIONS {
        list.push("Increase speaking practice frequency".to_string());
    }
    if report.days_active < 3 {
        list.push("Study on more days to build the habit".to_string());
    }

    list.truncate(MAX_AREAS);
    list
}

// ============================================================================
// Tests
// ============================================================================
