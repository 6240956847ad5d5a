//! Markdown rendering of weekly reports.
//!
//! The document has a summary table, a day-by-day breakdown, pillar
//! scores, achievements and areas to improve.
//!
//! # Example
//!
//! ```rust
//! use tutor_report::{MarkdownGenerator, WeeklyReport};
//!
//! let report = WeeklyReport::default();
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Weekly Progress Report"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{WeeklyReport, DAYS_IN_WEEK};

/// Generates Markdown from a [`WeeklyReport`].
pub struct MarkdownGenerator<'a> {
    report: &'a WeeklyReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a WeeklyReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_daily_breakdown(&mut output);
        self.write_scores(&mut output);
        self.write_achievements(&mut output);
        self.write_areas_to_improve(&mut output);
        Self::write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Weekly Progress Report: {}\n",
            escape_markdown(self.report.display_name())
        );
    }

    fn write_summary(&self, output: &mut String) {
        let r = self.report;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Learner | {} |", escape_markdown(&r.learner_id));
        if !r.level.is_empty() {
            let _ = writeln!(output, "| Level | {} |", escape_markdown(&r.level));
        }
        let _ = writeln!(output, "| Week | {} to {} |", r.week_start, r.week_end);
        let _ = writeln!(
            output,
            "| Study Time | {} of {} goal{} |",
            format_minutes(r.total_study_minutes),
            format_minutes(r.weekly_goal_minutes),
            if r.weekly_goal_met { " (reached)" } else { "" }
        );
        let _ = writeln!(
            output,
            "| Activities Completed | {} |",
            r.activities_completed
        );
        let _ = writeln!(
            output,
            "| Days Active | {} of {DAYS_IN_WEEK} |",
            r.days_active
        );
        let _ = writeln!(
            output,
            "| Current Streak | {} |",
            format_days(r.current_streak)
        );
        let _ = writeln!(
            output,
            "| Longest Streak | {} |",
            format_days(r.longest_streak)
        );
        let _ = writeln!(output, "| Overall Score | {:.1}% |", r.overall_score);
        let _ = writeln!(output);
    }

    fn write_daily_breakdown(&self, output: &mut String) {
        let _ = writeln!(output, "## Daily Breakdown\n");
        let _ = writeln!(output, "| Day | Minutes | Activities | Goal |");
        let _ = writeln!(output, "|-----|---------|------------|------|");
        for day in &self.report.daily_breakdown {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                day.date.format("%a %Y-%m-%d"),
                day.minutes,
                day.activities,
                if day.goal_met { "met" } else { "-" }
            );
        }
        let _ = writeln!(output);
    }

    fn write_scores(&self, output: &mut String) {
        let _ = writeln!(output, "## Pillar Scores\n");
        let _ = writeln!(output, "| Pillar | Score |");
        let _ = writeln!(output, "|--------|-------|");
        for (pillar, score) in self.report.scores.entries() {
            let _ = writeln!(output, "| {} | {score}% |", capitalize(pillar));
        }
        let _ = writeln!(output);
    }

    fn write_achievements(&self, output: &mut String) {
        let _ = writeln!(output, "## Achievements\n");
        if self.report.achievements.is_empty() {
            let _ = writeln!(
                output,
                "*No achievements this week yet. Every session counts!*"
            );
        }
        for achievement in &self.report.achievements {
            let _ = writeln!(output, "- {}", escape_markdown(achievement));
        }
        let _ = writeln!(output);
    }

    fn write_areas_to_improve(&self, output: &mut String) {
        let _ = writeln!(output, "## Areas to Improve\n");
        if self.report.areas_to_improve.is_empty() {
            let _ = writeln!(output, "*Nothing stands out. Keep the balance!*");
        }
        for area in &self.report.areas_to_improve {
            let _ = writeln!(output, "- {}", escape_markdown(area));
        }
        let _ = writeln!(output);
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by tutor at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats minutes as `1h 5m`, `45m` or `0m`.
fn format_minutes(minutes: u32) -> String {
    let hours = minutes / 60;
    let rest = minutes % 60;
    match (hours, rest) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

fn format_days(days: u32) -> String {
    if days == 1 {
        "1 day".to_string()
    } else {
        format!("{days} days")
    }
}

/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Escapes characters that Markdown would interpret inside table cells and
/// list items.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
