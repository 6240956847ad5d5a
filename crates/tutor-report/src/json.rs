//! JSON output for weekly reports.
//!
//! # Example
//!
//! ```rust
//! use tutor_report::json::JsonGenerator;
//! use tutor_report::WeeklyReport;
//!
//! let report = WeeklyReport::default();
//! let generator = JsonGenerator::new(&report);
//!
//! let compact = generator.generate().unwrap();
//! assert!(!compact.contains('\n'));
//!
//! let pretty = generator.generate_pretty().unwrap();
//! assert!(pretty.contains("learner_id"));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{ReportError, Result, WeeklyReport};

/// JSON report generator.
pub struct JsonGenerator<'a> {
    report: &'a WeeklyReport,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given report.
    #[must_use]
    pub const fn new(report: &'a WeeklyReport) -> Self {
        Self { report }
    }

    /// Generates compact JSON output.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON output.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the report to `path`, creating or overwriting the file.
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Read;

    use chrono::NaiveDate;

    use super::*;
    use crate::{DayActivity, PillarScores, ReportInput};

    fn sample_report() -> WeeklyReport {
        let week_end = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        WeeklyReport::build(&ReportInput {
            learner_id: "ana".to_string(),
            learner_name: "Ana".to_string(),
            level: "beginner".to_string(),
            week_end,
            daily_goal_minutes: 15,
            current_streak: 4,
            longest_streak: 6,
            scores: PillarScores {
                vocabulary: 72,
                grammar: 58,
                pronunciation: 66,
                speaking: 20,
            },
            days: vec![DayActivity {
                date: week_end,
                minutes_studied: 18,
                activities_completed: 3,
                planned_activities: 4,
            }],
            ..ReportInput::default()
        })
        .unwrap()
    }

    #[test]
    fn test_generate_is_compact() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate().unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains(r#""learner_id":"ana""#));
        assert!(json.contains(r#""week_end":"2026-03-08""#));
    }

    #[test]
    fn test_generate_round_trips() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate_pretty().unwrap();
        let parsed: WeeklyReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_write_to_file() {
        let report = sample_report();
        let path = std::env::temp_dir().join(format!(
            "tutor-report-{}-{}.json",
            std::process::id(),
            report.week_end
        ));

        JsonGenerator::new(&report)
            .write_to_file(&path, true)
            .unwrap();

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(contents.contains("\"areas_to_improve\""));
        assert!(contents.contains("Focus on speaking: 20%"));
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let report = sample_report();
        let path = std::env::temp_dir()
            .join("tutor-report-missing-dir")
            .join("nested")
            .join("report.json");
        let err = JsonGenerator::new(&report)
            .write_to_file(&path, false)
            .unwrap_err();
        assert!(matches!(err, ReportError::Io(_)));
    }
}
