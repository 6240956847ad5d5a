//! Configuration types for the tutor orchestrator.
//!
//! This module provides the configuration structures that tune review
//! scheduling, the level-change policy, speaking-session lifetime and
//! per-node time budgets.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tutor_srs::SrsConfig;

use crate::error::{Result, TutorError};
use crate::model::{ActivityKind, Level};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

/// Default per-node time budget in seconds.
const fn default_node_timeout() -> u64 {
    30
}

/// Default daily goal for learners without a stored profile.
const fn default_daily_goal() -> u32 {
    30
}

/// Default path of the persisted data snapshot.
fn default_data_file() -> String {
    "tutor-data.json".to_string()
}

/// Main configuration for the tutor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SM-2 engine constants.
    #[serde(default)]
    pub srs: SrsConfig,

    /// Daily schedule construction.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Assessment and progress policy constants.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Speaking-session lifetime.
    #[serde(default)]
    pub session: SessionConfig,

    /// Maximum time a single capability node may run, in seconds.
    #[serde(default = "default_node_timeout")]
    pub node_timeout_seconds: u64,

    /// Daily goal given to learners seen for the first time.
    #[serde(default = "default_daily_goal")]
    pub default_daily_goal_minutes: u32,

    /// Level given to learners seen for the first time.
    #[serde(default)]
    pub default_level: Level,

    /// Path of the JSON data snapshot used by the in-memory store.
    #[serde(default = "default_data_file")]
    pub data_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            srs: SrsConfig::default(),
            scheduler: SchedulerConfig::default(),
            policy: PolicyConfig::default(),
            session: SessionConfig::default(),
            node_timeout_seconds: default_node_timeout(),
            default_daily_goal_minutes: default_daily_goal(),
            default_level: Level::default(),
            data_file: default_data_file(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If not found,
    /// returns the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `tutor.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration. A file that exists
    /// but cannot be parsed is a `ConfigParseError`; parsed values that fail
    /// [`Config::validate`] are a `ConfigValidationError`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Per-node time budget.
    #[must_use]
    pub const fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_seconds)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        self.srs.validate().map_err(|e| {
            TutorError::config_validation(e.to_string(), "Fix the srs section of your tutor.json")
        })?;

        if self.node_timeout_seconds == 0 {
            return Err(TutorError::config_validation(
                "nodeTimeoutSeconds must be greater than 0",
                "Set nodeTimeoutSeconds to at least 1 second in your tutor.json",
            ));
        }

        if self.default_daily_goal_minutes == 0 {
            return Err(TutorError::config_validation(
                "defaultDailyGoalMinutes must be greater than 0",
                "Set defaultDailyGoalMinutes to at least 1 in your tutor.json",
            ));
        }

        if self.data_file.trim().is_empty() {
            return Err(TutorError::config_validation(
                "dataFile must not be empty",
                "Provide a data snapshot path in your tutor.json",
            ));
        }

        self.scheduler.validate()?;
        self.policy.validate()?;
        self.session.validate()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

const fn default_vocabulary_minutes() -> u32 {
    2
}

const fn default_grammar_minutes() -> u32 {
    5
}

const fn default_pronunciation_minutes() -> u32 {
    3
}

const fn default_speaking_minutes() -> u32 {
    10
}

const fn default_vocabulary_cap() -> usize {
    10
}

const fn default_domain_cap() -> usize {
    5
}

const fn default_max_suggestions() -> usize {
    3
}

/// Daily schedule construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Average minutes of a vocabulary activity.
    #[serde(default = "default_vocabulary_minutes")]
    pub vocabulary_minutes: u32,
    /// Average minutes of a grammar activity.
    #[serde(default = "default_grammar_minutes")]
    pub grammar_minutes: u32,
    /// Average minutes of a pronunciation activity.
    #[serde(default = "default_pronunciation_minutes")]
    pub pronunciation_minutes: u32,
    /// Average minutes of a speaking session.
    #[serde(default = "default_speaking_minutes")]
    pub speaking_minutes: u32,
    /// Maximum due vocabulary items per schedule.
    #[serde(default = "default_vocabulary_cap")]
    pub vocabulary_cap: usize,
    /// Maximum due grammar rules per schedule.
    #[serde(default = "default_domain_cap")]
    pub grammar_cap: usize,
    /// Maximum pronunciation sounds per schedule.
    #[serde(default = "default_domain_cap")]
    pub pronunciation_cap: usize,
    /// Maximum low-frequency items per schedule.
    #[serde(default = "default_domain_cap")]
    pub low_frequency_cap: usize,
    /// Maximum suggestions returned when nothing is due.
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            vocabulary_minutes: default_vocabulary_minutes(),
            grammar_minutes: default_grammar_minutes(),
            pronunciation_minutes: default_pronunciation_minutes(),
            speaking_minutes: default_speaking_minutes(),
            vocabulary_cap: default_vocabulary_cap(),
            grammar_cap: default_domain_cap(),
            pronunciation_cap: default_domain_cap(),
            low_frequency_cap: default_domain_cap(),
            max_suggestions: default_max_suggestions(),
        }
    }
}

impl SchedulerConfig {
    /// Average duration of an activity kind.
    #[must_use]
    pub const fn minutes_for(&self, kind: ActivityKind) -> u32 {
        match kind {
            ActivityKind::VocabularyReview | ActivityKind::VocabularyPractice => {
                self.vocabulary_minutes
            }
            ActivityKind::GrammarReview => self.grammar_minutes,
            ActivityKind::PronunciationReview => self.pronunciation_minutes,
            ActivityKind::SpeakingSession => self.speaking_minutes,
        }
    }

    fn validate(&self) -> Result<()> {
        let minutes = [
            ("vocabularyMinutes", self.vocabulary_minutes),
            ("grammarMinutes", self.grammar_minutes),
            ("pronunciationMinutes", self.pronunciation_minutes),
            ("speakingMinutes", self.speaking_minutes),
        ];
        for (field, value) in minutes {
            if value == 0 {
                return Err(TutorError::config_validation(
                    format!("scheduler.{field} must be greater than 0"),
                    format!("Set scheduler.{field} to at least 1 minute in your tutor.json"),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Policy
// ============================================================================

const fn default_upgrade_threshold() -> f64 {
    85.0
}

const fn default_downgrade_threshold() -> f64 {
    65.0
}

const fn default_pillar_upgrade_minimum() -> u32 {
    75
}

const fn default_assessment_speaking_points() -> u32 {
    10
}

const fn default_progress_speaking_points() -> u32 {
    5
}

const fn default_sessions_between_assessments() -> u32 {
    5
}

const fn default_vocabulary_mastered() -> u32 {
    50
}

const fn default_grammar_rules_practiced() -> u32 {
    10
}

const fn default_pronunciation_mastered() -> u32 {
    5
}

const fn default_speaking_sessions() -> u32 {
    3
}

const fn default_max_error_activities() -> usize {
    10
}

/// Assessment and progress policy.
///
/// Upgrade and downgrade thresholds are asymmetric, and speaking mastery is
/// scored from completed session counts alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Overall score (percent) at or above which a beginner may move up.
    #[serde(default = "default_upgrade_threshold")]
    pub upgrade_threshold: f64,
    /// Overall score (percent) below which an intermediate learner moves down.
    #[serde(default = "default_downgrade_threshold")]
    pub downgrade_threshold: f64,
    /// Minimum score every pillar needs for an upgrade.
    #[serde(default = "default_pillar_upgrade_minimum")]
    pub pillar_upgrade_minimum: u32,
    /// Speaking score points per completed session in assessments.
    #[serde(default = "default_assessment_speaking_points")]
    pub assessment_speaking_points_per_session: u32,
    /// Speaking score points per completed session in progress reports.
    #[serde(default = "default_progress_speaking_points")]
    pub progress_speaking_points_per_session: u32,
    /// Activities between continuous assessments.
    #[serde(default = "default_sessions_between_assessments")]
    pub sessions_between_assessments: u32,
    /// Vocabulary items mastered before an upgrade.
    #[serde(default = "default_vocabulary_mastered")]
    pub vocabulary_mastered: u32,
    /// Grammar rules practiced before an upgrade.
    #[serde(default = "default_grammar_rules_practiced")]
    pub grammar_rules_practiced: u32,
    /// Sounds mastered before an upgrade.
    #[serde(default = "default_pronunciation_mastered")]
    pub pronunciation_mastered: u32,
    /// Speaking sessions completed before an upgrade.
    #[serde(default = "default_speaking_sessions")]
    pub speaking_sessions: u32,
    /// Remedial activities generated per interaction.
    #[serde(default = "default_max_error_activities")]
    pub max_error_activities: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            upgrade_threshold: default_upgrade_threshold(),
            downgrade_threshold: default_downgrade_threshold(),
            pillar_upgrade_minimum: default_pillar_upgrade_minimum(),
            assessment_speaking_points_per_session: default_assessment_speaking_points(),
            progress_speaking_points_per_session: default_progress_speaking_points(),
            sessions_between_assessments: default_sessions_between_assessments(),
            vocabulary_mastered: default_vocabulary_mastered(),
            grammar_rules_practiced: default_grammar_rules_practiced(),
            pronunciation_mastered: default_pronunciation_mastered(),
            speaking_sessions: default_speaking_sessions(),
            max_error_activities: default_max_error_activities(),
        }
    }
}

impl PolicyConfig {
    fn validate(&self) -> Result<()> {
        let percent = 0.0..=100.0;
        if !percent.contains(&self.upgrade_threshold)
            || !percent.contains(&self.downgrade_threshold)
        {
            return Err(TutorError::config_validation(
                "policy thresholds must be percentages between 0 and 100",
                "Set policy.upgradeThreshold and policy.downgradeThreshold within 0-100",
            ));
        }

        if self.downgrade_threshold > self.upgrade_threshold {
            return Err(TutorError::config_validation(
                "policy.downgradeThreshold must not exceed policy.upgradeThreshold",
                "Lower policy.downgradeThreshold or raise policy.upgradeThreshold",
            ));
        }

        if self.max_error_activities == 0 {
            return Err(TutorError::config_validation(
                "policy.maxErrorActivities must be greater than 0",
                "Set policy.maxErrorActivities to at least 1 in your tutor.json",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

const fn default_session_ttl() -> u64 {
    1800
}

const fn default_max_sessions() -> usize {
    1024
}

const fn default_max_turns() -> u32 {
    15
}

/// Speaking-session store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Idle seconds after which a session is evicted.
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
    /// Maximum live sessions; the least recently used is evicted beyond this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Learner turns after which a conversation ends.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            max_sessions: default_max_sessions(),
            max_turns: default_max_turns(),
        }
    }
}

impl SessionConfig {
    /// Idle lifetime of a session.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.ttl_seconds == 0 || self.max_sessions == 0 || self.max_turns == 0 {
            return Err(TutorError::config_validation(
                "session.ttlSeconds, session.maxSessions and session.maxTurns must be greater than 0",
                "Use positive values in the session section of your tutor.json",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.node_timeout_seconds, 30);
        assert_eq!(config.default_daily_goal_minutes, 30);
        assert_eq!(config.default_level, Level::Beginner);
        assert_eq!(config.data_file, "tutor-data.json");
        assert_eq!(config.scheduler.vocabulary_cap, 10);
        assert_eq!(config.session.max_turns, 15);
        assert!((config.policy.upgrade_threshold - 85.0).abs() < f64::EPSILON);
        assert!((config.policy.downgrade_threshold - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_minutes_for_kind() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.minutes_for(ActivityKind::VocabularyReview), 2);
        assert_eq!(scheduler.minutes_for(ActivityKind::VocabularyPractice), 2);
        assert_eq!(scheduler.minutes_for(ActivityKind::GrammarReview), 5);
        assert_eq!(scheduler.minutes_for(ActivityKind::PronunciationReview), 3);
        assert_eq!(scheduler.minutes_for(ActivityKind::SpeakingSession), 10);
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "srs": {"secondIntervalDays": 4},
            "scheduler": {"speakingMinutes": 15},
            "policy": {"upgradeThreshold": 90},
            "defaultLevel": "INTERMEDIATE",
            "unknownField": true
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.srs.second_interval_days, 4);
        assert_eq!(config.scheduler.speaking_minutes, 15);
        assert_eq!(config.scheduler.grammar_minutes, 5);
        assert!((config.policy.upgrade_threshold - 90.0).abs() < f64::EPSILON);
        assert_eq!(config.default_level, Level::Intermediate);
    }

    #[test]
    fn test_load_from_file_valid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_tutor_valid.json");
        let json = r#"{"nodeTimeoutSeconds": 5, "dataFile": "learners.json"}"#;
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.node_timeout(), Duration::from_secs(5));
        assert_eq!(config.data_file, "learners.json");

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_tutor_invalid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(
                &err,
                TutorError::ConfigParseError { path, message }
                    if *path == config_path && !message.is_empty()
            ),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let path = PathBuf::from("/nonexistent/path/tutor.json");
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.node_timeout_seconds, 30);
    }

    #[test]
    fn test_load_from_dir_finds_tutor_json() {
        let temp_dir = std::env::temp_dir().join("test_tutor_config_dir");
        std::fs::create_dir_all(&temp_dir).unwrap();
        let config_path = temp_dir.join("tutor.json");
        std::fs::write(&config_path, br#"{"defaultDailyGoalMinutes": 45}"#).unwrap();

        let config = Config::load_from_dir(&temp_dir).unwrap();
        assert_eq!(config.default_daily_goal_minutes, 45);

        std::fs::remove_file(&config_path).ok();
        std::fs::remove_dir(&temp_dir).ok();
    }

    #[test]
    fn test_validation_zero_timeout() {
        let config = Config {
            node_timeout_seconds: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nodeTimeoutSeconds"));
    }

    #[test]
    fn test_validation_inverted_thresholds() {
        let mut config = Config::default();
        config.policy.downgrade_threshold = 90.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("downgradeThreshold"));
    }

    #[test]
    fn test_validation_bad_srs_section() {
        let mut config = Config::default();
        config.srs.min_ease_factor = 5.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TutorError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_validation_zero_minutes() {
        let mut config = Config::default();
        config.scheduler.grammar_minutes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheduler.grammarMinutes"));
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_tutor_invalid_values.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"session": {"maxTurns": 0}}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(matches!(err, TutorError::ConfigValidationError { .. }));

        std::fs::remove_file(&config_path).ok();
    }
}
