//! Tutor Spaced Repetition
//!
//! SM-2 review scheduling for learned units.
//!
//! This crate is pure calculation: given a [`ReviewRecord`] and a quality
//! score it produces the record's next review schedule, and it classifies
//! how urgently a record needs attention. It performs no I/O; persistence of
//! records belongs to the caller.

pub mod priority;
pub mod sm2;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use priority::{
    classify, days_until_due, is_low_accuracy, should_review_low_frequency, Priority,
};
pub use sm2::{
    calculate, is_due, quality_from_accuracy, quality_from_response, Quality, ReviewOutcome,
    ReviewRecord,
};

/// Errors raised by the spaced-repetition engine.
#[derive(Debug, Error, PartialEq)]
pub enum SrsError {
    /// A configuration value is out of range.
    #[error("invalid SRS setting '{field}': {reason}")]
    InvalidConfig {
        /// The offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Result type for SRS operations.
pub type Result<T> = std::result::Result<T, SrsError>;

// ============================================================================
// Configuration
// ============================================================================

/// Tunable constants of the SM-2 engine.
///
/// Deserializes from the `srs` section of the service configuration. Every
/// field has a default, so an empty object yields the standard SM-2 values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrsConfig {
    /// Interval after the first correct review, in days.
    #[serde(default = "default_initial_interval")]
    pub initial_interval_days: u32,

    /// Interval after the second consecutive correct review, in days.
    #[serde(default = "default_second_interval")]
    pub second_interval_days: u32,

    /// Ease factor assigned to a brand-new record.
    #[serde(default = "default_initial_ease")]
    pub initial_ease_factor: f64,

    /// Lower bound for the ease factor.
    #[serde(default = "default_min_ease")]
    pub min_ease_factor: f64,

    /// Days without practice after which an item counts as low-frequency.
    #[serde(default = "default_low_frequency_days")]
    pub low_frequency_days: u32,

    /// Accuracy percentage below which an item is considered weak.
    #[serde(default = "default_low_accuracy_threshold")]
    pub low_accuracy_threshold: f64,

    /// Response latency treated as "normal speed" when deriving quality.
    #[serde(default = "default_expected_response_ms")]
    pub expected_response_ms: u64,
}

const fn default_initial_interval() -> u32 {
    1
}

const fn default_second_interval() -> u32 {
    6
}

const fn default_initial_ease() -> f64 {
    2.5
}

const fn default_min_ease() -> f64 {
    1.3
}

const fn default_low_frequency_days() -> u32 {
    7
}

const fn default_low_accuracy_threshold() -> f64 {
    80.0
}

const fn default_expected_response_ms() -> u64 {
    5000
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            initial_interval_days: default_initial_interval(),
            second_interval_days: default_second_interval(),
            initial_ease_factor: default_initial_ease(),
            min_ease_factor: default_min_ease(),
            low_frequency_days: default_low_frequency_days(),
            low_accuracy_threshold: default_low_accuracy_threshold(),
            expected_response_ms: default_expected_response_ms(),
        }
    }
}

impl SrsConfig {
    /// Checks that the constants describe a usable schedule.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_srs::SrsConfig;
    ///
    /// assert!(SrsConfig::default().validate().is_ok());
    ///
    /// let broken = SrsConfig { min_ease_factor: 3.0, ..SrsConfig::default() };
    /// assert!(broken.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.initial_interval_days == 0 {
            return Err(SrsError::InvalidConfig {
                field: "initialIntervalDays",
                reason: "must be at least 1 day".to_string(),
            });
        }
        if self.second_interval_days < self.initial_interval_days {
            return Err(SrsError::InvalidConfig {
                field: "secondIntervalDays",
                reason: format!(
                    "must not be shorter than the initial interval ({})",
                    self.initial_interval_days
                ),
            });
        }
        if self.min_ease_factor.is_nan() || self.min_ease_factor <= 0.0 {
            return Err(SrsError::InvalidConfig {
                field: "minEaseFactor",
                reason: "must be positive".to_string(),
            });
        }
        if self.initial_ease_factor < self.min_ease_factor {
            return Err(SrsError::InvalidConfig {
                field: "initialEaseFactor",
                reason: format!(
                    "must be at least the minimum ease factor ({})",
                    self.min_ease_factor
                ),
            });
        }
        if !(0.0..=100.0).contains(&self.low_accuracy_threshold) {
            return Err(SrsError::InvalidConfig {
                field: "lowAccuracyThreshold",
                reason: "must be a percentage between 0 and 100".to_string(),
            });
        }
        if self.expected_response_ms == 0 {
            return Err(SrsError::InvalidConfig {
                field: "expectedResponseMs",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
