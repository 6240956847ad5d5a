//! SM-2 interval calculation.
//!
//! Quality scale used throughout:
//!
//! | Quality | Meaning |
//! |---------|---------|
//! | 5 | perfect recall |
//! | 4 | correct after hesitation |
//! | 3 | correct with serious difficulty |
//! | 2 | incorrect, answer felt familiar |
//! | 1 | incorrect, remembered once shown |
//! | 0 | complete blackout |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::SrsConfig;

/// Quality score on the 0-5 SM-2 scale.
pub type Quality = u8;

/// Highest quality value.
const MAX_QUALITY: Quality = 5;

/// Lowest quality that counts as a correct answer.
const PASSING_QUALITY: Quality = 3;

// ============================================================================
// ReviewRecord
// ============================================================================

/// Review schedule of one learned unit for one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Multiplier controlling interval growth. Never below the configured floor.
    pub ease_factor: f64,

    /// Current interval in days (at least 1).
    pub interval_days: u32,

    /// Consecutive correct reviews.
    pub repetition_count: u32,

    /// When the unit is next due.
    pub next_due: DateTime<Utc>,

    /// When the unit was last reviewed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reviewed: Option<DateTime<Utc>>,
}

impl ReviewRecord {
    /// Creates the record for a unit practiced for the first time.
    ///
    /// The record is due immediately.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use tutor_srs::{ReviewRecord, SrsConfig};
    ///
    /// let now = Utc::now();
    /// let record = ReviewRecord::new(&SrsConfig::default(), now);
    /// assert_eq!(record.repetition_count, 0);
    /// assert_eq!(record.interval_days, 1);
    /// assert_eq!(record.next_due, now);
    /// ```
    #[must_use]
    pub const fn new(config: &SrsConfig, now: DateTime<Utc>) -> Self {
        Self {
            ease_factor: config.initial_ease_factor,
            interval_days: config.initial_interval_days,
            repetition_count: 0,
            next_due: now,
            last_reviewed: None,
        }
    }
}

/// Outcome of a single [`calculate`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    /// The updated record.
    pub record: ReviewRecord,
    /// The quality actually applied, after clamping.
    pub quality: Quality,
    /// Whether the quality counted as a correct answer.
    pub correct: bool,
}

// ============================================================================
// Calculation
// ============================================================================

/// Applies one review of the given quality to a record.
///
/// Qualities above 5 are clamped. A correct answer (quality 3 or more) grows
/// the interval: the initial interval after the first success, the second
/// interval after the next one, and `round(interval * ease)` afterwards. An
/// incorrect answer resets the repetition count and interval but leaves the
/// ease factor alone.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use tutor_srs::{calculate, ReviewRecord, SrsConfig};
///
/// let config = SrsConfig::default();
/// let now = Utc::now();
/// let fresh = ReviewRecord::new(&config, now);
///
/// let first = calculate(&fresh, 5, &config, now);
/// assert!(first.correct);
/// assert_eq!(first.record.interval_days, 1);
/// assert_eq!(first.record.repetition_count, 1);
/// assert!(first.record.ease_factor > 2.5);
///
/// let second = calculate(&first.record, 4, &config, now);
/// assert_eq!(second.record.interval_days, 6);
/// assert_eq!(second.record.repetition_count, 2);
/// ```
#[must_use]
pub fn calculate(
    record: &ReviewRecord,
    quality: Quality,
    config: &SrsConfig,
    now: DateTime<Utc>,
) -> ReviewOutcome {
    let quality = quality.min(MAX_QUALITY);
    let correct = quality >= PASSING_QUALITY;
    let mut ease = record.ease_factor.max(config.min_ease_factor);

    let (interval_days, repetition_count) = if correct {
        let interval = match record.repetition_count {
            0 => config.initial_interval_days,
            1 => config.second_interval_days,
            _ => scale_interval(record.interval_days, ease),
        };

        let miss = f64::from(MAX_QUALITY - quality);
        ease = (ease + (0.1 - miss * (0.08 + miss * 0.02))).max(config.min_ease_factor);

        (interval, record.repetition_count.saturating_add(1))
    } else {
        (config.initial_interval_days, 0)
    };

    let interval_days = interval_days.max(1);
    let record = ReviewRecord {
        ease_factor: round_ease(ease).max(config.min_ease_factor),
        interval_days,
        repetition_count,
        next_due: now + Duration::days(i64::from(interval_days)),
        last_reviewed: Some(now),
    };

    ReviewOutcome {
        record,
        quality,
        correct,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_interval(interval_days: u32, ease: f64) -> u32 {
    let scaled = (f64::from(interval_days) * ease).round();
    if scaled >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        scaled.max(1.0) as u32
    }
}

fn round_ease(ease: f64) -> f64 {
    (ease * 100.0).round() / 100.0
}

/// Returns `true` when the record is due at `now`.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use tutor_srs::{is_due, ReviewRecord, SrsConfig};
///
/// let now = Utc::now();
/// let mut record = ReviewRecord::new(&SrsConfig::default(), now);
/// assert!(is_due(&record, now));
///
/// record.next_due = now + Duration::hours(1);
/// assert!(!is_due(&record, now));
/// ```
#[must_use]
pub fn is_due(record: &ReviewRecord, now: DateTime<Utc>) -> bool {
    now >= record.next_due
}

// ============================================================================
// Quality conversions
// ============================================================================

/// Maps an accuracy percentage onto the quality scale.
///
/// Thresholds: 95 → 5, 85 → 4, 70 → 3, 50 → 2, 25 → 1, otherwise 0.
///
/// # Examples
///
/// ```
/// use tutor_srs::quality_from_accuracy;
///
/// assert_eq!(quality_from_accuracy(97.0), 5);
/// assert_eq!(quality_from_accuracy(70.0), 3);
/// assert_eq!(quality_from_accuracy(10.0), 0);
/// ```
#[must_use]
pub fn quality_from_accuracy(accuracy: f64) -> Quality {
    match accuracy {
        a if a >= 95.0 => 5,
        a if a >= 85.0 => 4,
        a if a >= 70.0 => 3,
        a if a >= 50.0 => 2,
        a if a >= 25.0 => 1,
        _ => 0,
    }
}

/// Derives quality from answer correctness and response latency.
///
/// A correct answer in at most half the expected time scores 5, within the
/// expected time 4, and slower 3. A wrong answer scores 2 when it came faster
/// than expected and 1 otherwise.
///
/// # Examples
///
/// ```
/// use tutor_srs::quality_from_response;
///
/// assert_eq!(quality_from_response(true, 2000, 5000), 5);
/// assert_eq!(quality_from_response(true, 5000, 5000), 4);
/// assert_eq!(quality_from_response(true, 9000, 5000), 3);
/// assert_eq!(quality_from_response(false, 1000, 5000), 2);
/// assert_eq!(quality_from_response(false, 8000, 5000), 1);
/// ```
#[must_use]
pub fn quality_from_response(correct: bool, response_ms: u64, expected_ms: u64) -> Quality {
    let expected_ms = expected_ms.max(1);
    if !correct {
        return if response_ms < expected_ms { 2 } else { 1 };
    }

    if response_ms.saturating_mul(2) <= expected_ms {
        5
    } else if response_ms <= expected_ms {
        4
    } else {
        3
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(ease: f64, interval: u32, reps: u32, now: DateTime<Utc>) -> ReviewRecord {
        ReviewRecord {
            ease_factor: ease,
            interval_days: interval,
            repetition_count: reps,
            next_due: now,
            last_reviewed: None,
        }
    }

    // ------------------------------------------------------------------------
    // calculate
    // ------------------------------------------------------------------------

    #[test]
    fn test_first_success_uses_initial_interval() {
        let config = SrsConfig::default();
        let now = Utc::now();
        for quality in 3..=5 {
            let outcome = calculate(&record(2.5, 4, 0, now), quality, &config, now);
            assert_eq!(outcome.record.interval_days, config.initial_interval_days);
            assert_eq!(outcome.record.repetition_count, 1);
            assert!(outcome.correct);
        }
    }

    #[test]
    fn test_failure_resets_regardless_of_prior_interval() {
        let config = SrsConfig::default();
        let now = Utc::now();
        for quality in 0..=2 {
            for interval in [1, 6, 40, 300] {
                let outcome = calculate(&record(2.2, interval, 7, now), quality, &config, now);
                assert_eq!(outcome.record.repetition_count, 0);
                assert_eq!(outcome.record.interval_days, config.initial_interval_days);
                assert!(!outcome.correct);
            }
        }
    }

    #[test]
    fn test_perfect_first_review_raises_ease() {
        let config = SrsConfig::default();
        let now = Utc::now();
        let outcome = calculate(&record(2.5, 1, 0, now), 5, &config, now);
        assert_eq!(outcome.record.interval_days, 1);
        assert_eq!(outcome.record.repetition_count, 1);
        assert!(outcome.record.ease_factor > 2.5);
        assert!((outcome.record.ease_factor - 2.6).abs() < 1e-9);
    }

    #[test]
    fn test_second_success_uses_second_interval() {
        let config = SrsConfig::default();
        let now = Utc::now();
        let first = calculate(&record(2.5, 1, 0, now), 5, &config, now);
        let second = calculate(&first.record, 4, &config, now);
        assert_eq!(second.record.interval_days, 6);
        assert_eq!(second.record.repetition_count, 2);
    }

    #[test]
    fn test_failure_keeps_ease() {
        let config = SrsConfig::default();
        let now = Utc::now();
        let outcome = calculate(&record(2.6, 6, 2, now), 1, &config, now);
        assert_eq!(outcome.record.interval_days, 1);
        assert_eq!(outcome.record.repetition_count, 0);
        assert!((outcome.record.ease_factor - 2.6).abs() < 1e-9);
    }

    #[test]
    fn test_mature_interval_scales_by_ease() {
        let config = SrsConfig::default();
        let now = Utc::now();
        let outcome = calculate(&record(2.5, 6, 2, now), 5, &config, now);
        assert_eq!(outcome.record.interval_days, 15);
        assert_eq!(outcome.record.repetition_count, 3);
    }

    #[test]
    fn test_ease_never_below_floor() {
        let config = SrsConfig::default();
        let now = Utc::now();
        let mut current = record(1.35, 10, 3, now);
        for quality in [3, 3, 3, 0, 3, 1, 4, 3] {
            current = calculate(&current, quality, &config, now).record;
            assert!(current.ease_factor >= config.min_ease_factor);
        }
        let below = calculate(&record(1.0, 1, 0, now), 0, &config, now);
        assert!(below.record.ease_factor >= config.min_ease_factor);
    }

    #[test]
    fn test_quality_is_clamped() {
        let config = SrsConfig::default();
        let now = Utc::now();
        let outcome = calculate(&record(2.5, 1, 0, now), 9, &config, now);
        assert_eq!(outcome.quality, 5);
    }

    #[test]
    fn test_next_due_is_now_plus_interval() {
        let config = SrsConfig::default();
        let now = Utc::now();
        let outcome = calculate(&record(2.5, 6, 2, now), 4, &config, now);
        assert_eq!(
            outcome.record.next_due,
            now + Duration::days(i64::from(outcome.record.interval_days))
        );
        assert_eq!(outcome.record.last_reviewed, Some(now));
    }

    // ------------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------------

    #[test]
    fn test_quality_from_accuracy_thresholds() {
        assert_eq!(quality_from_accuracy(100.0), 5);
        assert_eq!(quality_from_accuracy(95.0), 5);
        assert_eq!(quality_from_accuracy(94.9), 4);
        assert_eq!(quality_from_accuracy(85.0), 4);
        assert_eq!(quality_from_accuracy(70.0), 3);
        assert_eq!(quality_from_accuracy(50.0), 2);
        assert_eq!(quality_from_accuracy(25.0), 1);
        assert_eq!(quality_from_accuracy(24.9), 0);
    }

    #[test]
    fn test_quality_from_response_zero_expected() {
        assert_eq!(quality_from_response(true, 0, 0), 5);
    }

    #[test]
    fn test_record_serialization() {
        let now = Utc::now();
        let json = serde_json::to_string(&record(2.5, 1, 0, now)).unwrap();
        assert!(json.contains(r#""ease_factor":2.5"#));
        assert!(!json.contains("last_reviewed"));
    }
}
