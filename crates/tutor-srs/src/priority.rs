//! Review urgency classification.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ReviewRecord;

/// Days overdue beyond which a record becomes high priority.
const HIGH_PRIORITY_OVERDUE_DAYS: i64 = 7;

const SECONDS_PER_DAY: i64 = 86_400;

/// Coarse urgency tier of a review item.
///
/// Ordering follows urgency: `High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Not yet due.
    Low,
    /// Due today or overdue by at most a week.
    Normal,
    /// Overdue by more than a week.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Whole days until the record is due, floored. Negative when overdue.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use tutor_srs::{days_until_due, ReviewRecord, SrsConfig};
///
/// let now = Utc::now();
/// let mut record = ReviewRecord::new(&SrsConfig::default(), now);
///
/// record.next_due = now - Duration::hours(1);
/// assert_eq!(days_until_due(&record, now), -1);
///
/// record.next_due = now + Duration::hours(30);
/// assert_eq!(days_until_due(&record, now), 1);
/// ```
#[must_use]
pub fn days_until_due(record: &ReviewRecord, now: DateTime<Utc>) -> i64 {
    (record.next_due - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Classifies how urgently a record needs review.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use tutor_srs::{classify, Priority, ReviewRecord, SrsConfig};
///
/// let now = Utc::now();
/// let mut record = ReviewRecord::new(&SrsConfig::default(), now);
/// assert_eq!(classify(&record, now), Priority::Normal);
///
/// record.next_due = now - Duration::days(10);
/// assert_eq!(classify(&record, now), Priority::High);
///
/// record.next_due = now + Duration::days(3);
/// assert_eq!(classify(&record, now), Priority::Low);
/// ```
#[must_use]
pub fn classify(record: &ReviewRecord, now: DateTime<Utc>) -> Priority {
    let days = days_until_due(record, now);
    if days < -HIGH_PRIORITY_OVERDUE_DAYS {
        Priority::High
    } else if days <= 0 {
        Priority::Normal
    } else {
        Priority::Low
    }
}

/// Returns `true` when an item has gone unpracticed for at least
/// `threshold_days`. Items never practiced always qualify.
#[must_use]
pub fn should_review_low_frequency(
    last_practiced: Option<DateTime<Utc>>,
    threshold_days: u32,
    now: DateTime<Utc>,
) -> bool {
    last_practiced.map_or(true, |last| {
        (now - last).num_seconds().div_euclid(SECONDS_PER_DAY) >= i64::from(threshold_days)
    })
}

/// Returns `true` when an accuracy percentage is below the weak-item threshold.
#[must_use]
pub fn is_low_accuracy(accuracy: f64, threshold: f64) -> bool {
    accuracy < threshold
}
