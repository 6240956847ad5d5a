//! Persistence collaborator.
//!
//! The core never talks to a database directly. It consumes the
//! [`Persistence`] trait, which groups every record by learner so an
//! implementation can keep one learner's data together. [`MemoryStore`] is
//! the bundled implementation; it can be snapshotted to a JSON file.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use tutor_srs::{is_due, should_review_low_frequency};

use crate::error::{Result, TutorError};
use crate::model::{LearnerProfile, Pillar, ReviewItem, Schedule};

/// Storage operations the orchestrator relies on.
///
/// Writes are upserts keyed by the record's natural key; concurrent writers
/// for the same key resolve as last-write-wins.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Fetches a learner profile.
    async fn get_learner(&self, learner_id: &str) -> Result<Option<LearnerProfile>>;

    /// Inserts or replaces a learner profile.
    async fn put_learner(&self, learner: &LearnerProfile) -> Result<()>;

    /// Fetches one review item.
    async fn get_review_item(&self, learner_id: &str, item_id: &str) -> Result<Option<ReviewItem>>;

    /// Inserts or replaces one review item.
    async fn put_review_item(&self, item: &ReviewItem) -> Result<()>;

    /// Every item of one domain, ordered by item id.
    async fn list_review_items(&self, learner_id: &str, pillar: Pillar) -> Result<Vec<ReviewItem>>;

    /// Items of one domain that are due at `now`, most overdue first.
    async fn due_items(
        &self,
        learner_id: &str,
        pillar: Pillar,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewItem>>;

    /// Items not practiced within `days` days, least recently practiced first.
    async fn low_activity_items(
        &self,
        learner_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewItem>>;

    /// Fetches the schedule for a date.
    async fn get_schedule(&self, learner_id: &str, date: NaiveDate) -> Result<Option<Schedule>>;

    /// Inserts or replaces the schedule for its (learner, date) key.
    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Schedules with dates in `from..=to`, oldest first.
    async fn list_schedules(
        &self,
        learner_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Schedule>>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// All records of one learner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnerData {
    /// Profile, once written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<LearnerProfile>,
    /// Review items keyed by item id.
    #[serde(default)]
    pub items: BTreeMap<String, ReviewItem>,
    /// Schedules keyed by date.
    #[serde(default)]
    pub schedules: BTreeMap<NaiveDate, Schedule>,
}

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Per-learner data keyed by learner id.
    #[serde(default)]
    pub learners: BTreeMap<String, LearnerData>,
}

/// In-process [`Persistence`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, LearnerData>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            data: RwLock::new(snapshot.learners.into_iter().collect()),
        }
    }

    /// Copies the current contents into a snapshot.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let data = self.data.read().await;
        StoreSnapshot {
            learners: data
                .iter()
                .map(|(id, learner)| (id.clone(), learner.clone()))
                .collect(),
        }
    }

    /// Loads a store from a JSON snapshot file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: StoreSnapshot = serde_json::from_str(&contents)
            .map_err(|e| TutorError::data_corrupted(path, e.to_string()))?;
        debug!(path = %path.display(), learners = snapshot.learners.len(), "Loaded data snapshot");
        Ok(Some(Self::from_snapshot(snapshot)))
    }

    /// Writes the current contents to a JSON snapshot file.
    ///
    /// The file is written to a temporary sibling first and then renamed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        debug!(path = %path.display(), learners = snapshot.learners.len(), "Saved data snapshot");
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get_learner(&self, learner_id: &str) -> Result<Option<LearnerProfile>> {
        let data = self.data.read().await;
        Ok(data.get(learner_id).and_then(|d| d.profile.clone()))
    }

    async fn put_learner(&self, learner: &LearnerProfile) -> Result<()> {
        let mut data = self.data.write().await;
        data.entry(learner.id.clone()).or_default().profile = Some(learner.clone());
        Ok(())
    }

    async fn get_review_item(&self, learner_id: &str, item_id: &str) -> Result<Option<ReviewItem>> {
        let data = self.data.read().await;
        Ok(data
            .get(learner_id)
            .and_then(|d| d.items.get(item_id))
            .cloned())
    }

    async fn put_review_item(&self, item: &ReviewItem) -> Result<()> {
        let mut data = self.data.write().await;
        data.entry(item.learner_id.clone())
            .or_default()
            .items
            .insert(item.item_id.clone(), item.clone());
        Ok(())
    }

    async fn list_review_items(&self, learner_id: &str, pillar: Pillar) -> Result<Vec<ReviewItem>> {
        let data = self.data.read().await;
        Ok(data
            .get(learner_id)
            .map(|d| {
                d.items
                    .values()
                    .filter(|item| item.pillar == pillar)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn due_items(
        &self,
        learner_id: &str,
        pillar: Pillar,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewItem>> {
        let data = self.data.read().await;
        let mut items: Vec<ReviewItem> = data
            .get(learner_id)
            .map(|d| {
                d.items
                    .values()
                    .filter(|item| item.pillar == pillar && is_due(&item.srs, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| {
            a.srs
                .next_due
                .cmp(&b.srs.next_due)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(items)
    }

    async fn low_activity_items(
        &self,
        learner_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewItem>> {
        let data = self.data.read().await;
        let mut items: Vec<ReviewItem> = data
            .get(learner_id)
            .map(|d| {
                d.items
                    .values()
                    .filter(|item| should_review_low_frequency(item.last_practiced, days, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| {
            a.last_practiced
                .cmp(&b.last_practiced)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(items)
    }

    async fn get_schedule(&self, learner_id: &str, date: NaiveDate) -> Result<Option<Schedule>> {
        let data = self.data.read().await;
        Ok(data
            .get(learner_id)
            .and_then(|d| d.schedules.get(&date))
            .cloned())
    }

    async fn upsert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut data = self.data.write().await;
        data.entry(schedule.learner_id.clone())
            .or_default()
            .schedules
            .insert(schedule.date, schedule.clone());
        Ok(())
    }

    async fn list_schedules(
        &self,
        learner_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Schedule>> {
        if from > to {
            return Ok(Vec::new());
        }
        let data = self.data.read().await;
        Ok(data
            .get(learner_id)
            .map(|d| {
                d.schedules
                    .range(from..=to)
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use tutor_srs::SrsConfig;

    use super::*;
    use crate::model::GoalProgress;

    fn item(
        learner: &str,
        id: &str,
        pillar: Pillar,
        due_in: Duration,
        now: DateTime<Utc>,
    ) -> ReviewItem {
        let mut item = ReviewItem::new(learner, id, pillar, &SrsConfig::default(), now);
        item.srs.next_due = now + due_in;
        item
    }

    fn schedule(learner: &str, date: NaiveDate) -> Schedule {
        Schedule {
            id: Schedule::id_for(learner, date),
            learner_id: learner.to_string(),
            date,
            scheduled_reviews: Vec::new(),
            completed_reviews: Vec::new(),
            goal_progress: GoalProgress::default(),
        }
    }

    #[tokio::test]
    async fn test_learner_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get_learner("ana").await.unwrap().is_none());

        let learner = LearnerProfile::new("ana", 30);
        store.put_learner(&learner).await.unwrap();
        assert_eq!(store.get_learner("ana").await.unwrap(), Some(learner));
    }

    #[tokio::test]
    async fn test_due_items_filters_and_orders() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (learner, id, pillar, days) in [
            ("ana", "late", Pillar::Vocabulary, -3),
            ("ana", "later", Pillar::Vocabulary, -9),
            ("ana", "future", Pillar::Vocabulary, 2),
            ("ana", "rule", Pillar::Grammar, -1),
            ("bia", "other", Pillar::Vocabulary, -1),
        ] {
            let review = item(learner, id, pillar, Duration::days(days), now);
            store.put_review_item(&review).await.unwrap();
        }

        let due = store
            .due_items("ana", Pillar::Vocabulary, now)
            .await
            .unwrap();
        let ids: Vec<_> = due.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["later", "late"]);
    }

    #[tokio::test]
    async fn test_low_activity_items() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut stale = item("ana", "stale", Pillar::Vocabulary, Duration::days(3), now);
        stale.last_practiced = Some(now - Duration::days(10));
        let mut fresh = item("ana", "fresh", Pillar::Vocabulary, Duration::days(3), now);
        fresh.last_practiced = Some(now - Duration::days(1));
        store.put_review_item(&stale).await.unwrap();
        store.put_review_item(&fresh).await.unwrap();

        let low = store.low_activity_items("ana", 7, now).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].item_id, "stale");
    }

    #[tokio::test]
    async fn test_schedule_upsert_replaces_by_key() {
        let store = MemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let mut first = schedule("ana", date);
        store.upsert_schedule(&first).await.unwrap();
        first.goal_progress.goal_minutes = 45;
        store.upsert_schedule(&first).await.unwrap();

        let stored = store.get_schedule("ana", date).await.unwrap().unwrap();
        assert_eq!(stored.goal_progress.goal_minutes, 45);
        let all = store.list_schedules("ana", date, date).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_list_schedules_range() {
        let store = MemoryStore::new();
        let start = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        for offset in 0..5 {
            let day = schedule("ana", start + Duration::days(offset));
            store.upsert_schedule(&day).await.unwrap();
        }
        let window = store
            .list_schedules("ana", start + Duration::days(1), start + Duration::days(3))
            .await
            .unwrap();
        assert_eq!(window.len(), 3);
        let reversed = store
            .list_schedules("ana", start + Duration::days(3), start)
            .await
            .unwrap();
        assert!(reversed.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let path = std::env::temp_dir().join("test_tutor_store_snapshot.json");
        let store = MemoryStore::new();
        let profile = LearnerProfile::new("ana", 20);
        store.put_learner(&profile).await.unwrap();
        store.save(&path).await.unwrap();

        let loaded = MemoryStore::load(&path).await.unwrap().unwrap();
        let learner = loaded.get_learner("ana").await.unwrap().unwrap();
        assert_eq!(learner.daily_goal_minutes, 20);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_missing_returns_none() {
        let path = std::env::temp_dir().join("test_tutor_store_missing.json");
        std::fs::remove_file(&path).ok();
        let loaded = tokio_test::block_on(MemoryStore::load(&path)).unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupted_snapshot() {
        let path = std::env::temp_dir().join("test_tutor_store_corrupted.json");
        std::fs::write(&path, "{ broken").unwrap();
        let err = MemoryStore::load(&path).await.err().unwrap();
        assert!(matches!(err, TutorError::DataFileCorrupted { .. }));
        std::fs::remove_file(&path).ok();
    }
}
