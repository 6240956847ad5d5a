//! Speaking-session store.
//!
//! Conversations span several interactions, so their state lives outside any
//! single walk. The store is injected into the speaking capability and owns
//! session lifetime: idle sessions expire after a TTL, and when the store is
//! full the least recently touched session is evicted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::state::LearnerError;

/// Who spoke in an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The learner.
    Learner,
    /// The tutor.
    Tutor,
}

/// One utterance in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// Speaker.
    pub role: Speaker,
    /// What was said.
    pub text: String,
    /// When it was said.
    pub timestamp: DateTime<Utc>,
}

/// A conversational practice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingSession {
    /// Session identifier.
    pub id: String,
    /// Owning learner.
    pub learner_id: String,
    /// Conversation topic.
    pub topic: String,
    /// Conversation so far.
    pub exchanges: Vec<Exchange>,
    /// Learner turns taken.
    pub current_turn: u32,
    /// Grammar mistakes collected so far.
    pub grammar_errors: Vec<LearnerError>,
    /// Pronunciation mistakes collected so far.
    pub pronunciation_errors: Vec<LearnerError>,
    /// Whether the conversation is still running.
    pub is_active: bool,
    /// When the session started.
    pub created_at: DateTime<Utc>,
    /// Last read or write.
    pub last_touched: DateTime<Utc>,
}

impl SpeakingSession {
    /// Starts a new session with a random identifier.
    #[must_use]
    pub fn start(learner_id: impl Into<String>, topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("speak_{}", uuid::Uuid::new_v4().simple()),
            learner_id: learner_id.into(),
            topic: topic.into(),
            exchanges: Vec::new(),
            current_turn: 0,
            grammar_errors: Vec::new(),
            pronunciation_errors: Vec::new(),
            is_active: true,
            created_at: now,
            last_touched: now,
        }
    }

    /// Appends an utterance.
    pub fn push_exchange(&mut self, role: Speaker, text: impl Into<String>) {
        self.exchanges.push(Exchange {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    /// Every collected mistake, grammar first.
    #[must_use]
    pub fn all_errors(&self) -> Vec<LearnerError> {
        self.grammar_errors
            .iter()
            .chain(&self.pronunciation_errors)
            .cloned()
            .collect()
    }

    /// Seconds between the session start and its last activity.
    #[must_use]
    pub fn elapsed_seconds(&self) -> u32 {
        let secs = (self.last_touched - self.created_at).num_seconds().max(0);
        u32::try_from(secs).unwrap_or(u32::MAX)
    }
}

/// Keyed storage for speaking sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetches a live session. Expired sessions are reported as absent.
    async fn get(&self, id: &str) -> Result<Option<SpeakingSession>>;

    /// Inserts or replaces a session, refreshing its idle timer.
    async fn put(&self, session: SpeakingSession) -> Result<()>;

    /// Removes a session. Returns `true` if it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Drops every expired session and returns how many were removed.
    async fn evict_expired(&self) -> usize;

    /// Number of live sessions.
    async fn active_count(&self) -> usize;
}

/// In-process [`SessionStore`] with TTL and capacity eviction.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SpeakingSession>>,
    ttl: chrono::Duration,
    capacity: usize,
}

impl MemorySessionStore {
    /// Creates a store whose sessions expire after `ttl` of inactivity and
    /// which holds at most `capacity` sessions.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            capacity: capacity.max(1),
        }
    }

    fn is_expired(&self, session: &SpeakingSession, now: DateTime<Utc>) -> bool {
        now - session.last_touched > self.ttl
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<SpeakingSession>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(session) if self.is_expired(session, now) => {
                debug!(session_id = %id, "Speaking session expired");
                sessions.remove(id);
                Ok(None)
            }
            Some(session) => Ok(Some(session.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, mut session: SpeakingSession) -> Result<()> {
        let now = Utc::now();
        session.last_touched = now;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !self.is_expired(s, now));

        if !sessions.contains_key(&session.id) && sessions.len() >= self.capacity {
            let oldest = sessions
                .values()
                .min_by_key(|s| s.last_touched)
                .map(|s| s.id.clone());
            if let Some(oldest) = oldest {
                debug!(session_id = %oldest, "Evicting least recently used speaking session");
                sessions.remove(&oldest);
            }
        }

        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        before - sessions.len()
    }

    async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
