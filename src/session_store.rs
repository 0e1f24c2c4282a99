//! The Session Store — an external collaborator mapping connection ids to
//! metadata across process instances.
//!
//! The Fan-Out Layer's in-memory socket set is a process-local optimization;
//! the Session Store is the cross-process source of truth used to enforce
//! per-user connection caps and to reconcile against during the periodic
//! cleanup sweep (§4.3).

use crate::domain::{DiscussionId, ParticipantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A live, authenticated persistent client socket registered against one
/// Discussion.
#[derive(Clone, Debug)]
pub struct Session {
    pub connection_id: Uuid,
    pub discussion_id: DiscussionId,
    pub user_id: String,
    pub participant_id: Option<ParticipantId>,
    pub authenticated: bool,
    pub security_level: i32,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
    pub rate_limit_reset_at: DateTime<Utc>,
    pub is_alive: bool,
    pub created_at: DateTime<Utc>,
}

/// Maps connection ids to [`Session`] metadata, with TTL-based eviction and
/// per-user connection counting.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session, ttl: Duration);
    async fn get(&self, connection_id: Uuid) -> Option<Session>;
    async fn remove(&self, connection_id: Uuid);
    async fn count_for_user(&self, user_id: &str) -> usize;
    /// All sessions currently recorded, for cleanup-sweep reconciliation
    /// against the fan-out layer's in-memory socket set.
    async fn all(&self) -> Vec<Session>;
}

struct Entry {
    session: Session,
    expires_at: DateTime<Utc>,
}

/// A process-local [`SessionStore`]. Suitable for single-instance
/// deployments and tests; a production cross-process deployment would swap
/// this for a Redis- or database-backed implementation behind the same
/// trait.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<Uuid, Entry>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn evict_expired(&self) {
        let now = Utc::now();
        self.sessions.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session, ttl: Duration) {
        self.evict_expired();
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        self.sessions.insert(session.connection_id, Entry { session, expires_at });
    }

    async fn get(&self, connection_id: Uuid) -> Option<Session> {
        self.evict_expired();
        self.sessions.get(&connection_id).map(|e| e.session.clone())
    }

    async fn remove(&self, connection_id: Uuid) {
        self.sessions.remove(&connection_id);
    }

    async fn count_for_user(&self, user_id: &str) -> usize {
        self.evict_expired();
        self.sessions.iter().filter(|e| e.session.user_id == user_id).count()
    }

    async fn all(&self) -> Vec<Session> {
        self.evict_expired();
        self.sessions.iter().map(|e| e.session.clone()).collect()
    }
}

/// Convenience alias for the trait object form used throughout the fan-out
/// layer.
pub type SharedSessionStore = Arc<dyn SessionStore>;
