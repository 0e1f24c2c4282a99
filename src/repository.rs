//! The Discussion Repository — an external, opaque persistence collaborator.
//!
//! The core never assumes a storage format; it only requires that
//! [`DiscussionRepository`] preserve every field of [`Discussion`],
//! [`Participant`], and [`Message`] verbatim across a write/read round trip.
//! [`InMemoryDiscussionRepository`] is a reference implementation used by
//! tests and by single-process deployments that don't need cross-instance
//! durability.

use crate::domain::{Discussion, DiscussionId, Message, MessageId, MessageType, Participant, ParticipantId};
use crate::error::OrchestratorError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// Patch applied to a [`Discussion`] by [`DiscussionRepository::update_discussion`].
///
/// The Orchestrator always reads the current Discussion, mutates an owned
/// copy, and writes the whole thing back — there is no field-level patch
/// protocol to keep the repository interface narrow.
pub type DiscussionPatch = Discussion;

/// Persists discussions, participants, and messages.
///
/// All operations are async and may fail with
/// [`OrchestratorError::TransientDependency`] (transient I/O failure) or
/// [`OrchestratorError::NotFound`] (unknown id).
#[async_trait]
pub trait DiscussionRepository: Send + Sync {
    async fn create_discussion(&self, discussion: Discussion) -> Result<Discussion, OrchestratorError>;
    async fn get_discussion(&self, id: DiscussionId) -> Result<Discussion, OrchestratorError>;
    async fn update_discussion(&self, patch: DiscussionPatch) -> Result<Discussion, OrchestratorError>;
    async fn add_participant(&self, discussion_id: DiscussionId, participant: Participant) -> Result<Participant, OrchestratorError>;
    async fn send_message(
        &self,
        discussion_id: DiscussionId,
        participant_id: ParticipantId,
        content: String,
        message_type: MessageType,
    ) -> Result<Message, OrchestratorError>;
}

/// A process-local, non-durable [`DiscussionRepository`] backed by
/// concurrent maps. Suitable for tests and for embedding in a process that
/// doesn't require surviving a restart.
#[derive(Default)]
pub struct InMemoryDiscussionRepository {
    discussions: DashMap<DiscussionId, Discussion>,
    messages: DashMap<MessageId, Message>,
}

impl InMemoryDiscussionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscussionRepository for InMemoryDiscussionRepository {
    async fn create_discussion(&self, discussion: Discussion) -> Result<Discussion, OrchestratorError> {
        self.discussions.insert(discussion.id, discussion.clone());
        Ok(discussion)
    }

    async fn get_discussion(&self, id: DiscussionId) -> Result<Discussion, OrchestratorError> {
        self.discussions
            .get(&id)
            .map(|d| d.clone())
            .ok_or_else(|| OrchestratorError::not_found("discussion", id))
    }

    async fn update_discussion(&self, patch: DiscussionPatch) -> Result<Discussion, OrchestratorError> {
        self.discussions.insert(patch.id, patch.clone());
        Ok(patch)
    }

    async fn add_participant(&self, discussion_id: DiscussionId, participant: Participant) -> Result<Participant, OrchestratorError> {
        let mut entry = self
            .discussions
            .get_mut(&discussion_id)
            .ok_or_else(|| OrchestratorError::not_found("discussion", discussion_id))?;
        entry.participants.push(participant.clone());
        Ok(participant)
    }

    async fn send_message(
        &self,
        discussion_id: DiscussionId,
        participant_id: ParticipantId,
        content: String,
        message_type: MessageType,
    ) -> Result<Message, OrchestratorError> {
        if !self.discussions.contains_key(&discussion_id) {
            return Err(OrchestratorError::not_found("discussion", discussion_id));
        }
        let message = Message {
            id: uuid::Uuid::new_v4(),
            discussion_id,
            participant_id,
            content,
            message_type,
            created_at: Utc::now(),
        };
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }
}

/// Convenience alias for the trait object form used throughout the
/// orchestrator.
pub type SharedRepository = Arc<dyn DiscussionRepository>;
