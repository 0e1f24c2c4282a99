//! The Discussion Orchestrator — owns the authoritative runtime state of
//! every active Discussion, serializes mutations per-Discussion, coordinates
//! turn timers, and emits domain events.
//!
//! Grounded on this codebase's `Orchestration` (round-robin/moderated/
//! hierarchical collaboration driving a fixed agent roster) and
//! `CouncilSession` (turn-taking with a moderator), generalized to an
//! externally persisted, strategy-pluggable Discussion rather than an
//! in-memory agent roster.

mod turn_timer;

use crate::domain::{
    AuditMetadata, CurrentTurn, Discussion, DiscussionEvent, DiscussionEventData, DiscussionId, DiscussionPhase, DiscussionSettings,
    DiscussionState, DiscussionStatus, Message, MessageType, Participant, ParticipantId, ParticipantRole, Permission, Reaction,
    ReactionId, StrategyConfig, StrategyKind,
};
use crate::error::OrchestratorError;
use crate::event_bus::{SharedEventBus, DISCUSSION_EVENTS_CHANNEL};
use crate::repository::SharedRepository;
use crate::strategy::{self, TurnStrategy};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use turn_timer::TurnTimerRegistry;
use uuid::Uuid;

/// Command channel a peer service consumes to fulfil a bus-delegated
/// `CreateDiscussion` (§6 "Event Bus channels"). Paired with
/// [`EventBus::respond`] via the command's correlation id.
pub const DISCUSSION_COMMAND_CREATE_CHANNEL: &str = "discussion.command.create";

/// Default correlated-request timeout (§5 "Cancellation and timeouts": "a
/// default 5 s timeout").
const BUS_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Input to `CreateDiscussion`.
#[derive(Clone, Debug)]
pub struct CreateDiscussionRequest {
    pub topic: String,
    pub max_participants: usize,
    pub strategy_config: StrategyConfig,
}

/// Input to `AddParticipant`.
#[derive(Clone, Debug)]
pub struct ParticipantSpec {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub persona_id: Option<String>,
    pub role: ParticipantRole,
    pub permissions: std::collections::HashSet<Permission>,
}

/// Outcome of `RequestTurn`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnRequestOutcome {
    /// The requester is already the current speaker.
    Active,
    /// The requester is eligible; a future `AdvanceTurn`/moderator selection
    /// may grant them the turn.
    Queued,
    /// The requester is not currently eligible under the active strategy.
    Rejected,
}

/// Owns every live Discussion's runtime behavior: turn resolution, timer
/// scheduling, and event publication. Constructed once per process and
/// shared behind an `Arc` (see [`DiscussionOrchestrator::new`]).
pub struct DiscussionOrchestrator {
    repository: SharedRepository,
    event_bus: SharedEventBus,
    strategies: HashMap<StrategyKind, Arc<dyn TurnStrategy>>,
    locks: DashMap<DiscussionId, Arc<Mutex<()>>>,
    timers: TurnTimerRegistry,
    self_ref: Weak<DiscussionOrchestrator>,
}

impl DiscussionOrchestrator {
    pub fn new(repository: SharedRepository, event_bus: SharedEventBus) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            repository,
            event_bus,
            strategies: strategy::registry(),
            locks: DashMap::new(),
            timers: TurnTimerRegistry::new(),
            self_ref: self_ref.clone(),
        })
    }

    fn strategy_for(&self, kind: StrategyKind) -> Arc<dyn TurnStrategy> {
        strategy::lookup(&self.strategies, kind)
    }

    /// Exposes the Event Bus handle so the Fan-Out Layer can subscribe to
    /// `discussion.events` without re-threading it through construction.
    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    async fn lock_for(&self, id: DiscussionId) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        mutex.lock_owned().await
    }

    async fn publish(&self, discussion_id: DiscussionId, data: DiscussionEventData) {
        let event = DiscussionEvent::new(discussion_id, data, "orchestrator", chrono::Utc::now());
        if let Err(e) = self.event_bus.publish(DISCUSSION_EVENTS_CHANNEL, event).await {
            log::error!("failed to publish event for discussion {discussion_id}: {e}");
        }
    }

    fn validate_strategy_config(config: &StrategyConfig) -> Result<(), OrchestratorError> {
        if !(10..=3600).contains(&config.turn_timeout_secs) {
            return Err(OrchestratorError::policy_violation(format!(
                "turn_timeout_secs must be within [10, 3600], got {}",
                config.turn_timeout_secs
            )));
        }
        if config.max_messages_per_turn < 1 {
            return Err(OrchestratorError::policy_violation("max_messages_per_turn must be >= 1"));
        }
        if config.kind == StrategyKind::Moderated && !config.require_approval && config.approved_participants.is_empty() {
            return Err(OrchestratorError::policy_violation(
                "moderated strategy requires require_approval=true or a non-empty approved_participants list",
            ));
        }
        Ok(())
    }

    /// Schedules (or re-arms) the turn timer for `discussion_id` against
    /// `turn_number`, unless the strategy is free-form (which never times
    /// out a turn).
    fn arm_turn_timer(&self, discussion_id: DiscussionId, turn_number: u64, duration_secs: f64, strategy_kind: StrategyKind) {
        if strategy_kind == StrategyKind::FreeForm {
            return;
        }
        let Some(orchestrator) = self.self_ref.upgrade() else { return };
        let duration = Duration::from_secs_f64(duration_secs.max(0.0));
        self.timers.schedule(discussion_id, duration, async move {
            if let Err(e) = orchestrator.advance_turn_on_timeout(discussion_id, turn_number).await {
                log::warn!("turn timer advance failed for discussion {discussion_id}: {e}");
            }
        });
    }

    async fn advance_turn_on_timeout(&self, discussion_id: DiscussionId, generation: u64) -> Result<(), OrchestratorError> {
        let _guard = self.lock_for(discussion_id).await;
        let discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.status != DiscussionStatus::Active || discussion.state.current_turn.turn_number != generation {
            log::debug!("turn timer for discussion {discussion_id} is stale (generation {generation}), skipping");
            return Ok(());
        }
        self.advance_turn_locked(discussion, "system").await?;
        Ok(())
    }

    /// Resolves and commits the next turn for an already-locked Discussion.
    /// Callers must hold the per-Discussion lock.
    async fn advance_turn_locked(&self, mut discussion: Discussion, actor_id: &str) -> Result<Discussion, OrchestratorError> {
        let strategy = self.strategy_for(discussion.settings.strategy_config.kind);
        let active: Vec<Participant> = discussion.active_participants().cloned().collect();
        let resolution = strategy.resolve_next_turn(&discussion, &active, &discussion.settings.strategy_config);

        let previous_participant_id = discussion.state.current_turn.participant_id;
        discussion.state.current_turn = CurrentTurn {
            participant_id: resolution.next_participant,
            started_at: Some(chrono::Utc::now()),
            expected_end_at: Some(chrono::Utc::now() + chrono::Duration::seconds(resolution.estimated_duration_secs as i64)),
            turn_number: resolution.turn_number,
        };
        discussion.state.moderator.pending_selection = None;
        discussion.state.moderator.advance_requested = false;
        discussion.state.last_activity = chrono::Utc::now();
        discussion.metadata.touch(actor_id, chrono::Utc::now());

        let updated = self.repository.update_discussion(discussion).await?;
        self.arm_turn_timer(
            updated.id,
            resolution.turn_number,
            resolution.estimated_duration_secs,
            updated.settings.strategy_config.kind,
        );

        log::info!(
            "discussion {} advanced to turn {} (participant {:?})",
            updated.id,
            resolution.turn_number,
            resolution.next_participant
        );
        self.publish(
            updated.id,
            DiscussionEventData::TurnChanged {
                previous_participant_id,
                next_participant_id: resolution.next_participant,
                turn_number: resolution.turn_number,
                estimated_duration_secs: resolution.estimated_duration_secs,
            },
        )
        .await;
        Ok(updated)
    }

    pub async fn create_discussion(&self, request: CreateDiscussionRequest, creator_id: &str) -> Result<Discussion, OrchestratorError> {
        log::debug!("CreateDiscussion by {creator_id}: topic={:?}", request.topic);
        Self::validate_strategy_config(&request.strategy_config)?;

        let now = chrono::Utc::now();
        let discussion = Discussion {
            id: Uuid::new_v4(),
            status: DiscussionStatus::Draft,
            topic: request.topic,
            settings: DiscussionSettings {
                max_participants: request.max_participants,
                strategy_config: request.strategy_config,
            },
            state: DiscussionState::new(now),
            participants: Vec::new(),
            metadata: AuditMetadata::new(creator_id, now),
        };
        let created = self.repository.create_discussion(discussion).await?;
        log::info!("discussion {} created by {creator_id}", created.id);
        Ok(created)
    }

    /// Delegates `CreateDiscussion` to a peer service over the Event Bus's
    /// correlated request/response channel (§6 "Event Bus channels":
    /// `discussion.command.create`), rather than writing to the Repository
    /// directly. Intended for deployments where discussion provisioning is
    /// owned by another process; with no responder subscribed to
    /// [`DISCUSSION_COMMAND_CREATE_CHANNEL`] this always fails with
    /// "Request timeout: {id}" once [`BUS_REQUEST_TIMEOUT_SECS`] elapses.
    pub async fn create_discussion_via_bus(&self, request: CreateDiscussionRequest, creator_id: &str) -> Result<Discussion, OrchestratorError> {
        log::debug!("CreateDiscussion (bus) by {creator_id}: topic={:?}", request.topic);
        Self::validate_strategy_config(&request.strategy_config)?;

        let correlation_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "topic": request.topic,
            "maxParticipants": request.max_participants,
            "strategyConfig": request.strategy_config,
            "creatorId": creator_id,
        });
        let response = self
            .event_bus
            .request(DISCUSSION_COMMAND_CREATE_CHANNEL, correlation_id, payload, Duration::from_secs(BUS_REQUEST_TIMEOUT_SECS))
            .await?;
        let discussion: Discussion =
            serde_json::from_value(response).map_err(|e| OrchestratorError::fatal(format!("malformed create-discussion response: {e}")))?;
        log::info!("discussion {} created via bus by {creator_id}", discussion.id);
        Ok(discussion)
    }

    pub async fn start_discussion(&self, discussion_id: DiscussionId, actor_id: &str) -> Result<Discussion, OrchestratorError> {
        log::debug!("StartDiscussion {discussion_id} by {actor_id}");
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;

        if discussion.status != DiscussionStatus::Draft {
            log::warn!("StartDiscussion {discussion_id} rejected: not Draft");
            return Err(OrchestratorError::invalid_state(format!("discussion {discussion_id} is not in Draft status")));
        }
        if discussion.active_participants().count() < 2 {
            log::warn!("StartDiscussion {discussion_id} rejected: fewer than 2 active participants");
            return Err(OrchestratorError::invalid_state("at least 2 active participants are required to start"));
        }

        let previous = discussion.status;
        discussion.status = DiscussionStatus::Active;
        discussion.state.phase = DiscussionPhase::Discussion;
        discussion.metadata.touch(actor_id, chrono::Utc::now());
        let discussion = self.repository.update_discussion(discussion).await?;

        log::info!("discussion {discussion_id} started by {actor_id}");
        self.publish(discussion_id, DiscussionEventData::StatusChanged { previous, current: DiscussionStatus::Active }).await;

        let discussion = self.advance_turn_locked(discussion, actor_id).await?;
        Ok(discussion)
    }

    pub async fn add_participant(
        &self,
        discussion_id: DiscussionId,
        spec: ParticipantSpec,
        actor_id: &str,
    ) -> Result<Participant, OrchestratorError> {
        log::debug!("AddParticipant to {discussion_id} by {actor_id}");
        let _guard = self.lock_for(discussion_id).await;
        let discussion = self.repository.get_discussion(discussion_id).await?;

        if discussion.participants.len() >= discussion.settings.max_participants {
            log::warn!("AddParticipant to {discussion_id} rejected: capacity reached");
            return Err(OrchestratorError::policy_violation(format!(
                "discussion {discussion_id} has reached its participant capacity of {}",
                discussion.settings.max_participants
            )));
        }
        if spec.user_id.is_none() && spec.agent_id.is_none() {
            log::warn!("AddParticipant to {discussion_id} rejected: no userId or agentId");
            return Err(OrchestratorError::policy_violation("participant must specify either userId or agentId"));
        }

        let now = chrono::Utc::now();
        let participant = Participant {
            id: Uuid::new_v4(),
            discussion_id,
            user_id: spec.user_id,
            agent_id: spec.agent_id,
            persona_id: spec.persona_id,
            role: spec.role,
            is_active: true,
            permissions: spec.permissions,
            message_count: 0,
            joined_at: now,
            last_active_at: now,
            preferences: std::collections::HashMap::new(),
        };
        let participant = self.repository.add_participant(discussion_id, participant).await?;
        log::info!("participant {} added to discussion {discussion_id}", participant.id);
        self.publish(discussion_id, DiscussionEventData::ParticipantJoined { participant_id: participant.id }).await;
        Ok(participant)
    }

    pub async fn send_message(
        &self,
        discussion_id: DiscussionId,
        participant_id: ParticipantId,
        content: String,
        message_type: MessageType,
    ) -> Result<Message, OrchestratorError> {
        log::debug!("SendMessage to {discussion_id} from {participant_id}");
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;

        let participant = discussion
            .participant(participant_id)
            .ok_or_else(|| OrchestratorError::not_found("participant", participant_id))?;
        if !participant.can_send_messages() {
            log::warn!("SendMessage to {discussion_id} rejected: participant {participant_id} inactive or unauthorized");
            return Err(OrchestratorError::policy_violation("participant is inactive or cannot send messages"));
        }
        if !discussion.is_free_form() && discussion.state.current_turn.participant_id != Some(participant_id) {
            log::warn!("SendMessage to {discussion_id} rejected: not {participant_id}'s turn");
            return Err(OrchestratorError::policy_violation("it is not this participant's turn"));
        }

        let message = self
            .repository
            .send_message(discussion_id, participant_id, content, message_type)
            .await?;

        discussion.state.message_count += 1;
        discussion.state.last_activity = chrono::Utc::now();
        if let Some(p) = discussion.participant_mut(participant_id) {
            p.message_count += 1;
            p.last_active_at = chrono::Utc::now();
        }
        self.repository.update_discussion(discussion).await?;

        log::info!("message {} sent in discussion {discussion_id} by {participant_id}", message.id);
        self.publish(discussion_id, DiscussionEventData::MessageSent { message: message.clone() }).await;
        Ok(message)
    }

    pub async fn advance_turn(&self, discussion_id: DiscussionId, actor_id: &str) -> Result<Discussion, OrchestratorError> {
        log::debug!("AdvanceTurn {discussion_id} by {actor_id}");
        let _guard = self.lock_for(discussion_id).await;
        let discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.status != DiscussionStatus::Active {
            log::warn!("AdvanceTurn {discussion_id} rejected: not Active");
            return Err(OrchestratorError::invalid_state(format!("discussion {discussion_id} is not Active")));
        }
        self.advance_turn_locked(discussion, actor_id).await
    }

    pub async fn request_turn(&self, discussion_id: DiscussionId, participant_id: ParticipantId) -> Result<TurnRequestOutcome, OrchestratorError> {
        log::debug!("RequestTurn {discussion_id} by {participant_id}");
        let discussion = self.repository.get_discussion(discussion_id).await?;
        let participant = discussion
            .participant(participant_id)
            .ok_or_else(|| OrchestratorError::not_found("participant", participant_id))?;

        if !participant.is_active {
            log::warn!("RequestTurn {discussion_id} rejected: participant {participant_id} inactive");
            return Err(OrchestratorError::policy_violation("participant is inactive"));
        }
        if !participant.permissions.contains(&Permission::CanRequestTurn) {
            log::warn!("RequestTurn {discussion_id} rejected: participant {participant_id} lacks permission");
            return Err(OrchestratorError::policy_violation("participant is not permitted to request a turn"));
        }

        if discussion.state.current_turn.participant_id == Some(participant_id) {
            return Ok(TurnRequestOutcome::Active);
        }
        let strategy = self.strategy_for(discussion.settings.strategy_config.kind);
        if strategy.can_participant_take_turn(participant, &discussion, &discussion.settings.strategy_config) {
            Ok(TurnRequestOutcome::Queued)
        } else {
            Ok(TurnRequestOutcome::Rejected)
        }
    }

    pub async fn end_turn(&self, discussion_id: DiscussionId, participant_id: ParticipantId) -> Result<Discussion, OrchestratorError> {
        log::debug!("EndTurn {discussion_id} by {participant_id}");
        let _guard = self.lock_for(discussion_id).await;
        let discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.state.current_turn.participant_id != Some(participant_id) {
            log::warn!("EndTurn {discussion_id} rejected: not {participant_id}'s turn");
            return Err(OrchestratorError::policy_violation("it is not this participant's turn"));
        }
        let actor = participant_id.to_string();
        self.advance_turn_locked(discussion, &actor).await
    }

    pub async fn pause_discussion(&self, discussion_id: DiscussionId, actor_id: &str, _reason: Option<String>) -> Result<Discussion, OrchestratorError> {
        log::debug!("PauseDiscussion {discussion_id} by {actor_id}");
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.status != DiscussionStatus::Active {
            log::warn!("PauseDiscussion {discussion_id} rejected: not Active");
            return Err(OrchestratorError::invalid_state(format!("discussion {discussion_id} is not Active")));
        }

        self.timers.cancel(discussion_id);
        let remaining = discussion
            .state
            .current_turn
            .expected_end_at
            .map(|end| (end - chrono::Utc::now()).num_milliseconds().max(0) as f64 / 1000.0);
        discussion.state.paused_remaining_secs = remaining;

        let previous = discussion.status;
        discussion.status = DiscussionStatus::Paused;
        discussion.metadata.touch(actor_id, chrono::Utc::now());
        let discussion = self.repository.update_discussion(discussion).await?;

        log::info!("discussion {discussion_id} paused by {actor_id}");
        self.publish(discussion_id, DiscussionEventData::StatusChanged { previous, current: DiscussionStatus::Paused }).await;
        Ok(discussion)
    }

    pub async fn resume_discussion(&self, discussion_id: DiscussionId, actor_id: &str) -> Result<Discussion, OrchestratorError> {
        log::debug!("ResumeDiscussion {discussion_id} by {actor_id}");
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.status != DiscussionStatus::Paused {
            log::warn!("ResumeDiscussion {discussion_id} rejected: not Paused");
            return Err(OrchestratorError::invalid_state(format!("discussion {discussion_id} is not Paused")));
        }

        let remaining = discussion.state.paused_remaining_secs.take().unwrap_or(0.0);
        let previous = discussion.status;
        discussion.status = DiscussionStatus::Active;
        discussion.metadata.touch(actor_id, chrono::Utc::now());
        if remaining > 0.0 {
            discussion.state.current_turn.expected_end_at = Some(chrono::Utc::now() + chrono::Duration::milliseconds((remaining * 1000.0) as i64));
        }
        let discussion = self.repository.update_discussion(discussion).await?;

        log::info!("discussion {discussion_id} resumed by {actor_id}");
        self.publish(discussion_id, DiscussionEventData::StatusChanged { previous, current: DiscussionStatus::Active }).await;

        if remaining > 0.0 {
            self.arm_turn_timer(discussion_id, discussion.state.current_turn.turn_number, remaining, discussion.settings.strategy_config.kind);
            Ok(discussion)
        } else {
            self.advance_turn_locked(discussion, actor_id).await
        }
    }

    pub async fn end_discussion(&self, discussion_id: DiscussionId, actor_id: &str, _reason: Option<String>) -> Result<Discussion, OrchestratorError> {
        log::debug!("EndDiscussion {discussion_id} by {actor_id}");
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.status != DiscussionStatus::Active && discussion.status != DiscussionStatus::Paused {
            log::warn!("EndDiscussion {discussion_id} rejected: not Active or Paused");
            return Err(OrchestratorError::invalid_state(format!("discussion {discussion_id} is not Active or Paused")));
        }

        self.timers.cancel(discussion_id);
        let previous = discussion.status;
        discussion.status = DiscussionStatus::Completed;
        discussion.state.phase = DiscussionPhase::Conclusion;
        discussion.metadata.touch(actor_id, chrono::Utc::now());
        let discussion = self.repository.update_discussion(discussion).await?;

        log::info!("discussion {discussion_id} ended by {actor_id}");
        self.publish(discussion_id, DiscussionEventData::StatusChanged { previous, current: DiscussionStatus::Completed }).await;
        Ok(discussion)
    }

    pub async fn add_reaction(
        &self,
        discussion_id: DiscussionId,
        message_id: Uuid,
        participant_id: ParticipantId,
        emoji: String,
    ) -> Result<Reaction, OrchestratorError> {
        log::debug!("AddReaction to message {message_id} in {discussion_id} by {participant_id}");
        let discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.participant(participant_id).is_none() {
            log::warn!("AddReaction to {discussion_id} rejected: participant {participant_id} not in discussion");
            return Err(OrchestratorError::not_found("participant", participant_id));
        }

        let reaction = Reaction {
            id: ReactionId::new_v4(),
            message_id,
            discussion_id,
            participant_id,
            emoji,
            created_at: chrono::Utc::now(),
        };
        log::info!("reaction {} added to message {message_id} in discussion {discussion_id}", reaction.id);
        self.publish(discussion_id, DiscussionEventData::ReactionAdded { reaction: reaction.clone() }).await;
        Ok(reaction)
    }

    /// Never fails: an unknown Discussion or a `userId` with no matching
    /// active Participant simply resolves to `false`.
    pub async fn verify_participant_access(&self, discussion_id: DiscussionId, user_id: &str) -> bool {
        log::debug!("VerifyParticipantAccess {discussion_id} for {user_id}");
        match self.repository.get_discussion(discussion_id).await {
            Ok(discussion) => discussion.active_participants().any(|p| p.user_id.as_deref() == Some(user_id)),
            Err(_) => false,
        }
    }

    /// Moderator action: records a pending selection consulted by the
    /// Moderated strategy's `next_participant` (§4.2). The caller is
    /// responsible for checking `moderator_id` actually holds the
    /// Moderator role.
    pub async fn select_next_participant(&self, discussion_id: DiscussionId, moderator_id: ParticipantId, selected: ParticipantId) -> Result<(), OrchestratorError> {
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;
        let moderator = discussion
            .participant(moderator_id)
            .ok_or_else(|| OrchestratorError::not_found("participant", moderator_id))?;
        if moderator.role != ParticipantRole::Moderator {
            return Err(OrchestratorError::policy_violation("only a Moderator may select the next speaker"));
        }
        discussion.state.moderator.pending_selection = Some(selected);
        self.repository.update_discussion(discussion).await?;
        Ok(())
    }

    /// Replaces a Discussion's turn-strategy configuration, re-validating it
    /// the same way `CreateDiscussion` does (§6 command surface: "change
    /// strategy"). Does not re-arm the in-flight turn timer; the new
    /// configuration takes effect starting with the next `AdvanceTurn`.
    pub async fn change_strategy(&self, discussion_id: DiscussionId, strategy_config: StrategyConfig, actor_id: &str) -> Result<Discussion, OrchestratorError> {
        log::debug!("ChangeStrategy {discussion_id} by {actor_id}");
        Self::validate_strategy_config(&strategy_config)?;
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;
        if discussion.status.is_terminal() {
            log::warn!("ChangeStrategy {discussion_id} rejected: discussion is terminal");
            return Err(OrchestratorError::invalid_state(format!("discussion {discussion_id} is terminal")));
        }
        discussion.settings.strategy_config = strategy_config;
        discussion.metadata.touch(actor_id, chrono::Utc::now());
        let discussion = self.repository.update_discussion(discussion).await?;
        log::info!("discussion {discussion_id} strategy changed by {actor_id}");
        Ok(discussion)
    }

    /// Moderator action: flags the current turn for advancement on the next
    /// `AdvanceTurn` / timer check (§4.2).
    pub async fn moderator_request_advance(&self, discussion_id: DiscussionId, moderator_id: ParticipantId) -> Result<(), OrchestratorError> {
        let _guard = self.lock_for(discussion_id).await;
        let mut discussion = self.repository.get_discussion(discussion_id).await?;
        let moderator = discussion
            .participant(moderator_id)
            .ok_or_else(|| OrchestratorError::not_found("participant", moderator_id))?;
        if moderator.role != ParticipantRole::Moderator {
            return Err(OrchestratorError::policy_violation("only a Moderator may request turn advancement"));
        }
        discussion.state.moderator.advance_requested = true;
        self.repository.update_discussion(discussion).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::InMemoryEventBus;
    use crate::repository::InMemoryDiscussionRepository;
    use std::collections::HashSet;

    fn orchestrator() -> Arc<DiscussionOrchestrator> {
        DiscussionOrchestrator::new(Arc::new(InMemoryDiscussionRepository::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn participant_spec(user_id: &str, role: ParticipantRole) -> ParticipantSpec {
        ParticipantSpec {
            user_id: Some(user_id.into()),
            agent_id: None,
            persona_id: None,
            role,
            permissions: HashSet::from([Permission::CanSendMessages, Permission::CanRequestTurn]),
        }
    }

    #[tokio::test]
    async fn round_robin_happy_path() {
        let orchestrator = orchestrator();
        let discussion = orchestrator
            .create_discussion(
                CreateDiscussionRequest {
                    topic: "t".into(),
                    max_participants: 5,
                    strategy_config: StrategyConfig { turn_timeout_secs: 10, ..StrategyConfig::default() },
                },
                "creator",
            )
            .await
            .unwrap();

        let p1 = orchestrator.add_participant(discussion.id, participant_spec("p1", ParticipantRole::Participant), "creator").await.unwrap();
        let p2 = orchestrator.add_participant(discussion.id, participant_spec("p2", ParticipantRole::Participant), "creator").await.unwrap();
        let p3 = orchestrator.add_participant(discussion.id, participant_spec("p3", ParticipantRole::Participant), "creator").await.unwrap();

        let started = orchestrator.start_discussion(discussion.id, "creator").await.unwrap();
        assert_eq!(started.state.current_turn.participant_id, Some(p1.id));
        assert_eq!(started.state.current_turn.turn_number, 1);

        orchestrator.send_message(discussion.id, p1.id, "a".into(), MessageType::Text).await.unwrap();
        let rejected = orchestrator.send_message(discussion.id, p2.id, "b".into(), MessageType::Text).await;
        assert!(rejected.is_err());

        let after_end_turn = orchestrator.end_turn(discussion.id, p1.id).await.unwrap();
        assert_eq!(after_end_turn.state.current_turn.participant_id, Some(p2.id));
        assert_eq!(after_end_turn.state.current_turn.turn_number, 2);

        let _ = p3;
    }

    #[tokio::test]
    async fn start_fails_with_fewer_than_two_participants() {
        let orchestrator = orchestrator();
        let discussion = orchestrator
            .create_discussion(CreateDiscussionRequest { topic: "t".into(), max_participants: 5, strategy_config: StrategyConfig::default() }, "creator")
            .await
            .unwrap();
        orchestrator.add_participant(discussion.id, participant_spec("p1", ParticipantRole::Participant), "creator").await.unwrap();
        let result = orchestrator.start_discussion(discussion.id, "creator").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn moderated_gating() {
        let orchestrator = orchestrator();
        let discussion = orchestrator
            .create_discussion(
                CreateDiscussionRequest {
                    topic: "t".into(),
                    max_participants: 5,
                    strategy_config: StrategyConfig { kind: StrategyKind::Moderated, require_approval: true, ..StrategyConfig::default() },
                },
                "creator",
            )
            .await
            .unwrap();

        let moderator = orchestrator.add_participant(discussion.id, participant_spec("mod", ParticipantRole::Moderator), "creator").await.unwrap();
        let pa = orchestrator.add_participant(discussion.id, participant_spec("pa", ParticipantRole::Participant), "creator").await.unwrap();
        let _pb = orchestrator.add_participant(discussion.id, participant_spec("pb", ParticipantRole::Participant), "creator").await.unwrap();

        let started = orchestrator.start_discussion(discussion.id, "creator").await.unwrap();
        assert_eq!(started.state.current_turn.participant_id, Some(moderator.id));

        let rejected = orchestrator.send_message(discussion.id, pa.id, "hi".into(), MessageType::Text).await;
        assert!(rejected.is_err());

        orchestrator.select_next_participant(discussion.id, moderator.id, pa.id).await.unwrap();
        orchestrator.moderator_request_advance(discussion.id, moderator.id).await.unwrap();
        let advanced = orchestrator.advance_turn(discussion.id, "mod").await.unwrap();
        assert_eq!(advanced.state.current_turn.participant_id, Some(pa.id));

        orchestrator.send_message(discussion.id, pa.id, "hi".into(), MessageType::Text).await.unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume_preserves_turn_number() {
        let orchestrator = orchestrator();
        let discussion = orchestrator
            .create_discussion(
                CreateDiscussionRequest {
                    topic: "t".into(),
                    max_participants: 5,
                    strategy_config: StrategyConfig { turn_timeout_secs: 30, ..StrategyConfig::default() },
                },
                "creator",
            )
            .await
            .unwrap();
        orchestrator.add_participant(discussion.id, participant_spec("p1", ParticipantRole::Participant), "creator").await.unwrap();
        orchestrator.add_participant(discussion.id, participant_spec("p2", ParticipantRole::Participant), "creator").await.unwrap();
        let started = orchestrator.start_discussion(discussion.id, "creator").await.unwrap();
        let turn_number = started.state.current_turn.turn_number;

        let paused = orchestrator.pause_discussion(discussion.id, "creator", None).await.unwrap();
        assert_eq!(paused.status, DiscussionStatus::Paused);
        assert_eq!(paused.state.current_turn.turn_number, turn_number);

        let resumed = orchestrator.resume_discussion(discussion.id, "creator").await.unwrap();
        assert_eq!(resumed.status, DiscussionStatus::Active);
        assert_eq!(resumed.state.current_turn.turn_number, turn_number);
    }

    #[tokio::test]
    async fn create_discussion_via_bus_times_out_with_no_responder() {
        let orchestrator = orchestrator();
        let result = orchestrator
            .create_discussion_via_bus(CreateDiscussionRequest { topic: "t".into(), max_participants: 5, strategy_config: StrategyConfig::default() }, "creator")
            .await;
        match result {
            Err(OrchestratorError::TransientDependency(msg)) => assert!(msg.starts_with("Request timeout: ")),
            other => panic!("expected a bus request timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_discussion_via_bus_succeeds_when_a_responder_answers() {
        use crate::event_bus::{EventBus, InMemoryEventBus};

        let repository = Arc::new(InMemoryDiscussionRepository::new());
        let event_bus = Arc::new(InMemoryEventBus::new());
        let orchestrator = DiscussionOrchestrator::new(repository, event_bus.clone());

        let mut commands = event_bus.subscribe_commands(DISCUSSION_COMMAND_CREATE_CHANNEL);
        tokio::spawn(async move {
            let command = commands.recv().await.unwrap();
            let topic = command.payload.get("topic").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let now = chrono::Utc::now();
            let discussion = Discussion {
                id: Uuid::new_v4(),
                status: DiscussionStatus::Draft,
                topic,
                settings: DiscussionSettings { max_participants: 5, strategy_config: StrategyConfig::default() },
                state: DiscussionState::new(now),
                participants: Vec::new(),
                metadata: AuditMetadata::new("peer-service", now),
            };
            event_bus.respond(command.correlation_id, serde_json::to_value(discussion).unwrap());
        });

        let created = orchestrator
            .create_discussion_via_bus(CreateDiscussionRequest { topic: "bus topic".into(), max_participants: 5, strategy_config: StrategyConfig::default() }, "creator")
            .await
            .unwrap();
        assert_eq!(created.topic, "bus topic");
    }
}
