//! Core data model for discussions, participants, messages, and events.
//!
//! These types are deliberately plain data — no behavior lives here beyond small
//! query helpers. The [`crate::orchestrator`] module owns all state transitions;
//! the [`crate::strategy`] module consumes snapshots of this data to pick the
//! next speaker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Stable opaque identifier for a [`Discussion`].
pub type DiscussionId = Uuid;
/// Stable opaque identifier for a [`Participant`].
pub type ParticipantId = Uuid;
/// Stable opaque identifier for a [`Message`].
pub type MessageId = Uuid;
/// Stable opaque identifier for a [`Reaction`].
pub type ReactionId = Uuid;
/// Stable opaque identifier for a [`DiscussionEvent`].
pub type EventId = Uuid;

/// Lifecycle status of a [`Discussion`].
///
/// `Active` is reachable only from `Draft` or `Paused`. `Completed` and
/// `Cancelled` are terminal; `Archived` is reachable only from a terminal
/// status via an explicit archive operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscussionStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
    Archived,
}

impl DiscussionStatus {
    /// Terminal statuses admit no further mutating operations.
    pub fn is_terminal(self) -> bool {
        matches!(self, DiscussionStatus::Completed | DiscussionStatus::Cancelled | DiscussionStatus::Archived)
    }
}

/// Coarse phase of a discussion, independent of turn-taking mechanics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscussionPhase {
    Setup,
    Discussion,
    Conclusion,
}

/// Role a [`Participant`] plays within a [`Discussion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantRole {
    Moderator,
    Facilitator,
    Expert,
    Participant,
    Observer,
}

/// A capability a [`Participant`] may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    CanSendMessages,
    CanRequestTurn,
    CanModerate,
    CanReact,
}

/// Which turn-selection algorithm governs a [`Discussion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    RoundRobin,
    Moderated,
    ContextAware,
    /// No turn ownership: any participant with `CanSendMessages` may speak at
    /// any time. `currentTurn.participantId` is always absent.
    FreeForm,
}

/// Configuration for a [`StrategyKind`], validated at `CreateDiscussion` time.
///
/// Only the fields relevant to the selected `kind` are consulted; the engine
/// does not cross-validate fields belonging to a different strategy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    /// Seconds a turn may run before `ShouldAdvanceTurn` fires on timeout.
    /// Bounds: `[10, 3600]`. Defaults differ by strategy (see §4.2).
    pub turn_timeout_secs: u64,
    /// Moderated: participant ids pre-approved to speak without an explicit
    /// per-turn selection.
    pub approved_participants: HashSet<ParticipantId>,
    /// Moderated: requires an explicit selection mechanism when `true`.
    pub require_approval: bool,
    /// Cooldown seconds between two turns for the same participant. `>= 0`.
    pub cooldown_secs: u64,
    /// Maximum messages a participant may send within a single turn. `>= 1`.
    pub max_messages_per_turn: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::RoundRobin,
            turn_timeout_secs: 300,
            approved_participants: HashSet::new(),
            require_approval: false,
            cooldown_secs: 0,
            max_messages_per_turn: 1,
        }
    }
}

/// Per-discussion settings fixed at creation time (the strategy config may
/// be changed later via [`crate::orchestrator::DiscussionOrchestrator::change_strategy`],
/// which re-validates it).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscussionSettings {
    pub max_participants: usize,
    pub strategy_config: StrategyConfig,
}

/// Audit trail carried in `Discussion.metadata`.
///
/// Modeled as a typed struct rather than an open-ended map — see the
/// "duck-typed event payloads" redesign note.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub last_modified_at: DateTime<Utc>,
}

impl AuditMetadata {
    pub fn new(actor: impl Into<String>, now: DateTime<Utc>) -> Self {
        let actor = actor.into();
        Self {
            created_by: actor.clone(),
            created_at: now,
            last_modified_by: actor,
            last_modified_at: now,
        }
    }

    pub fn touch(&mut self, actor: impl Into<String>, now: DateTime<Utc>) {
        self.last_modified_by = actor.into();
        self.last_modified_at = now;
    }
}

/// Moderator scratch state threaded through `Discussion.metadata` for the
/// Moderated strategy. Survives pause/resume (see DESIGN.md open question).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModeratorState {
    pub pending_selection: Option<ParticipantId>,
    pub advance_requested: bool,
}

/// Snapshot of the currently active turn within a [`Discussion`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CurrentTurn {
    pub participant_id: Option<ParticipantId>,
    pub started_at: Option<DateTime<Utc>>,
    pub expected_end_at: Option<DateTime<Utc>>,
    /// Monotonically non-decreasing across a Discussion's lifecycle.
    pub turn_number: u64,
}

/// Mutable runtime state embedded in a [`Discussion`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscussionState {
    pub current_turn: CurrentTurn,
    pub phase: DiscussionPhase,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
    pub consensus_level: Option<f32>,
    pub moderator: ModeratorState,
    /// Seconds remaining on the turn timer at the moment of `PauseDiscussion`,
    /// consulted by `ResumeDiscussion` to re-arm the timer (§4.1 "Turn timer
    /// management"). `None` while the discussion is not paused.
    pub paused_remaining_secs: Option<f64>,
}

impl DiscussionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_turn: CurrentTurn::default(),
            phase: DiscussionPhase::Setup,
            message_count: 0,
            last_activity: now,
            consensus_level: None,
            moderator: ModeratorState::default(),
            paused_remaining_secs: None,
        }
    }
}

/// A participant in a discussion — human (`user_id`) or agent (`agent_id`),
/// never neither.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub discussion_id: DiscussionId,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub persona_id: Option<String>,
    pub role: ParticipantRole,
    pub is_active: bool,
    pub permissions: HashSet<Permission>,
    pub message_count: u64,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub preferences: HashMap<String, serde_json::Value>,
}

impl Participant {
    pub fn can_send_messages(&self) -> bool {
        self.is_active && self.permissions.contains(&Permission::CanSendMessages)
    }

    pub fn response_delay_secs(&self) -> Option<f64> {
        self.preferences.get("responseDelay").and_then(|v| v.as_f64())
    }
}

/// Type of a [`Message`]'s content, distinguishing ordinary chat text from
/// system/control messages injected by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    System,
    ToolResult,
}

/// An append-only chat message. `content` is size-bounded by the fan-out
/// layer's frame-size cap before it ever reaches the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub discussion_id: DiscussionId,
    pub participant_id: ParticipantId,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// A reaction to a [`Message`] — append-only, like messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reaction {
    pub id: ReactionId,
    pub message_id: MessageId,
    pub discussion_id: DiscussionId,
    pub participant_id: ParticipantId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// The full, authoritative record of a discussion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Discussion {
    pub id: DiscussionId,
    pub status: DiscussionStatus,
    pub topic: String,
    pub settings: DiscussionSettings,
    pub state: DiscussionState,
    pub participants: Vec<Participant>,
    pub metadata: AuditMetadata,
}

impl Discussion {
    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_active)
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn is_free_form(&self) -> bool {
        matches!(self.settings.strategy_config.kind, StrategyKind::FreeForm)
    }
}

/// Variant-specific payload of a [`DiscussionEvent`] — a tagged union, not an
/// open-ended map (see "duck-typed event payloads" redesign note).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DiscussionEventData {
    StatusChanged {
        previous: DiscussionStatus,
        current: DiscussionStatus,
    },
    TurnChanged {
        previous_participant_id: Option<ParticipantId>,
        next_participant_id: Option<ParticipantId>,
        turn_number: u64,
        estimated_duration_secs: f64,
    },
    ParticipantJoined {
        participant_id: ParticipantId,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
    },
    MessageSent {
        message: Message,
    },
    ReactionAdded {
        reaction: Reaction,
    },
}

/// A value describing a completed state transition in a [`Discussion`].
///
/// Published to the event bus channel `discussion.events` and broadcast to
/// subscribed fan-out sessions (see [`crate::fanout`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscussionEvent {
    pub id: EventId,
    pub discussion_id: DiscussionId,
    pub data: DiscussionEventData,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl DiscussionEvent {
    pub fn new(discussion_id: DiscussionId, data: DiscussionEventData, source: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            discussion_id,
            data,
            timestamp: now,
            source: source.into(),
        }
    }
}

/// The decision produced by a [`crate::strategy::TurnStrategy`] for one
/// turn transition.
#[derive(Clone, Debug)]
pub struct TurnResolution {
    pub next_participant: Option<ParticipantId>,
    pub turn_number: u64,
    pub estimated_duration_secs: f64,
}
