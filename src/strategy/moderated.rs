use super::TurnStrategy;
use crate::domain::{Discussion, Participant, ParticipantRole, StrategyConfig};
use chrono::Utc;

/// Default turn timeout for moderated discussions when the configured
/// `turn_timeout_secs` is left at the generic `StrategyConfig` default (300s
/// is round-robin's default; moderated discussions get 600s per §4.2 unless
/// the caller set an explicit value).
const MODERATED_DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Selection is driven by a human or agent Moderator rather than an
/// algorithm: `next_participant` returns whoever the moderator last
/// selected, or the Moderator themselves if nobody has been selected yet
/// (signalling that a moderator action is required).
pub struct ModeratedStrategy;

impl TurnStrategy for ModeratedStrategy {
    fn next_participant(&self, discussion: &Discussion, active_participants: &[Participant], _config: &StrategyConfig) -> Option<Participant> {
        if let Some(selected_id) = discussion.state.moderator.pending_selection {
            if let Some(p) = active_participants.iter().find(|p| p.id == selected_id) {
                return Some(p.clone());
            }
        }
        active_participants.iter().find(|p| p.role == ParticipantRole::Moderator).cloned()
    }

    fn can_participant_take_turn(&self, participant: &Participant, discussion: &Discussion, config: &StrategyConfig) -> bool {
        if participant.role == ParticipantRole::Moderator {
            return participant.can_send_messages();
        }
        if Some(participant.id) == discussion.state.current_turn.participant_id {
            return participant.can_send_messages();
        }
        participant.can_send_messages() && config.approved_participants.contains(&participant.id)
    }

    fn should_advance_turn(&self, discussion: &Discussion, _current_participant: Option<&Participant>, config: &StrategyConfig) -> bool {
        if discussion.state.moderator.advance_requested {
            return true;
        }
        let timeout = if config.turn_timeout_secs == StrategyConfig::default().turn_timeout_secs {
            MODERATED_DEFAULT_TIMEOUT_SECS
        } else {
            config.turn_timeout_secs
        };
        match discussion.state.current_turn.started_at {
            Some(started_at) => (Utc::now() - started_at).num_seconds().max(0) as u64 >= timeout,
            None => false,
        }
    }

    fn estimate_turn_duration(&self, _participant: &Participant, _discussion: &Discussion, config: &StrategyConfig) -> f64 {
        if config.turn_timeout_secs == StrategyConfig::default().turn_timeout_secs {
            MODERATED_DEFAULT_TIMEOUT_SECS as f64
        } else {
            config.turn_timeout_secs as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use std::collections::{HashMap, HashSet};
    use uuid::Uuid;

    fn participant(role: ParticipantRole) -> Participant {
        let now = Utc::now();
        Participant {
            id: Uuid::new_v4(),
            discussion_id: Uuid::new_v4(),
            user_id: Some("u".into()),
            agent_id: None,
            persona_id: None,
            role,
            is_active: true,
            permissions: HashSet::from([Permission::CanSendMessages]),
            message_count: 0,
            joined_at: now,
            last_active_at: now,
            preferences: HashMap::new(),
        }
    }

    fn discussion() -> Discussion {
        let now = Utc::now();
        Discussion {
            id: Uuid::new_v4(),
            status: DiscussionStatus::Active,
            topic: "t".into(),
            settings: DiscussionSettings {
                max_participants: 10,
                strategy_config: StrategyConfig { kind: StrategyKind::Moderated, ..StrategyConfig::default() },
            },
            state: DiscussionState::new(now),
            participants: vec![],
            metadata: AuditMetadata::new("tester", now),
        }
    }

    #[test]
    fn defaults_to_moderator_until_a_selection_is_made() {
        let moderator = participant(ParticipantRole::Moderator);
        let panelist = participant(ParticipantRole::Participant);
        let active = [moderator.clone(), panelist.clone()];
        let strategy = ModeratedStrategy;
        let config = StrategyConfig::default();
        let discussion = discussion();

        assert_eq!(strategy.next_participant(&discussion, &active, &config).unwrap().id, moderator.id);
    }

    #[test]
    fn honors_pending_moderator_selection() {
        let moderator = participant(ParticipantRole::Moderator);
        let panelist = participant(ParticipantRole::Participant);
        let active = [moderator.clone(), panelist.clone()];
        let strategy = ModeratedStrategy;
        let config = StrategyConfig::default();
        let mut discussion = discussion();
        discussion.state.moderator.pending_selection = Some(panelist.id);

        assert_eq!(strategy.next_participant(&discussion, &active, &config).unwrap().id, panelist.id);
    }

    #[test]
    fn unapproved_panelist_cannot_take_turn() {
        let panelist = participant(ParticipantRole::Participant);
        let strategy = ModeratedStrategy;
        let config = StrategyConfig::default();
        let discussion = discussion();
        assert!(!strategy.can_participant_take_turn(&panelist, &discussion, &config));
    }

    #[test]
    fn explicit_advance_flag_ends_turn() {
        let strategy = ModeratedStrategy;
        let config = StrategyConfig::default();
        let mut discussion = discussion();
        discussion.state.moderator.advance_requested = true;
        assert!(strategy.should_advance_turn(&discussion, None, &config));
    }
}
