use super::TurnStrategy;
use crate::domain::{Discussion, Participant, StrategyConfig};
use chrono::Utc;

/// Cycles speakers in join order. Position `currentTurnNumber mod N` of the
/// active-participant list ordered by `joinedAt` ascending, tie-broken by id.
pub struct RoundRobinStrategy;

impl RoundRobinStrategy {
    fn ordered(active_participants: &[Participant]) -> Vec<&Participant> {
        let mut ordered: Vec<&Participant> = active_participants.iter().collect();
        ordered.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        ordered
    }
}

impl TurnStrategy for RoundRobinStrategy {
    fn next_participant(&self, discussion: &Discussion, active_participants: &[Participant], _config: &StrategyConfig) -> Option<Participant> {
        let ordered = Self::ordered(active_participants);
        if ordered.is_empty() {
            return None;
        }
        let position = (discussion.state.current_turn.turn_number as usize) % ordered.len();
        Some(ordered[position].clone())
    }

    fn can_participant_take_turn(&self, participant: &Participant, _discussion: &Discussion, _config: &StrategyConfig) -> bool {
        participant.can_send_messages()
    }

    fn should_advance_turn(&self, discussion: &Discussion, _current_participant: Option<&Participant>, config: &StrategyConfig) -> bool {
        match discussion.state.current_turn.started_at {
            Some(started_at) => {
                let elapsed = (Utc::now() - started_at).num_seconds().max(0) as u64;
                elapsed >= config.turn_timeout_secs
            }
            None => false,
        }
    }

    fn estimate_turn_duration(&self, _participant: &Participant, _discussion: &Discussion, config: &StrategyConfig) -> f64 {
        config.turn_timeout_secs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::*;
    use std::collections::{HashMap, HashSet};
    use uuid::Uuid;

    fn participant(joined_at_offset_secs: i64) -> Participant {
        let now = Utc::now();
        Participant {
            id: Uuid::new_v4(),
            discussion_id: Uuid::new_v4(),
            user_id: Some("u".into()),
            agent_id: None,
            persona_id: None,
            role: ParticipantRole::Participant,
            is_active: true,
            permissions: HashSet::from([Permission::CanSendMessages]),
            message_count: 0,
            joined_at: now + chrono::Duration::seconds(joined_at_offset_secs),
            last_active_at: now,
            preferences: HashMap::new(),
        }
    }

    fn discussion_with_turn(turn_number: u64) -> Discussion {
        let now = Utc::now();
        let mut state = DiscussionState::new(now);
        state.current_turn.turn_number = turn_number;
        Discussion {
            id: Uuid::new_v4(),
            status: DiscussionStatus::Active,
            topic: "t".into(),
            settings: DiscussionSettings { max_participants: 10, strategy_config: StrategyConfig::default() },
            state,
            participants: vec![],
            metadata: AuditMetadata::new("tester", now),
        }
    }

    #[test]
    fn cycles_in_join_order() {
        let p1 = participant(0);
        let p2 = participant(1);
        let p3 = participant(2);
        let active = [p1.clone(), p2.clone(), p3.clone()];
        let strategy = RoundRobinStrategy;
        let config = StrategyConfig::default();

        let d0 = discussion_with_turn(0);
        assert_eq!(strategy.next_participant(&d0, &active, &config).unwrap().id, p1.id);

        let d1 = discussion_with_turn(1);
        assert_eq!(strategy.next_participant(&d1, &active, &config).unwrap().id, p2.id);

        let d3 = discussion_with_turn(3);
        assert_eq!(strategy.next_participant(&d3, &active, &config).unwrap().id, p1.id);
    }

    #[test]
    fn no_eligible_participant_yields_none() {
        let strategy = RoundRobinStrategy;
        let config = StrategyConfig::default();
        let discussion = discussion_with_turn(0);
        assert!(strategy.next_participant(&discussion, &[], &config).is_none());
    }

    #[test]
    fn advances_on_timeout() {
        let strategy = RoundRobinStrategy;
        let config = StrategyConfig { turn_timeout_secs: 10, ..StrategyConfig::default() };
        let mut discussion = discussion_with_turn(1);
        discussion.state.current_turn.started_at = Some(Utc::now() - chrono::Duration::seconds(11));
        assert!(strategy.should_advance_turn(&discussion, None, &config));

        discussion.state.current_turn.started_at = Some(Utc::now());
        assert!(!strategy.should_advance_turn(&discussion, None, &config));
    }
}
