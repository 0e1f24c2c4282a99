use super::{RoundRobinStrategy, TurnStrategy};
use crate::domain::{Discussion, DiscussionId, Participant, ParticipantId, ParticipantRole, StrategyConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex as StdMutex;

const CACHE_TTL_SECS: i64 = 30;

/// Per-participant composite score, cached per Discussion for
/// [`CACHE_TTL_SECS`] (§4.2: "The engine caches context analyses per
/// Discussion for 30 seconds").
#[derive(Clone, Copy, Debug)]
struct ScoredParticipant {
    id: ParticipantId,
    topic_relevance: f64,
    expertise_match: f64,
    engagement_level: f64,
}

impl ScoredParticipant {
    fn composite(&self) -> f64 {
        0.4 * self.topic_relevance + 0.3 * self.expertise_match + 0.3 * self.engagement_level
    }
}

struct CacheEntry {
    computed_at: DateTime<Utc>,
    scores: Vec<ScoredParticipant>,
}

/// Scores each active participant on topic relevance, expertise match, and
/// engagement, and selects the highest composite score. Falls back to
/// round-robin if scoring fails to find an eligible participant.
pub struct ContextAwareStrategy {
    cache: DashMap<DiscussionId, CacheEntry>,
    fallback: RoundRobinStrategy,
    // Guards recomputation so two racing callers don't both miss the cache
    // and recompute; a coarse lock is acceptable since scoring is pure CPU
    // work, not I/O.
    recompute_lock: StdMutex<()>,
}

impl ContextAwareStrategy {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            fallback: RoundRobinStrategy,
            recompute_lock: StdMutex::new(()),
        }
    }

    fn topic_relevance(discussion: &Discussion, participant: &Participant) -> f64 {
        let topic = discussion.topic.to_lowercase();
        let persona = participant.persona_id.as_deref().unwrap_or("").to_lowercase();
        if persona.is_empty() || topic.is_empty() {
            return 0.5;
        }
        let overlap = topic.split_whitespace().filter(|word| persona.contains(word)).count();
        (0.4 + overlap as f64 * 0.2).min(1.0)
    }

    fn expertise_match(participant: &Participant) -> f64 {
        let bonus: f64 = match participant.role {
            ParticipantRole::Expert => 0.3,
            ParticipantRole::Moderator => 0.2,
            _ => 0.0,
        };
        (0.5 + bonus).min(1.0)
    }

    fn engagement_level(discussion: &Discussion, participant: &Participant) -> f64 {
        let recency_secs = (Utc::now() - participant.last_active_at).num_seconds().max(0) as f64;
        let recency_score = 1.0 / (1.0 + recency_secs / 300.0);
        let total_messages = discussion.state.message_count.max(1) as f64;
        let share = participant.message_count as f64 / total_messages;
        (0.6 * recency_score + 0.4 * (1.0 - share)).clamp(0.0, 1.0)
    }

    /// Scores `active_participants`. The cache is keyed on Discussion id
    /// alone, so it is only consulted/populated when `active_participants`
    /// is the full active roster — a caller scoring a single participant
    /// (`can_participant_take_turn`, `estimate_turn_duration`) would
    /// otherwise overwrite the full-roster entry with a one-element result
    /// and poison a subsequent `next_participant` lookup within the TTL.
    fn scores_for(&self, discussion: &Discussion, active_participants: &[Participant]) -> Vec<ScoredParticipant> {
        let is_full_roster = active_participants.len() == discussion.active_participants().count();
        if is_full_roster {
            if let Some(entry) = self.cache.get(&discussion.id) {
                if (Utc::now() - entry.computed_at).num_seconds() < CACHE_TTL_SECS {
                    return entry.scores.clone();
                }
            }
        }
        let score_of = |p: &Participant| ScoredParticipant {
            id: p.id,
            topic_relevance: Self::topic_relevance(discussion, p),
            expertise_match: Self::expertise_match(p),
            engagement_level: Self::engagement_level(discussion, p),
        };
        if !is_full_roster {
            return active_participants.iter().map(score_of).collect();
        }
        let _guard = self.recompute_lock.lock().unwrap_or_else(|e| e.into_inner());
        let scores: Vec<ScoredParticipant> = active_participants.iter().map(score_of).collect();
        self.cache.insert(discussion.id, CacheEntry { computed_at: Utc::now(), scores: scores.clone() });
        scores
    }
}

impl Default for ContextAwareStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnStrategy for ContextAwareStrategy {
    fn next_participant(&self, discussion: &Discussion, active_participants: &[Participant], config: &StrategyConfig) -> Option<Participant> {
        if active_participants.is_empty() {
            return None;
        }
        let scores = self.scores_for(discussion, active_participants);
        let best = scores
            .iter()
            .filter(|s| s.topic_relevance >= 0.3 && s.engagement_level >= 0.2)
            .max_by(|a, b| a.composite().partial_cmp(&b.composite()).unwrap_or(std::cmp::Ordering::Equal));
        match best {
            Some(best) => active_participants.iter().find(|p| p.id == best.id).cloned(),
            None => self.fallback.next_participant(discussion, active_participants, config),
        }
    }

    fn can_participant_take_turn(&self, participant: &Participant, discussion: &Discussion, _config: &StrategyConfig) -> bool {
        if !participant.can_send_messages() {
            return false;
        }
        let active: Vec<Participant> = discussion.active_participants().cloned().collect();
        let scores = self.scores_for(discussion, &active);
        scores
            .iter()
            .find(|s| s.id == participant.id)
            .map(|s| s.topic_relevance >= 0.3 && s.engagement_level >= 0.2)
            .unwrap_or(false)
    }

    fn should_advance_turn(&self, discussion: &Discussion, current_participant: Option<&Participant>, config: &StrategyConfig) -> bool {
        let Some(current) = current_participant else { return false };
        if self.fallback.should_advance_turn(discussion, Some(current), config) {
            return true;
        }
        let active: Vec<Participant> = discussion.active_participants().cloned().collect();
        let scores = self.scores_for(discussion, &active);
        let current_relevance = scores.iter().find(|s| s.id == current.id).map(|s| s.topic_relevance).unwrap_or(0.0);
        scores.iter().any(|s| s.id != current.id && s.topic_relevance - current_relevance > 0.3)
    }

    fn estimate_turn_duration(&self, participant: &Participant, discussion: &Discussion, config: &StrategyConfig) -> f64 {
        let base = config.turn_timeout_secs as f64;
        let active: Vec<Participant> = discussion.active_participants().cloned().collect();
        let scores = self.scores_for(discussion, &active);
        let Some(score) = scores.iter().find(|s| s.id == participant.id) else { return base };
        if score.topic_relevance > 0.8 || score.expertise_match > 0.8 {
            base * 1.5
        } else if score.topic_relevance < 0.3 && score.expertise_match < 0.3 {
            base * 0.7
        } else {
            base
        }
    }
}
