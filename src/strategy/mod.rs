//! The Turn Strategy Engine — pluggable, stateless algorithms for deciding
//! who speaks next in a [`Discussion`].
//!
//! Every strategy implements the same four-operation contract
//! ([`TurnStrategy`]); all mutable context lives in the `Discussion` itself,
//! not in the strategy. The [`registry`] function builds the
//! `StrategyKind -> Arc<dyn TurnStrategy>` table once, at Orchestrator
//! construction — there is no runtime registration API, matching this
//! codebase's preference for statically-wired capability tables (see the
//! tool-protocol registries in `cloudllm::tool_protocol`).

mod context_aware;
mod moderated;
mod round_robin;

pub use context_aware::ContextAwareStrategy;
pub use moderated::ModeratedStrategy;
pub use round_robin::RoundRobinStrategy;

use crate::domain::{Discussion, Participant, StrategyConfig, StrategyKind, TurnResolution};
use std::collections::HashMap;
use std::sync::Arc;

/// The common contract every turn-selection algorithm implements.
///
/// Strategies are pure with respect to the `Discussion` they're given: no
/// strategy holds state across calls. Implementations must be `Send + Sync`
/// since a single instance is shared across every Discussion using that
/// strategy kind.
pub trait TurnStrategy: Send + Sync {
    /// Picks the next speaker, or `None` if none is eligible.
    fn next_participant(
        &self,
        discussion: &Discussion,
        active_participants: &[Participant],
        config: &StrategyConfig,
    ) -> Option<Participant>;

    /// Whether `participant` may currently hold the turn.
    fn can_participant_take_turn(&self, participant: &Participant, discussion: &Discussion, config: &StrategyConfig) -> bool;

    /// Whether the current turn should end now.
    fn should_advance_turn(&self, discussion: &Discussion, current_participant: Option<&Participant>, config: &StrategyConfig) -> bool;

    /// Expected duration, in seconds, of a turn about to start for `participant`.
    fn estimate_turn_duration(&self, participant: &Participant, discussion: &Discussion, config: &StrategyConfig) -> f64;

    /// Resolves the next turn in one shot: selects a participant, assigns it
    /// the next `turnNumber`, and estimates its duration. Used directly by
    /// `AdvanceTurn` and `EndTurn` in [`crate::orchestrator`].
    fn resolve_next_turn(&self, discussion: &Discussion, active_participants: &[Participant], config: &StrategyConfig) -> TurnResolution {
        let next = self.next_participant(discussion, active_participants, config);
        let estimated_duration_secs = next
            .as_ref()
            .map(|p| self.estimate_turn_duration(p, discussion, config))
            .unwrap_or(config.turn_timeout_secs as f64);
        TurnResolution {
            next_participant: next.map(|p| p.id),
            turn_number: discussion.state.current_turn.turn_number + 1,
            estimated_duration_secs,
        }
    }
}

/// Strategy implementation backing [`StrategyKind::FreeForm`]: nobody owns
/// the turn, so every operation is a no-op that never blocks a send.
pub struct FreeFormStrategy;

impl TurnStrategy for FreeFormStrategy {
    fn next_participant(&self, _discussion: &Discussion, _active_participants: &[Participant], _config: &StrategyConfig) -> Option<Participant> {
        None
    }

    fn can_participant_take_turn(&self, _participant: &Participant, _discussion: &Discussion, _config: &StrategyConfig) -> bool {
        true
    }

    fn should_advance_turn(&self, _discussion: &Discussion, _current_participant: Option<&Participant>, _config: &StrategyConfig) -> bool {
        false
    }

    fn estimate_turn_duration(&self, _participant: &Participant, _discussion: &Discussion, _config: &StrategyConfig) -> f64 {
        0.0
    }
}

/// Builds the static `StrategyKind -> Arc<dyn TurnStrategy>` registry
/// consulted by [`crate::orchestrator::DiscussionOrchestrator`]. A Discussion
/// whose configured kind is somehow absent from this table falls back to
/// round-robin (this should not happen in practice since `StrategyKind` is
/// exhaustive, but `lookup` below enforces the fallback regardless).
pub fn registry() -> HashMap<StrategyKind, Arc<dyn TurnStrategy>> {
    let mut map: HashMap<StrategyKind, Arc<dyn TurnStrategy>> = HashMap::new();
    map.insert(StrategyKind::RoundRobin, Arc::new(RoundRobinStrategy));
    map.insert(StrategyKind::Moderated, Arc::new(ModeratedStrategy));
    map.insert(StrategyKind::ContextAware, Arc::new(ContextAwareStrategy::new()));
    map.insert(StrategyKind::FreeForm, Arc::new(FreeFormStrategy));
    map
}

/// Looks up `kind` in `registry`, falling back to round-robin and logging a
/// warning if the kind is unknown (per §4.2: "If a requested strategy is
/// unknown, the engine falls back to round-robin and logs a warning").
pub fn lookup(registry: &HashMap<StrategyKind, Arc<dyn TurnStrategy>>, kind: StrategyKind) -> Arc<dyn TurnStrategy> {
    registry.get(&kind).cloned().unwrap_or_else(|| {
        log::warn!("unknown strategy kind {kind:?}, falling back to round-robin");
        registry
            .get(&StrategyKind::RoundRobin)
            .cloned()
            .expect("round-robin is always registered")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_falls_back_to_round_robin() {
        let mut reg = registry();
        reg.remove(&StrategyKind::ContextAware);
        let strategy = lookup(&reg, StrategyKind::ContextAware);
        // We can't downcast a trait object cleanly here, but we can confirm
        // it behaves like round-robin on an empty participant list.
        let discussion = crate::domain::Discussion {
            id: uuid::Uuid::new_v4(),
            status: crate::domain::DiscussionStatus::Active,
            topic: "t".into(),
            settings: crate::domain::DiscussionSettings {
                max_participants: 10,
                strategy_config: StrategyConfig::default(),
            },
            state: crate::domain::DiscussionState::new(chrono::Utc::now()),
            participants: vec![],
            metadata: crate::domain::AuditMetadata::new("tester", chrono::Utc::now()),
        };
        assert!(strategy.next_participant(&discussion, &[], &StrategyConfig::default()).is_none());
    }
}
