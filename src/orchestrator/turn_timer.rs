//! Generation-keyed turn timer scheduling.
//!
//! At most one in-flight timer exists per Discussion. Scheduling a new timer
//! cancels whatever was previously armed. A fired timer is idempotent with
//! respect to a manual `AdvanceTurn` that raced it: the callback re-checks
//! the Discussion's `turnNumber` against the generation it was scheduled
//! with and is a no-op if they differ (see §5, "Ordering guarantees").

use crate::domain::DiscussionId;
use dashmap::DashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Tracks the single in-flight turn timer per Discussion. The generation a
/// timer fired for is checked by the caller's `on_fire` closure against the
/// Discussion's current `turnNumber`, not here — this registry only owns
/// cancellation.
#[derive(Default)]
pub struct TurnTimerRegistry {
    armed: DashMap<DiscussionId, JoinHandle<()>>,
}

impl TurnTimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any timer currently armed for `discussion_id`. A no-op if
    /// none is armed.
    pub fn cancel(&self, discussion_id: DiscussionId) {
        if let Some((_, handle)) = self.armed.remove(&discussion_id) {
            handle.abort();
        }
    }

    /// Arms a timer for `discussion_id`, firing `on_fire` after `duration`.
    /// Replaces any previously armed timer for the same Discussion.
    pub fn schedule<F>(&self, discussion_id: DiscussionId, duration: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel(discussion_id);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire.await;
        });
        self.armed.insert(discussion_id, handle);
    }
}
