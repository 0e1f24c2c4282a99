//! The Event Bus — an external, at-least-once publish/subscribe collaborator
//! with correlated request/response RPC.
//!
//! Per-channel ordering is not guaranteed across subscribers, but the
//! Orchestrator only relies on per-Discussion ordering of its own publishes,
//! which [`InMemoryEventBus`] preserves by publishing synchronously in the
//! order `publish` is called.
//!
//! The request/response half models the "callback-based event bus" redesign
//! note: pending requests sit in a map keyed by correlation id with an
//! attached deadline, cleaned on response or expiry.

use crate::domain::DiscussionEvent;
use crate::error::OrchestratorError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Channel name for the all-domain-events stream (§6).
pub const DISCUSSION_EVENTS_CHANNEL: &str = "discussion.events";

/// A correlated command sent over a request/response channel, e.g.
/// `discussion.command.create`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusCommand {
    pub correlation_id: Uuid,
    pub payload: Value,
}

/// Publish/subscribe with correlated request/response RPC against peer
/// services (agent-generation, LLM inference, task/project services).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Best-effort publish. A failure is logged by the caller and never
    /// rolls back a state transition (§4.1 "Event emission").
    async fn publish(&self, channel: &str, event: DiscussionEvent) -> Result<(), OrchestratorError>;

    /// Issue a correlated command and await its response, failing with
    /// [`OrchestratorError::TransientDependency`] ("Request timeout: {id}")
    /// if no response arrives within `timeout`.
    async fn request(
        &self,
        command_channel: &str,
        correlation_id: Uuid,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, OrchestratorError>;

    /// Deliver the response half of a pending [`EventBus::request`] call.
    /// A response for an unknown or already-expired correlation id is a
    /// silent no-op (the pending entry was already cleaned up).
    fn respond(&self, correlation_id: Uuid, payload: Value);

    /// Subscribe to all events published on `channel`. Used by the Fan-Out
    /// Layer to relay `discussion.events` to subscribed sockets.
    fn subscribe_events(&self, channel: &str) -> broadcast::Receiver<DiscussionEvent>;
}

/// An in-process [`EventBus`] built on `tokio::sync::broadcast` for pub/sub
/// and a correlation map of `tokio::sync::oneshot` senders for
/// request/response. Sufficient for tests and single-process deployments.
pub struct InMemoryEventBus {
    channels: DashMap<String, broadcast::Sender<DiscussionEvent>>,
    command_channels: DashMap<String, broadcast::Sender<BusCommand>>,
    pending: DashMap<Uuid, oneshot::Sender<Value>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            command_channels: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Subscribe to all events published on `channel`.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<DiscussionEvent> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .subscribe()
    }

    /// Subscribe to correlated commands issued on `command_channel` via
    /// [`EventBus::request`]. A peer service consumes these and eventually
    /// calls [`EventBus::respond`] with the matching correlation id.
    pub fn subscribe_commands(&self, command_channel: &str) -> broadcast::Receiver<BusCommand> {
        self.command_channels
            .entry(command_channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .subscribe()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, channel: &str, event: DiscussionEvent) -> Result<(), OrchestratorError> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0);
        // No subscribers is not an error: at-least-once delivery only binds
        // subscribers that exist when the event is produced.
        let _ = sender.send(event);
        Ok(())
    }

    async fn request(
        &self,
        command_channel: &str,
        correlation_id: Uuid,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);

        let sender = self
            .command_channels
            .entry(command_channel.to_string())
            .or_insert_with(|| broadcast::channel(1024).0);
        let _ = sender.send(BusCommand { correlation_id, payload });

        let result = tokio::time::timeout(timeout, rx).await;
        self.pending.remove(&correlation_id);
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(OrchestratorError::transient(format!("Request cancelled: {correlation_id}"))),
            Err(_) => Err(OrchestratorError::transient(format!("Request timeout: {correlation_id}"))),
        }
    }

    fn respond(&self, correlation_id: Uuid, payload: Value) {
        if let Some((_, tx)) = self.pending.remove(&correlation_id) {
            let _ = tx.send(payload);
        }
    }

    fn subscribe_events(&self, channel: &str) -> broadcast::Receiver<DiscussionEvent> {
        self.subscribe(channel)
    }
}

/// Convenience alias for the trait object form used throughout the
/// orchestrator.
pub type SharedEventBus = Arc<dyn EventBus>;
