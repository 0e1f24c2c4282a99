//! Wire format for the persistent client-socket protocol (§6).
//!
//! Inbound frames are a loosely-typed envelope — the `type` field routes to
//! an Orchestrator operation the fan-out layer doesn't otherwise know about
//! — while outbound frames are a small, fixed set built directly as
//! `serde_json::Value`, the same way this codebase's HTTP adapter builds
//! its JSON responses with `serde_json::json!`.

use crate::domain::DiscussionEvent;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// An inbound frame from a connected client: `{ type, data?, messageId? }`.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: Value,
    pub message_id: Option<String>,
}

pub fn connection_established(discussion_id: Uuid, connection_id: Uuid, security_level: i32, messages_per_minute: u32, max_message_size: usize, max_connections_per_user: usize) -> Value {
    json!({
        "type": "connection.established",
        "data": {
            "discussionId": discussion_id,
            "connectionId": connection_id,
            "securityLevel": security_level,
            "rateLimits": {
                "messagesPerMinute": messages_per_minute,
                "maxMessageSize": max_message_size,
                "maxConnectionsPerUser": max_connections_per_user,
            },
            "timestamp": Utc::now(),
        }
    })
}

pub fn access_verified(discussion_id: Uuid, participant_id: Uuid) -> Value {
    json!({
        "type": "access.verified",
        "data": { "discussionId": discussion_id, "participantId": participant_id }
    })
}

pub fn discussion_event(event: &DiscussionEvent) -> Value {
    json!({
        "type": "discussion.event",
        "data": event,
    })
}

pub fn pong() -> Value {
    json!({ "type": "pong", "data": { "timestamp": Utc::now() } })
}

pub fn error_frame(message: impl Into<String>) -> Value {
    json!({ "type": "error", "data": { "message": message.into() } })
}

/// Result of a command forwarded from a socket to the Orchestrator
/// (`requestTurn`/`endTurn`/`addReaction`), sent only to the originating
/// socket per §4.3 — mirrors the `{ success, data?, error? }` shape the
/// command surface (§6) uses for the same operations.
pub fn command_result(operation: &str, result: Result<Value, String>) -> Value {
    match result {
        Ok(data) => json!({ "type": "command.result", "data": { "operation": operation, "success": true, "data": data } }),
        Err(error) => json!({ "type": "command.result", "data": { "operation": operation, "success": false, "error": error } }),
    }
}
