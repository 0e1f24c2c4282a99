//! The Session Fan-Out Layer — accepts persistent client connections over
//! WebSocket, associates each with exactly one Discussion, enforces
//! per-user connection and per-connection rate limits, and relays
//! Orchestrator-emitted events to every socket subscribed to a Discussion.
//!
//! Grounded on this codebase's `mcp_http_adapter`'s Axum adapter for router
//! and handler shape; the broadcast/heartbeat/cleanup task triggers are new
//! since the teacher's HTTP adapter is request/response only.

mod credential;
pub mod protocol;

pub use credential::CredentialValidator;

use crate::config::DiscussionServerConfig;
use crate::domain::DiscussionId;
use crate::orchestrator::DiscussionOrchestrator;
use crate::session_store::{Session, SharedSessionStore};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A registered socket's write half, reachable from the broadcast path.
struct SocketHandle {
    outbox: mpsc::UnboundedSender<WsMessage>,
    last_pong_epoch_ms: Arc<AtomicI64>,
}

/// Shared state behind every fan-out route.
pub struct FanoutState {
    orchestrator: Arc<DiscussionOrchestrator>,
    sessions: SharedSessionStore,
    config: DiscussionServerConfig,
    credential: CredentialValidator,
    by_discussion: DashMap<DiscussionId, DashMap<Uuid, SocketHandle>>,
}

impl FanoutState {
    pub fn new(orchestrator: Arc<DiscussionOrchestrator>, sessions: SharedSessionStore, config: DiscussionServerConfig, credential: CredentialValidator) -> Arc<Self> {
        Arc::new(Self { orchestrator, sessions, config, credential, by_discussion: DashMap::new() })
    }

    fn register(&self, discussion_id: DiscussionId, connection_id: Uuid, outbox: mpsc::UnboundedSender<WsMessage>) -> Arc<AtomicI64> {
        let last_pong = Arc::new(AtomicI64::new(Utc::now().timestamp_millis()));
        self.by_discussion
            .entry(discussion_id)
            .or_default()
            .insert(connection_id, SocketHandle { outbox, last_pong_epoch_ms: last_pong.clone() });
        last_pong
    }

    fn unregister(&self, discussion_id: DiscussionId, connection_id: Uuid) {
        if let Some(sockets) = self.by_discussion.get(&discussion_id) {
            sockets.remove(&connection_id);
        }
    }

    /// Writes `frame` to every live socket subscribed to `discussion_id`.
    /// Sockets whose send fails (closed transport) are dropped silently;
    /// the heartbeat sweep reconciles the Session Store afterward.
    pub fn broadcast_to_discussion(&self, discussion_id: DiscussionId, frame: serde_json::Value) {
        let Some(sockets) = self.by_discussion.get(&discussion_id) else { return };
        let text = frame.to_string();
        sockets.retain(|_, handle| handle.outbox.send(WsMessage::Text(text.clone().into())).is_ok());
    }

    /// Background task: relays every event published on `discussion.events`
    /// to the originating Discussion's socket set.
    pub fn spawn_event_relay(self: &Arc<Self>) {
        let mut receiver = self.orchestrator.event_bus().subscribe_events(crate::event_bus::DISCUSSION_EVENTS_CHANNEL);
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => state.broadcast_to_discussion(event.discussion_id, protocol::discussion_event(&event)),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("fan-out event relay lagged, skipped {skipped} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Background task: pings sockets whose last pong is older than the
    /// heartbeat window and evicts ones that never answer (§4.3 "Heartbeat").
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let state = self.clone();
        let interval = Duration::from_secs(state.config.heartbeat_interval_secs);
        let timeout_ms = (state.config.heartbeat_timeout_secs * 1000) as i64;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now_ms = Utc::now().timestamp_millis();
                for entry in state.by_discussion.iter() {
                    entry.value().retain(|_, handle| {
                        let age = now_ms - handle.last_pong_epoch_ms.load(Ordering::Relaxed);
                        if age > timeout_ms {
                            log::debug!("socket missed heartbeat window ({age}ms), closing");
                            let _ = handle.outbox.send(WsMessage::Close(None));
                            false
                        } else {
                            let _ = handle.outbox.send(WsMessage::Ping(Vec::new().into()));
                            true
                        }
                    });
                }
            }
        });
    }

    /// Background task: reconciles the in-memory socket set against the
    /// Session Store every `cleanup_interval_secs` (§4.3 "cleanup sweep").
    pub fn spawn_cleanup_sweep(self: &Arc<Self>) {
        let state = self.clone();
        let interval = Duration::from_secs(state.config.cleanup_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let live_ids: std::collections::HashSet<Uuid> =
                    state.by_discussion.iter().flat_map(|e| e.value().iter().map(|s| *s.key()).collect::<Vec<_>>()).collect();
                for session in state.sessions.all().await {
                    if !live_ids.contains(&session.connection_id) {
                        log::warn!("session {} has no live socket, removing", session.connection_id);
                        state.sessions.remove(session.connection_id).await;
                    }
                }
            }
        });
    }

    /// Closes every live socket with close code 1001 and clears the Session
    /// Store entries they held (§4.3 "Shutdown").
    pub async fn shutdown(&self) {
        for entry in self.by_discussion.iter() {
            for socket in entry.value().iter() {
                let _ = socket.value().outbox.send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                    code: 1001,
                    reason: "Server shutting down".into(),
                })));
            }
        }
        self.by_discussion.clear();
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "participantId")]
    participant_id: Option<Uuid>,
    token: Option<String>,
}

pub fn router(state: Arc<FanoutState>) -> Router {
    Router::new().route("/discussions/{discussion_id}/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<FanoutState>>,
    Path(discussion_id): Path<Uuid>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, discussion_id, query))
}

async fn handle_socket(socket: WebSocket, state: Arc<FanoutState>, discussion_id: Uuid, query: ConnectQuery) {
    let (mut sender, mut receiver) = socket.split();

    // Step 2: validate credential.
    if !state.credential.validate(query.token.as_deref()) {
        let _ = sender.send(close_frame(1008, "Authentication failed")).await;
        return;
    }

    // Step 3: per-user connection cap.
    if state.sessions.count_for_user(&query.user_id).await >= state.config.max_connections_per_user {
        let _ = sender.send(close_frame(1008, "Too many connections")).await;
        return;
    }

    // Step 4: generate connection id, create Session.
    let connection_id = Uuid::new_v4();
    let session = Session {
        connection_id,
        discussion_id,
        user_id: query.user_id.clone(),
        participant_id: query.participant_id,
        authenticated: true,
        security_level: 0,
        message_count: 0,
        last_activity: Utc::now(),
        rate_limit_reset_at: Utc::now() + chrono::Duration::seconds(60),
        is_alive: true,
        created_at: Utc::now(),
    };
    state.sessions.insert(session, Duration::from_secs(state.config.session_ttl_secs())).await;

    // Step 5: register in the per-Discussion socket set.
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<WsMessage>();
    let last_pong = state.register(discussion_id, connection_id, outbox_tx.clone());

    // Step 6: connection.established frame.
    let established = protocol::connection_established(
        discussion_id,
        connection_id,
        0,
        state.config.rate_limit_frames_per_minute,
        state.config.max_frame_size_bytes,
        state.config.max_connections_per_user,
    );
    let _ = outbox_tx.send(WsMessage::Text(established.to_string().into()));

    // Writer task: drains the outbox into the socket's write half.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // Step 7: asynchronously verify participant access.
    if let Some(participant_id) = query.participant_id {
        let access_ok = state.orchestrator.verify_participant_access(discussion_id, &query.user_id).await;
        if !access_ok {
            let _ = outbox_tx.send(close_frame(1008, "Access denied"));
            drop(outbox_tx);
            let _ = writer.await;
            state.unregister(discussion_id, connection_id);
            state.sessions.remove(connection_id).await;
            return;
        }
        let _ = outbox_tx.send(WsMessage::Text(protocol::access_verified(discussion_id, participant_id).to_string().into()));
    }

    let mut rate_limiter = RateLimiter::new(state.config.rate_limit_frames_per_minute);
    let mut violations: u32 = 0;

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            WsMessage::Text(text) => {
                if text.len() > state.config.max_frame_size_bytes {
                    violations += 1;
                    if violations > 1 {
                        let _ = outbox_tx.send(close_frame(1008, "Rate abuse"));
                        break;
                    }
                    let _ = outbox_tx.send(as_frame(protocol::error_frame("frame too large")));
                    continue;
                }
                if !rate_limiter.allow() {
                    violations += 1;
                    if violations > 1 {
                        let _ = outbox_tx.send(close_frame(1008, "Rate abuse"));
                        break;
                    }
                    let _ = outbox_tx.send(as_frame(protocol::error_frame("rate limit exceeded")));
                    continue;
                }
                handle_inbound_frame(&state, discussion_id, &query, &text, &outbox_tx).await;
            }
            WsMessage::Pong(_) => {
                last_pong.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    drop(outbox_tx);
    let _ = writer.await;
    state.unregister(discussion_id, connection_id);
    state.sessions.remove(connection_id).await;
}

async fn handle_inbound_frame(state: &Arc<FanoutState>, discussion_id: Uuid, query: &ConnectQuery, text: &str, outbox: &mpsc::UnboundedSender<WsMessage>) {
    let frame: protocol::InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            let _ = outbox.send(as_frame(protocol::error_frame("malformed frame")));
            return;
        }
    };

    match frame.frame_type.as_str() {
        "ping" => {
            let _ = outbox.send(as_frame(protocol::pong()));
        }
        "sendMessage" => {
            let Some(participant_id) = query.participant_id else {
                let _ = outbox.send(as_frame(protocol::error_frame("participantId required")));
                return;
            };
            let content = frame.data.get("content").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            match state
                .orchestrator
                .send_message(discussion_id, participant_id, content, crate::domain::MessageType::Text)
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    let _ = outbox.send(as_frame(protocol::error_frame(e.to_string())));
                }
            }
        }
        "requestTurn" => {
            let Some(participant_id) = query.participant_id else {
                let _ = outbox.send(as_frame(protocol::error_frame("participantId required")));
                return;
            };
            let result = state
                .orchestrator
                .request_turn(discussion_id, participant_id)
                .await
                .map(|outcome| serde_json::json!({ "outcome": format!("{outcome:?}") }))
                .map_err(|e| e.to_string());
            let _ = outbox.send(as_frame(protocol::command_result("requestTurn", result)));
        }
        "endTurn" => {
            let Some(participant_id) = query.participant_id else {
                let _ = outbox.send(as_frame(protocol::error_frame("participantId required")));
                return;
            };
            let result = state
                .orchestrator
                .end_turn(discussion_id, participant_id)
                .await
                .map(|discussion| serde_json::json!({ "turnNumber": discussion.state.current_turn.turn_number }))
                .map_err(|e| e.to_string());
            let _ = outbox.send(as_frame(protocol::command_result("endTurn", result)));
        }
        "addReaction" => {
            let Some(participant_id) = query.participant_id else {
                let _ = outbox.send(as_frame(protocol::error_frame("participantId required")));
                return;
            };
            let Some(message_id) = frame.data.get("messageId").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok()) else {
                let _ = outbox.send(as_frame(protocol::error_frame("messageId required")));
                return;
            };
            let emoji = frame.data.get("emoji").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let result = state
                .orchestrator
                .add_reaction(discussion_id, message_id, participant_id, emoji)
                .await
                .map(|reaction| serde_json::json!({ "reactionId": reaction.id }))
                .map_err(|e| e.to_string());
            let _ = outbox.send(as_frame(protocol::command_result("addReaction", result)));
        }
        other => {
            log::debug!("dropping unknown inbound frame type {other:?}");
        }
    }
}

fn close_frame(code: u16, reason: &'static str) -> WsMessage {
    WsMessage::Close(Some(axum::extract::ws::CloseFrame { code, reason: reason.into() }))
}

/// Serializes a frame value into the text WebSocket message that carries it.
fn as_frame(value: serde_json::Value) -> WsMessage {
    WsMessage::Text(value.to_string().into())
}

/// A fixed-window inbound-frame rate limiter: `limit` frames per rolling
/// 60-second window (§4.3 "Rate limiting").
struct RateLimiter {
    limit: u32,
    count: u32,
    window_start: std::time::Instant,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        Self { limit, count: 0, window_start: std::time::Instant::now() }
    }

    fn allow(&mut self) -> bool {
        if self.window_start.elapsed() >= Duration::from_secs(60) {
            self.window_start = std::time::Instant::now();
            self.count = 0;
        }
        if self.count >= self.limit {
            return false;
        }
        self.count += 1;
        true
    }
}

use futures_util::{SinkExt, StreamExt};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_enforces_window_cap() {
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
