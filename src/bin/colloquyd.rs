//! Server binary: wires the in-memory Repository, Event Bus, Session Store,
//! and Orchestrator together behind the Fan-Out Layer's Axum router.

use colloquy::config::DiscussionServerConfig;
use colloquy::event_bus::InMemoryEventBus;
use colloquy::fanout::{CredentialValidator, FanoutState};
use colloquy::orchestrator::DiscussionOrchestrator;
use colloquy::repository::InMemoryDiscussionRepository;
use colloquy::session_store::InMemorySessionStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = DiscussionServerConfig::default();
    let repository = Arc::new(InMemoryDiscussionRepository::new());
    let event_bus = Arc::new(InMemoryEventBus::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let orchestrator = DiscussionOrchestrator::new(repository, event_bus);

    let bind_token = std::env::var("COLLOQUY_BEARER_TOKEN").ok();
    let credential = CredentialValidator::new(bind_token);

    let state = FanoutState::new(orchestrator, sessions, config, credential);
    state.spawn_event_relay();
    state.spawn_heartbeat();
    state.spawn_cleanup_sweep();

    let app = colloquy::fanout::router(state);
    let addr = std::env::var("COLLOQUY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8787".to_string());
    log::info!("colloquyd listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
