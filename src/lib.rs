// src/lib.rs
//
// A turn-based multi-participant discussion orchestrator: pluggable turn
// strategies, real-time session fan-out, and an event-sourced integration
// plane for coordinating humans and agents.

pub mod config;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod fanout;
pub mod orchestrator;
pub mod repository;
pub mod session_store;
pub mod strategy;

pub use domain::{Discussion, DiscussionEvent, DiscussionStatus, Participant, StrategyKind};
pub use error::OrchestratorError;
pub use orchestrator::DiscussionOrchestrator;
