//! Error taxonomy for the discussion orchestrator.
//!
//! Every operation in [`crate::orchestrator`] and [`crate::fanout`] fails
//! with an [`OrchestratorError`] variant that maps onto one of the six
//! classes described below. The Fan-Out Layer translates `AuthFailure` and
//! `PolicyViolation` into a WebSocket close; every other variant becomes an
//! `error` frame (see [`crate::fanout::protocol`]).
//!
//! # Example
//!
//! ```
//! use colloquy::error::OrchestratorError;
//!
//! let err = OrchestratorError::not_found("discussion", "abc-123");
//! assert_eq!(err.to_string(), "discussion not found: abc-123");
//! ```

use std::fmt;

/// A classified, user-facing failure from the orchestrator or fan-out layer.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// Discussion, Participant, or Message id unknown. No state change.
    NotFound(String),
    /// Operation incompatible with current status (e.g. start from Completed).
    InvalidState(String),
    /// Rate limit, connection cap, turn ownership, participant cap, or
    /// strategy-config validation failure.
    PolicyViolation(String),
    /// Missing or invalid credential.
    AuthFailure(String),
    /// Repository/Bus temporary failure. Not retried for user-initiated
    /// mutations; timer-driven system operations retry at most once.
    TransientDependency(String),
    /// Unexpected failure; state is left unchanged.
    Fatal(String),
}

impl OrchestratorError {
    pub fn not_found(kind: &str, id: impl fmt::Display) -> Self {
        OrchestratorError::NotFound(format!("{kind} not found: {id}"))
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        OrchestratorError::InvalidState(msg.into())
    }

    pub fn policy_violation(msg: impl Into<String>) -> Self {
        OrchestratorError::PolicyViolation(msg.into())
    }

    pub fn auth_failure(msg: impl Into<String>) -> Self {
        OrchestratorError::AuthFailure(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        OrchestratorError::TransientDependency(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        OrchestratorError::Fatal(msg.into())
    }

    /// WebSocket close code the fan-out layer should use for this error, if
    /// it should close the socket at all (per §7: only on PolicyViolation or
    /// AuthFailure).
    pub fn close_code(&self) -> Option<(u16, &str)> {
        match self {
            OrchestratorError::AuthFailure(_) => Some((1008, "Authentication failed")),
            OrchestratorError::PolicyViolation(_) => Some((1008, "Policy violation")),
            _ => None,
        }
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::NotFound(msg) => write!(f, "{msg}"),
            OrchestratorError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            OrchestratorError::PolicyViolation(msg) => write!(f, "policy violation: {msg}"),
            OrchestratorError::AuthFailure(msg) => write!(f, "authentication failed: {msg}"),
            OrchestratorError::TransientDependency(msg) => write!(f, "transient dependency failure: {msg}"),
            OrchestratorError::Fatal(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}
