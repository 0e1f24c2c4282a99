//! Configuration for the discussion orchestrator and fan-out layer.
//!
//! Users construct this manually — no TOML/YAML/env-file parsing dependency
//! is introduced here, matching this codebase's existing `CloudLLMConfig`
//! philosophy.
//!
//! # Example
//!
//! ```
//! use colloquy::config::DiscussionServerConfig;
//!
//! let config = DiscussionServerConfig::default();
//! assert_eq!(config.max_connections_per_user, 5);
//!
//! let config = DiscussionServerConfig::default().with_max_connections_per_user(10);
//! assert_eq!(config.max_connections_per_user, 10);
//! ```

/// Global configuration for the orchestrator and fan-out layer.
#[derive(Clone, Debug)]
pub struct DiscussionServerConfig {
    /// Per-user concurrent WebSocket connection cap.
    pub max_connections_per_user: usize,
    /// Inbound frames allowed per rolling minute, per connection.
    pub rate_limit_frames_per_minute: u32,
    /// Maximum size of a single inbound frame, in bytes.
    pub max_frame_size_bytes: usize,
    /// Interval between heartbeat pings to idle sockets.
    pub heartbeat_interval_secs: u64,
    /// Age of the last pong after which a socket is considered dead.
    pub heartbeat_timeout_secs: u64,
    /// Interval between Session Store reconciliation sweeps.
    pub cleanup_interval_secs: u64,
    /// Default timeout for correlated Event Bus request/response calls.
    pub bus_request_timeout_secs: u64,
    /// Session Store TTL multiplier applied to the heartbeat window.
    pub session_ttl_heartbeat_multiple: u32,
}

impl Default for DiscussionServerConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: 5,
            rate_limit_frames_per_minute: 60,
            max_frame_size_bytes: 32 * 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            cleanup_interval_secs: 60,
            bus_request_timeout_secs: 5,
            session_ttl_heartbeat_multiple: 3,
        }
    }
}

impl DiscussionServerConfig {
    pub fn with_max_connections_per_user(mut self, n: usize) -> Self {
        self.max_connections_per_user = n;
        self
    }

    pub fn with_rate_limit_frames_per_minute(mut self, n: u32) -> Self {
        self.rate_limit_frames_per_minute = n;
        self
    }

    pub fn with_max_frame_size_bytes(mut self, n: usize) -> Self {
        self.max_frame_size_bytes = n;
        self
    }

    /// Session Store TTL derived from the heartbeat window, per §4.3 step 5.
    pub fn session_ttl_secs(&self) -> u64 {
        self.heartbeat_timeout_secs * self.session_ttl_heartbeat_multiple as u64
    }
}
