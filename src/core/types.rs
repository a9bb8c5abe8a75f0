use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Convenience result alias for websocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Canonical error surface of the connection manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebSocketError {
    #[error("Rate limited: too many connection attempts for {endpoint}")]
    RateLimitExceeded {
        endpoint: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication missing: no access token available")]
    AuthenticationMissing,

    #[error("Connection timeout: {endpoint} did not open within {timeout:?}")]
    ConnectionTimeout { endpoint: String, timeout: Duration },

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Max reconnect attempts reached")]
    MaxReconnectAttemptsReached,

    #[error("Parse failed: {0}")]
    MessageParseError(String),

    #[error("Send failed on {endpoint}: {reason}")]
    SendFailed { endpoint: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Actor error: {0}")]
    ActorError(String),
}

/// Status text recorded once the reconnect budget is exhausted.
pub const MAX_RECONNECT_ATTEMPTS_REACHED: &str = "Max reconnect attempts reached";

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 256 << 10,
            max_message_bytes: 16 * 1024 * 1024,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Per-endpoint connection status, as shown to UI bindings.
///
/// `connected` and `connecting` are never both true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub connecting: bool,
    pub error: Option<String>,
    pub last_connected: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    pub(crate) fn mark_connecting(&mut self) {
        self.connected = false;
        self.connecting = true;
    }

    pub(crate) fn mark_open(&mut self, now: DateTime<Utc>) {
        self.connected = true;
        self.connecting = false;
        self.error = None;
        self.last_connected = Some(now);
        self.reconnect_attempts = 0;
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        self.connected = false;
        self.connecting = false;
        self.error = Some(error.into());
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Health view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHealth {
    pub endpoint: String,
    pub status: ConnectionStatus,
    pub heartbeat_samples: u64,
    pub heartbeat_p50_us: u64,
    pub heartbeat_p99_us: u64,
}

/// Snapshot returned by `ConnectionManager::health_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub total_connections: usize,
    pub healthy_connections: usize,
    pub error_connections: usize,
    pub endpoints: Vec<EndpointHealth>,
}

/// Host environment lifecycle signals consumed by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Online,
    Offline,
    /// Page unload / process termination.
    Terminate,
}
