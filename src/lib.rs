//! Kameo-based real-time connection manager.
//!
//! One actor owns every endpoint's websocket: rate-limited connects, exponential backoff
//! reconnects, application-level heartbeats, network awareness and fan-out of inbound
//! messages to typed subscribers.

pub mod core;
pub mod testing;
pub mod transport;
pub mod ws;

pub use crate::core::{
    ConnectionManagerConfig, ConnectionStatus, CredentialSource, HealthStatus, HostSignal,
    RealtimeMessage, StaticToken, TokenStore, WebSocketError, WebSocketResult, WsBaseUrl,
};
pub use ws::{
    BatchConnectReport, ConnectionManager, ConnectionManagerArgs, ConnectionMetricsReporter,
    EventDispatcher, Subscription,
};
