use std::time::Duration;

use tokio::time::Instant;

use super::message::{PING_TYPE, RealtimeMessage};

/// Result emitted by the heartbeat when inspecting an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsPongResult {
    NotPong,
    /// Heartbeat acknowledged; carries the round trip when a ping is outstanding.
    PongReceived(Option<Duration>),
}

/// Application-level keep-alive: `{"type":"ping"}` out, `{"type":"pong"}` back.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMonitor {
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_ping(&mut self) -> RealtimeMessage {
        self.last_ping = Some(Instant::now());
        let mut ping = RealtimeMessage::new(PING_TYPE);
        ping.stamp();
        ping
    }

    pub fn handle_inbound(&mut self, message: &RealtimeMessage) -> WsPongResult {
        if !message.is_pong() {
            return WsPongResult::NotPong;
        }
        let now = Instant::now();
        // Only the first pong after a ping yields a sample.
        let rtt = match (self.last_ping, self.last_pong) {
            (Some(sent), Some(prev)) if prev >= sent => None,
            (Some(sent), _) => Some(now.saturating_duration_since(sent)),
            (None, _) => None,
        };
        self.last_pong = Some(now);
        WsPongResult::PongReceived(rtt)
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    pub fn reset(&mut self) {
        self.last_ping = None;
        self.last_pong = None;
    }
}
