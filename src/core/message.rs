//! JSON message shape carried in websocket text frames.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sonic_rs::Value;

use super::types::{WebSocketError, WebSocketResult};

pub const PING_TYPE: &str = "ping";
pub const PONG_TYPE: &str = "pong";
/// Subscribers registered under this type receive every inbound message.
pub const WILDCARD_TYPE: &str = "*";

/// Identifier fields arrive as numbers or strings depending on the backend view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Int(i64),
    Text(String),
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        MessageId::Int(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<MessageId>,
}

impl RealtimeMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            data: None,
            timestamp: None,
            user_id: None,
            thread_id: None,
            notification_id: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn is_pong(&self) -> bool {
        self.kind == PONG_TYPE
    }

    /// Fill in the current time unless the caller already set a timestamp.
    pub fn stamp(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now_iso8601());
        }
    }

    pub fn encode(&self) -> WebSocketResult<String> {
        sonic_rs::to_string(self).map_err(|err| WebSocketError::MessageParseError(err.to_string()))
    }

    pub fn decode(text: &str) -> WebSocketResult<Self> {
        sonic_rs::from_str(text).map_err(|err| WebSocketError::MessageParseError(err.to_string()))
    }
}

/// Current UTC time as RFC 3339 with millisecond precision, e.g. `2026-10-19T08:15:02.113Z`.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
