use bytes::Bytes;

/// Close code sent on caller-initiated disconnects.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent on process teardown.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code reported for a close frame that carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the socket ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Transport-neutral websocket frame type.
///
/// Transports convert their native frame representation into/from `WsFrame`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsCloseFrame {
    pub fn reason_lossy(&self) -> String {
        String::from_utf8_lossy(self.reason.as_ref()).into_owned()
    }
}

impl WsFrame {
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: &'static str) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: Bytes::from_static(reason.as_bytes()),
        }))
    }

    /// UTF-8 view of a text or binary payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsFrame::Text(bytes) | WsFrame::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

/// Normal and going-away closures are intentional and never trigger a reconnect.
#[inline]
pub fn is_clean_close(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY
}
