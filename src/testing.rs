//! Reusable test utilities for exercising the connection manager without a real socket.
//!
//! [`MockTransport`] parks every connect attempt until the paired [`MockServer`] accepts or
//! rejects it, which lets tests drive handshakes, timeouts, drops and reconnect sequences
//! deterministically (including under paused tokio time).

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use tokio::sync::{mpsc, oneshot};

use crate::core::{
    RealtimeMessage, WebSocketBufferConfig, WebSocketError, WebSocketResult, WsCloseFrame, WsFrame,
};
use crate::transport::{WsTransport, WsTransportConnectFuture};

type MockConnectOutcome = Result<(MockReader, MockWriter), WebSocketError>;

/// A transport that uses in-memory channels so tests can emulate server behavior.
///
/// Create it with [`MockTransport::channel_pair`] to obtain both the transport for the manager
/// and a [`MockServer`] handle that decides the fate of each connect attempt.
#[derive(Clone)]
pub struct MockTransport {
    connects_tx: mpsc::UnboundedSender<PendingMockConnect>,
    connect_count: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let (connects_tx, connects_rx) = mpsc::unbounded_channel();
        let connect_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                connects_tx,
                connect_count: connect_count.clone(),
            },
            MockServer {
                connects_rx,
                connect_count,
            },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: WebSocketBufferConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let connects_tx = self.connects_tx.clone();
        Box::pin(async move {
            let (decision, outcome) = oneshot::channel();
            connects_tx
                .send(PendingMockConnect { url, decision })
                .map_err(|_| mock_error("mock server is gone"))?;
            outcome
                .await
                .map_err(|_| mock_error("mock connect dropped without a decision"))?
        })
    }
}

fn mock_error(error: &str) -> WebSocketError {
    WebSocketError::TransportError {
        context: "mock_transport_connect",
        error: error.to_string(),
    }
}

/// Error surface for operations on [`MockSocket`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The manager side is no longer reading inbound frames.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock reader is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    connects_rx: mpsc::UnboundedReceiver<PendingMockConnect>,
    connect_count: Arc<AtomicUsize>,
}

impl MockServer {
    /// Wait for the manager's next connect attempt.
    pub async fn next_connect(&mut self) -> Option<PendingMockConnect> {
        self.connects_rx.recv().await
    }

    pub async fn next_connect_timeout(&mut self, timeout: Duration) -> Option<PendingMockConnect> {
        tokio::time::timeout(timeout, self.connects_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Accept the next connect attempt.
    pub async fn accept_next(&mut self) -> Option<MockSocket> {
        Some(self.next_connect().await?.accept())
    }

    /// Number of times the manager invoked `WsTransport::connect`.
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }
}

/// A connect attempt parked until the test decides its outcome. Dropping it fails the attempt.
pub struct PendingMockConnect {
    pub url: String,
    decision: oneshot::Sender<MockConnectOutcome>,
}

impl PendingMockConnect {
    pub fn accept(self) -> MockSocket {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let stalled = Arc::new(AtomicBool::new(false));
        let _ = self.decision.send(Ok((
            MockReader { rx: inbound_rx },
            MockWriter {
                sent_tx: outbound_tx,
                stalled: stalled.clone(),
            },
        )));
        MockSocket {
            outbound_rx,
            inbound_tx: Some(inbound_tx),
            stalled,
        }
    }

    pub fn reject(self, error: WebSocketError) {
        let _ = self.decision.send(Err(error));
    }
}

/// Server end of one accepted connection.
pub struct MockSocket {
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
    stalled: Arc<AtomicBool>,
}

impl MockSocket {
    /// Receive a frame written by the manager.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Receive the next outbound frame and decode it as a realtime message.
    pub async fn recv_message(&mut self) -> Option<WebSocketResult<RealtimeMessage>> {
        let frame = self.recv_outbound().await?;
        Some(match frame.as_text() {
            Some(text) => RealtimeMessage::decode(text),
            None => Err(WebSocketError::MessageParseError(format!(
                "not a text frame: {frame:?}"
            ))),
        })
    }

    /// Push an inbound frame to the manager.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text))
    }

    pub fn send_message(&self, message: &RealtimeMessage) -> Result<(), MockServerError> {
        let text = message
            .encode()
            .map_err(|_| MockServerError::ChannelClosed)?;
        self.send_text(text)
    }

    /// Server-initiated close handshake.
    pub fn close(&self, code: u16, reason: &'static str) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::Close(Some(WsCloseFrame {
            code,
            reason: bytes::Bytes::from_static(reason.as_bytes()),
        })))
    }

    /// Simulate a server-side socket drop by closing the inbound channel.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Make every later write from the manager fail while the socket stays readable.
    pub fn fail_writes(&mut self) {
        self.outbound_rx.close();
    }

    /// Make the manager's sink report not-ready forever, like a peer that stopped reading.
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
    stalled: Arc<AtomicBool>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.stalled.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| WebSocketError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
