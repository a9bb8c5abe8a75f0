use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

use crate::core::{WebSocketBufferConfig, WebSocketError, WsCloseFrame, WsFrame};
use crate::transport::{WsTransport, WsTransportConnectFuture};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// rustls 0.23 cannot pick a crypto provider on its own when both `ring` and `aws-lc-rs` are
/// linked; select ring once per process before the first handshake.
fn ensure_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        // Err means some other component already installed one.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn transport_error(
    context: &'static str,
) -> impl Fn(tokio_tungstenite::tungstenite::Error) -> WebSocketError {
    move |err| WebSocketError::TransportError {
        context,
        error: err.to_string(),
    }
}

fn into_utf8(bytes: Bytes) -> Result<Utf8Bytes, Bytes> {
    if std::str::from_utf8(&bytes).is_err() {
        return Err(bytes);
    }
    // SAFETY: validated above.
    Ok(unsafe { Utf8Bytes::from_bytes_unchecked(bytes) })
}

impl From<Message> for WsFrame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => WsFrame::Text(AsRef::<Bytes>::as_ref(&text).clone()),
            Message::Binary(bytes) => WsFrame::Binary(bytes),
            Message::Ping(bytes) => WsFrame::Ping(bytes),
            Message::Pong(bytes) => WsFrame::Pong(bytes),
            Message::Close(frame) => WsFrame::Close(frame.map(|frame| WsCloseFrame {
                code: frame.code.into(),
                reason: AsRef::<Bytes>::as_ref(&frame.reason).clone(),
            })),
            // Raw frames never surface from a read.
            Message::Frame(_) => WsFrame::Binary(Bytes::new()),
        }
    }
}

impl From<WsFrame> for Message {
    fn from(frame: WsFrame) -> Self {
        match frame {
            WsFrame::Text(bytes) => match into_utf8(bytes) {
                Ok(text) => Message::Text(text),
                Err(bytes) => Message::Binary(bytes),
            },
            WsFrame::Binary(bytes) => Message::Binary(bytes),
            WsFrame::Ping(bytes) => Message::Ping(bytes),
            WsFrame::Pong(bytes) => Message::Pong(bytes),
            WsFrame::Close(frame) => Message::Close(frame.map(|frame| CloseFrame {
                code: frame.code.into(),
                reason: into_utf8(frame.reason).unwrap_or_else(|_| Utf8Bytes::from_static("")),
            })),
        }
    }
}

/// tokio-tungstenite transport; plain `ws://` or rustls-backed `wss://`.
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    /// Use a caller-built rustls config, e.g. with a private CA.
    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self::with_connector(Connector::Rustls(config))
    }
}

pub struct TungsteniteReader {
    inner: futures_util::stream::SplitStream<Socket>,
}

impl Stream for TungsteniteReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx).map(|item| {
            item.map(|read| read.map(WsFrame::from).map_err(transport_error("read")))
        })
    }
}

pub struct TungsteniteWriter {
    inner: futures_util::stream::SplitSink<Socket, Message>,
}

impl Sink<WsFrame> for TungsteniteWriter {
    type Error = WebSocketError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready_unpin(cx).map_err(transport_error("write"))
    }

    fn start_send(mut self: Pin<&mut Self>, frame: WsFrame) -> Result<(), Self::Error> {
        self.inner
            .start_send_unpin(Message::from(frame))
            .map_err(transport_error("write"))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_flush_unpin(cx).map_err(transport_error("write"))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_close_unpin(cx).map_err(transport_error("close"))
    }
}

impl WsTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let connector = self.connector.clone();
        Box::pin(async move {
            ensure_crypto_provider();

            let config = WebSocketConfig::default()
                .max_message_size(Some(buffers.max_message_bytes))
                .max_frame_size(Some(buffers.max_frame_bytes))
                .write_buffer_size(buffers.write_buffer_bytes)
                .max_write_buffer_size(buffers.max_write_buffer_bytes);

            // `wss://` without a connector falls back to the bundled webpki roots.
            let (socket, _response) =
                connect_async_tls_with_config(url, Some(config), true, connector)
                    .await
                    .map_err(transport_error("connect"))?;

            let (write, read) = socket.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_code_and_reason_survive_conversion() {
        let msg = Message::from(WsFrame::close(1001, "Client shutdown"));
        let Message::Close(Some(close)) = &msg else {
            panic!("expected close, got {msg:?}");
        };
        assert_eq!(u16::from(close.code), 1001);

        match WsFrame::from(msg) {
            WsFrame::Close(Some(frame)) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason_lossy(), "Client shutdown");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn text_frame_with_invalid_utf8_goes_out_as_binary() {
        let msg = Message::from(WsFrame::Text(Bytes::from_static(&[0xff, 0xfe])));
        assert!(matches!(msg, Message::Binary(_)));
    }

    #[test]
    fn inbound_text_keeps_its_payload() {
        let frame = WsFrame::from(Message::Text(Utf8Bytes::from_static(r#"{"type":"pong"}"#)));
        assert_eq!(frame.as_text(), Some(r#"{"type":"pong"}"#));
    }
}
