use futures_util::{Sink, SinkExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tracing::debug;

use crate::core::{WebSocketError, WebSocketResult, WsFrame};

/// Writer actor that owns one connection's transport sink and serializes writes.
pub struct WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    endpoint: String,
    writer: W,
    closed: bool,
}

impl<W> WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    pub fn new(endpoint: impl Into<String>, writer: W) -> Self {
        Self {
            endpoint: endpoint.into(),
            writer,
            closed: false,
        }
    }
}

impl<W> Actor for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    type Args = Self;
    type Error = WebSocketError;

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        let endpoint = self.endpoint.clone();
        async move {
            tracing::error!(endpoint = %endpoint, error = ?err, "WsWriterActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriterWrite {
    pub message: WsFrame,
}

impl<W> KameoMessage<WriterWrite> for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: WriterWrite,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Err(WebSocketError::InvalidState("writer closed".to_string()));
        }
        debug!(target: "ws-writer", endpoint = %self.endpoint, "sending websocket frame to wire");
        self.writer.send(msg.message).await
    }
}

/// Send a close frame (best effort) and close the sink. Later writes fail.
#[derive(Clone, Debug)]
pub struct WriterClose {
    pub code: u16,
    pub reason: &'static str,
}

impl<W> KameoMessage<WriterClose> for WsWriterActor<W>
where
    W: Sink<WsFrame, Error = WebSocketError> + Send + Sync + Unpin + 'static,
{
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: WriterClose,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(err) = self.writer.send(WsFrame::close(msg.code, msg.reason)).await {
            debug!(endpoint = %self.endpoint, error = %err, "close frame not delivered");
        }
        self.writer.close().await
    }
}
