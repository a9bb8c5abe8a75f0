//! Cloneable handle in front of [`ConnectionManagerActor`].

use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use kameo::Actor;
use kameo::error::SendError;
use kameo::prelude::ActorRef;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::actor::{
    ClearStatus, Connect, ConnectOrigin, ConnectionManagerActor, ConnectionManagerArgs,
    Disconnect, GetHealthStatus, GetStatus, NetworkChange, SendMessage, Shutdown,
};
use super::dispatch::{EventDispatcher, MessageHandler, Subscription};
use crate::core::{
    ConnectionStatus, HealthStatus, HostSignal, RealtimeMessage, WebSocketError, WebSocketResult,
};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Outcome of [`ConnectionManager::connect_to_endpoints`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchConnectReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, WebSocketError)>,
}

impl BatchConnectReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Public entry point: every call is forwarded to the manager actor, subscriptions go straight
/// to the shared dispatcher.
pub struct ConnectionManager<T: WsTransport = TungsteniteTransport> {
    actor: ActorRef<ConnectionManagerActor<T>>,
    dispatcher: EventDispatcher,
}

impl<T: WsTransport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T: WsTransport> ConnectionManager<T> {
    /// Spawn the manager actor. Must be called from within a tokio runtime.
    pub fn spawn(args: ConnectionManagerArgs<T>) -> Self {
        let dispatcher = args.dispatcher.clone();
        let actor = ConnectionManagerActor::spawn(args);
        Self { actor, dispatcher }
    }

    pub fn actor_ref(&self) -> &ActorRef<ConnectionManagerActor<T>> {
        &self.actor
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Open the socket for `endpoint`, resolving once it is open or the attempt fails.
    ///
    /// Returns immediately when the endpoint is already open or connecting.
    pub async fn connect(&self, endpoint: impl Into<String>) -> WebSocketResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.actor
            .tell(Connect {
                endpoint: endpoint.into(),
                origin: ConnectOrigin::Caller,
                reply: Some(reply),
            })
            .send()
            .await
            .map_err(actor_unavailable)?;
        outcome.await.map_err(|_| {
            WebSocketError::ActorError("connect dropped before it settled".to_string())
        })?
    }

    /// Connect every endpoint concurrently; one failure never cancels the others.
    pub async fn connect_to_endpoints<I, S>(&self, endpoints: I) -> BatchConnectReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints.into_iter().map(Into::into).collect();
        let outcomes = join_all(endpoints.iter().map(|endpoint| self.connect(endpoint.clone()))).await;

        let mut report = BatchConnectReport::default();
        for (endpoint, outcome) in endpoints.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.succeeded.push(endpoint),
                Err(err) => report.failed.push((endpoint, err)),
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "batch connect finished"
        );
        report
    }

    pub async fn disconnect(&self, endpoint: impl Into<String>) -> WebSocketResult<()> {
        self.actor
            .ask(Disconnect {
                endpoint: endpoint.into(),
            })
            .await
            .map_err(ask_error)
    }

    /// Send `message` on an open endpoint, stamping the current time when no timestamp is set.
    pub async fn send(
        &self,
        endpoint: impl Into<String>,
        message: RealtimeMessage,
    ) -> WebSocketResult<()> {
        self.actor
            .ask(SendMessage {
                endpoint: endpoint.into(),
                message,
            })
            .await
            .map_err(ask_error)
    }

    pub fn subscribe(&self, message_type: impl Into<String>, handler: MessageHandler) -> Subscription {
        self.dispatcher.subscribe(message_type, handler)
    }

    pub fn subscribe_fn<F>(&self, message_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&RealtimeMessage) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_fn(message_type, callback)
    }

    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str, &ConnectionStatus) + Send + Sync + 'static,
    {
        self.dispatcher.on_status_change(listener)
    }

    /// Status record of `endpoint`, `None` when it was never connected or has been cleared.
    pub async fn status(&self, endpoint: impl Into<String>) -> WebSocketResult<Option<ConnectionStatus>> {
        self.actor
            .ask(GetStatus {
                endpoint: endpoint.into(),
            })
            .await
            .map_err(ask_error)
    }

    pub async fn is_connected(&self, endpoint: impl Into<String>) -> WebSocketResult<bool> {
        Ok(self
            .status(endpoint)
            .await?
            .is_some_and(|status| status.connected))
    }

    pub async fn clear_status(&self, endpoint: impl Into<String>) -> WebSocketResult<()> {
        self.actor
            .ask(ClearStatus {
                endpoint: endpoint.into(),
            })
            .await
            .map_err(ask_error)
    }

    pub async fn health_status(&self) -> WebSocketResult<HealthStatus> {
        self.actor.ask(GetHealthStatus).await.map_err(ask_error)
    }

    pub async fn handle_host_signal(&self, signal: HostSignal) -> WebSocketResult<()> {
        let change = match signal {
            HostSignal::Online => NetworkChange::Online,
            HostSignal::Offline => NetworkChange::Offline,
            HostSignal::Terminate => return self.shutdown().await,
        };
        self.actor.ask(change).await.map_err(ask_error)
    }

    /// Feed host lifecycle signals into the manager until the stream ends or `Terminate` is seen.
    pub fn watch_host_signals<S>(&self, signals: S) -> JoinHandle<()>
    where
        S: Stream<Item = HostSignal> + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut signals = std::pin::pin!(signals);
            while let Some(signal) = signals.next().await {
                debug!(signal = ?signal, "host signal");
                if let Err(err) = manager.handle_host_signal(signal).await {
                    debug!(error = %err, "host signal watcher stopping");
                    break;
                }
                if signal == HostSignal::Terminate {
                    break;
                }
            }
        })
    }

    /// Close every socket with 1001 and stop the actor. Idempotent.
    pub async fn shutdown(&self) -> WebSocketResult<()> {
        if !self.actor.is_alive() {
            return Ok(());
        }
        match self.actor.ask(Shutdown).await {
            Ok(()) => {}
            Err(SendError::HandlerError(err)) => return Err(err),
            Err(_) => return Ok(()),
        }
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
        Ok(())
    }
}

fn ask_error<M>(err: SendError<M, WebSocketError>) -> WebSocketError {
    match err {
        SendError::HandlerError(err) => err,
        _ => WebSocketError::ActorError("connection manager is not running".to_string()),
    }
}

fn actor_unavailable<M, E>(_err: SendError<M, E>) -> WebSocketError {
    WebSocketError::ActorError("connection manager is not running".to_string())
}
