//! Connection manager actor.
//!
//! The actor exclusively owns every endpoint's status record, rate limiter, live socket and
//! timers. Socket IO, connect attempts, heartbeats and reconnect timers run as tokio tasks that
//! only `tell` the actor; each carries the connection id it was spawned for so events from a
//! superseded connection are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use kameo::error::{ActorStopReason, SendError};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::ConnectionMetricsHook;
use super::dispatch::EventDispatcher;
use super::writer::{WriterClose, WriterWrite, WsWriterActor};
use crate::core::{
    CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NO_STATUS, CLOSE_NORMAL, ConnectionManagerConfig,
    ConnectionStatus, CredentialSource, HealthStatus, HeartbeatMonitor, LinkState, RateDecision,
    RealtimeMessage, WebSocketError, WebSocketResult, WsConnectRateLimiter, WsFrame,
    WsHealthMonitor, WsPongResult, health_snapshot, is_clean_close,
};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Upper bound on flushing the close frame of a socket being torn down.
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reply channel of a caller waiting for a connect attempt to settle.
pub type ConnectReply = oneshot::Sender<WebSocketResult<()>>;

/// Arguments passed when spawning the manager actor.
pub struct ConnectionManagerArgs<T: WsTransport = TungsteniteTransport> {
    pub config: ConnectionManagerConfig,
    pub transport: T,
    pub credentials: Arc<dyn CredentialSource>,
    pub dispatcher: EventDispatcher,
    pub metrics: Option<ConnectionMetricsHook>,
}

impl ConnectionManagerArgs<TungsteniteTransport> {
    pub fn new(config: ConnectionManagerConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self::with_transport(config, TungsteniteTransport::default(), credentials)
    }
}

impl<T: WsTransport> ConnectionManagerArgs<T> {
    pub fn with_transport(
        config: ConnectionManagerConfig,
        transport: T,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            dispatcher: EventDispatcher::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ConnectionMetricsHook) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

enum LinkPhase<T: WsTransport> {
    Idle,
    Connecting {
        conn_id: u64,
        task: JoinHandle<()>,
        reply: Option<ConnectReply>,
    },
    Open {
        conn_id: u64,
        writer: ActorRef<WsWriterActor<T::Writer>>,
        reader_task: JoinHandle<()>,
        heartbeat_task: Option<JoinHandle<()>>,
        heartbeat: HeartbeatMonitor,
    },
}

impl<T: WsTransport> LinkPhase<T> {
    fn link_state(&self) -> LinkState {
        match self {
            LinkPhase::Idle => LinkState::Idle,
            LinkPhase::Connecting { .. } => LinkState::Connecting,
            LinkPhase::Open { .. } => LinkState::Open,
        }
    }

    fn conn_id(&self) -> Option<u64> {
        match self {
            LinkPhase::Idle => None,
            LinkPhase::Connecting { conn_id, .. } | LinkPhase::Open { conn_id, .. } => {
                Some(*conn_id)
            }
        }
    }
}

struct ReconnectTimer {
    id: u64,
    task: JoinHandle<()>,
}

struct EndpointEntry<T: WsTransport> {
    status: ConnectionStatus,
    limiter: WsConnectRateLimiter,
    phase: LinkPhase<T>,
    reconnect_timer: Option<ReconnectTimer>,
    health: WsHealthMonitor,
}

impl<T: WsTransport> EndpointEntry<T> {
    fn new(config: &ConnectionManagerConfig) -> Self {
        Self {
            status: ConnectionStatus::default(),
            limiter: WsConnectRateLimiter::new(config.rate_limit),
            phase: LinkPhase::Idle,
            reconnect_timer: None,
            health: WsHealthMonitor::new(),
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.task.abort();
        }
    }

    /// Tear down whatever link is live and settle a pending connect caller with `pending_error`.
    async fn close_link(&mut self, code: u16, reason: &'static str, pending_error: WebSocketError) {
        match std::mem::replace(&mut self.phase, LinkPhase::Idle) {
            LinkPhase::Idle => {}
            LinkPhase::Connecting { task, reply, .. } => {
                task.abort();
                if let Some(reply) = reply {
                    let _ = reply.send(Err(pending_error));
                }
            }
            LinkPhase::Open {
                writer,
                reader_task,
                heartbeat_task,
                ..
            } => {
                if let Some(task) = heartbeat_task {
                    task.abort();
                }
                reader_task.abort();
                let close = writer.ask(WriterClose { code, reason });
                match tokio::time::timeout(WRITER_CLOSE_TIMEOUT, close).await {
                    Ok(Ok(())) => {
                        let _ = writer.stop_gracefully().await;
                    }
                    Ok(Err(err)) => {
                        debug!(error = %err, "writer close failed");
                        let _ = writer.stop_gracefully().await;
                    }
                    // A stalled sink must not hold the manager's mailbox.
                    Err(_) => {
                        warn!(code, "writer close timed out; killing writer");
                        writer.kill();
                    }
                }
            }
        }
    }
}

/// Actor that owns every endpoint's websocket lifecycle.
pub struct ConnectionManagerActor<T: WsTransport = TungsteniteTransport> {
    config: ConnectionManagerConfig,
    transport: T,
    credentials: Arc<dyn CredentialSource>,
    dispatcher: EventDispatcher,
    metrics: Option<ConnectionMetricsHook>,
    endpoints: HashMap<String, EndpointEntry<T>>,
    online: bool,
    next_conn_id: u64,
    actor_ref: ActorRef<Self>,
}

impl<T: WsTransport> Actor for ConnectionManagerActor<T> {
    type Args = ConnectionManagerArgs<T>;
    type Error = WebSocketError;

    fn name() -> &'static str {
        "ConnectionManagerActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> WebSocketResult<Self> {
        let ConnectionManagerArgs {
            config,
            transport,
            credentials,
            dispatcher,
            metrics,
        } = args;

        Ok(Self {
            config,
            transport,
            credentials,
            dispatcher,
            metrics,
            endpoints: HashMap::new(),
            online: true,
            next_conn_id: 0,
            actor_ref: ctx,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> WebSocketResult<()> {
        self.teardown_all().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "ConnectionManagerActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Who asked for a connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOrigin {
    Caller,
    Scheduler,
}

/// Open (or join) the connection for `endpoint`. The outcome is sent on `reply`.
#[derive(Debug)]
pub struct Connect {
    pub endpoint: String,
    pub origin: ConnectOrigin,
    pub reply: Option<ConnectReply>,
}

pub(crate) struct ConnectionEstablished<T: WsTransport> {
    pub(crate) endpoint: String,
    pub(crate) conn_id: u64,
    pub(crate) reader: T::Reader,
    pub(crate) writer: T::Writer,
}

pub(crate) struct ConnectionFailed {
    pub(crate) endpoint: String,
    pub(crate) conn_id: u64,
    pub(crate) error: WebSocketError,
}

/// Events produced by the manager's own IO tasks and timers.
#[derive(Debug)]
pub(crate) enum ManagerEvent {
    Inbound {
        endpoint: String,
        conn_id: u64,
        frame: WsFrame,
    },
    Closed {
        endpoint: String,
        conn_id: u64,
        code: u16,
        reason: String,
    },
    HeartbeatDue {
        endpoint: String,
        conn_id: u64,
    },
    ReconnectDue {
        endpoint: String,
        timer_id: u64,
    },
}

/// Host network availability changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkChange {
    Online,
    Offline,
}

/// Close `endpoint` with code 1000 and forget its live socket. Never schedules a reconnect.
#[derive(Clone, Debug)]
pub struct Disconnect {
    pub endpoint: String,
}

/// Disconnect and drop the endpoint's status record and attempt history.
#[derive(Clone, Debug)]
pub struct ClearStatus {
    pub endpoint: String,
}

#[derive(Clone, Debug)]
pub struct SendMessage {
    pub endpoint: String,
    pub message: RealtimeMessage,
}

#[derive(Clone, Debug)]
pub struct GetStatus {
    pub endpoint: String,
}

#[derive(Clone, Copy, Debug)]
pub struct GetHealthStatus;

/// Close every socket with 1001, cancel every timer and reject pending connects.
#[derive(Clone, Copy, Debug)]
pub struct Shutdown;

impl<T: WsTransport> KameoMessage<Connect> for ConnectionManagerActor<T> {
    type Reply = ();

    async fn handle(&mut self, msg: Connect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.handle_connect(msg.endpoint, msg.origin, msg.reply);
    }
}

impl<T: WsTransport> KameoMessage<ConnectionEstablished<T>> for ConnectionManagerActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.on_connection_established(msg).await;
    }
}

impl<T: WsTransport> KameoMessage<ConnectionFailed> for ConnectionManagerActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.on_connection_failed(msg);
    }
}

impl<T: WsTransport> KameoMessage<ManagerEvent> for ConnectionManagerActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        event: ManagerEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match event {
            ManagerEvent::Inbound {
                endpoint,
                conn_id,
                frame,
            } => self.process_inbound(&endpoint, conn_id, frame),
            ManagerEvent::Closed {
                endpoint,
                conn_id,
                code,
                reason,
            } => self.on_closed(&endpoint, conn_id, code, reason).await,
            ManagerEvent::HeartbeatDue { endpoint, conn_id } => {
                self.emit_ping(&endpoint, conn_id).await
            }
            ManagerEvent::ReconnectDue { endpoint, timer_id } => {
                let Some(entry) = self.endpoints.get_mut(&endpoint) else {
                    return;
                };
                // A cancelled or replaced timer may still have delivered its event.
                if entry.reconnect_timer.as_ref().map(|timer| timer.id) != Some(timer_id) {
                    return;
                }
                entry.reconnect_timer = None;
                self.handle_connect(endpoint, ConnectOrigin::Scheduler, None);
            }
        }
    }
}

impl<T: WsTransport> KameoMessage<NetworkChange> for ConnectionManagerActor<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        change: NetworkChange,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match change {
            NetworkChange::Offline => self.on_offline(),
            NetworkChange::Online => self.on_online(),
        }
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<Disconnect> for ConnectionManagerActor<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_disconnect(&msg.endpoint).await;
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<ClearStatus> for ConnectionManagerActor<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: ClearStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_disconnect(&msg.endpoint).await;
        self.endpoints.remove(&msg.endpoint);
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<SendMessage> for ConnectionManagerActor<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        msg: SendMessage,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.send_message(msg.endpoint, msg.message).await
    }
}

impl<T: WsTransport> KameoMessage<GetStatus> for ConnectionManagerActor<T> {
    type Reply = WebSocketResult<Option<ConnectionStatus>>;

    async fn handle(
        &mut self,
        msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self
            .endpoints
            .get(&msg.endpoint)
            .map(|entry| entry.status.clone()))
    }
}

impl<T: WsTransport> KameoMessage<GetHealthStatus> for ConnectionManagerActor<T> {
    type Reply = WebSocketResult<HealthStatus>;

    async fn handle(
        &mut self,
        _msg: GetHealthStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(health_snapshot(self.endpoints.iter().map(|(name, entry)| {
            (
                name.as_str(),
                entry.phase.link_state(),
                &entry.status,
                &entry.health,
            )
        })))
    }
}

impl<T: WsTransport> KameoMessage<Shutdown> for ConnectionManagerActor<T> {
    type Reply = WebSocketResult<()>;

    async fn handle(
        &mut self,
        _msg: Shutdown,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.teardown_all().await;
        Ok(())
    }
}

impl<T: WsTransport> ConnectionManagerActor<T> {
    fn publish_status(&self, endpoint: &str) {
        if let Some(entry) = self.endpoints.get(endpoint) {
            self.dispatcher.notify_status(endpoint, &entry.status);
        }
    }

    fn handle_connect(&mut self, endpoint: String, origin: ConnectOrigin, reply: Option<ConnectReply>) {
        let config = &self.config;
        let entry = self
            .endpoints
            .entry(endpoint.clone())
            .or_insert_with(|| EndpointEntry::new(config));

        match entry.phase {
            LinkPhase::Open { .. } => {
                if !entry.status.connected {
                    entry.status.connected = true;
                    entry.status.connecting = false;
                    self.publish_status(&endpoint);
                }
                settle(reply, Ok(()));
                return;
            }
            LinkPhase::Connecting { .. } => {
                debug!(endpoint = %endpoint, "connect already in flight");
                settle(reply, Ok(()));
                return;
            }
            LinkPhase::Idle => {}
        }

        if let RateDecision::Denied { retry_after } = entry.limiter.try_acquire() {
            warn!(
                endpoint = %endpoint,
                retry_after_ms = retry_after.as_millis() as u64,
                "connect attempt rate limited"
            );
            let error = WebSocketError::RateLimitExceeded {
                endpoint: endpoint.clone(),
                retry_after: Some(retry_after),
            };
            match origin {
                ConnectOrigin::Caller => settle(reply, Err(error)),
                ConnectOrigin::Scheduler => {
                    entry.status.mark_failed(error.to_string());
                    self.publish_status(&endpoint);
                    self.schedule_reconnect(&endpoint);
                }
            }
            return;
        }

        let url = match self.credentials.access_token() {
            Some(token) => self.config.base_url.endpoint_url(&endpoint, &token),
            None => Err(WebSocketError::AuthenticationMissing),
        };
        let url = match url {
            Ok(url) => url,
            Err(error) => {
                warn!(endpoint = %endpoint, error = %error, "connect attempt aborted");
                match origin {
                    ConnectOrigin::Caller => settle(reply, Err(error)),
                    ConnectOrigin::Scheduler => {
                        if let Some(entry) = self.endpoints.get_mut(&endpoint) {
                            entry.status.mark_failed(error.to_string());
                        }
                        self.publish_status(&endpoint);
                    }
                }
                return;
            }
        };

        self.next_conn_id = self.next_conn_id.wrapping_add(1);
        let conn_id = self.next_conn_id;
        let task = self.spawn_connect(endpoint.clone(), conn_id, url);

        if let Some(entry) = self.endpoints.get_mut(&endpoint) {
            // A rejected explicit connect leaves the pending retry armed.
            if origin == ConnectOrigin::Caller {
                entry.cancel_reconnect();
            }
            entry.status.mark_connecting();
            entry.phase = LinkPhase::Connecting {
                conn_id,
                task,
                reply,
            };
        }
        debug!(endpoint = %endpoint, conn_id, "connecting");
        self.publish_status(&endpoint);
    }

    fn spawn_connect(&self, endpoint: String, conn_id: u64, url: String) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let buffers = self.config.ws_buffers;
        let timeout = self.config.connect_timeout;
        let actor_ref = self.actor_ref.clone();

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, transport.connect(url, buffers)).await;
            let undelivered = match outcome {
                Ok(Ok((reader, writer))) => {
                    actor_ref
                        .tell(ConnectionEstablished::<T> {
                            endpoint,
                            conn_id,
                            reader,
                            writer,
                        })
                        .send()
                        .await
                        .is_err()
                }
                Ok(Err(error)) => {
                    actor_ref
                        .tell(ConnectionFailed {
                            endpoint,
                            conn_id,
                            error,
                        })
                        .send()
                        .await
                        .is_err()
                }
                Err(_) => {
                    let error = WebSocketError::ConnectionTimeout {
                        endpoint: endpoint.clone(),
                        timeout,
                    };
                    actor_ref
                        .tell(ConnectionFailed {
                            endpoint,
                            conn_id,
                            error,
                        })
                        .send()
                        .await
                        .is_err()
                }
            };
            if undelivered {
                debug!("manager stopped before connect outcome was delivered");
            }
        })
    }

    async fn on_connection_established(&mut self, msg: ConnectionEstablished<T>) {
        let ConnectionEstablished {
            endpoint,
            conn_id,
            reader,
            mut writer,
        } = msg;

        let current = self
            .endpoints
            .get(&endpoint)
            .and_then(|entry| match &entry.phase {
                LinkPhase::Connecting { conn_id: id, .. } => Some(*id),
                _ => None,
            });
        if current != Some(conn_id) {
            debug!(endpoint = %endpoint, conn_id, "closing superseded connection");
            tokio::spawn(async move {
                let _ = writer.send(WsFrame::close(CLOSE_NORMAL, "Superseded")).await;
                let _ = writer.close().await;
            });
            return;
        }

        let writer = WsWriterActor::spawn(WsWriterActor::new(endpoint.clone(), writer));
        let reader_task = self.spawn_reader(endpoint.clone(), conn_id, reader);
        let heartbeat_task = self.spawn_heartbeat(endpoint.clone(), conn_id);

        let Some(entry) = self.endpoints.get_mut(&endpoint) else {
            return;
        };
        let previous = std::mem::replace(
            &mut entry.phase,
            LinkPhase::Open {
                conn_id,
                writer,
                reader_task,
                heartbeat_task: Some(heartbeat_task),
                heartbeat: HeartbeatMonitor::new(),
            },
        );
        entry.cancel_reconnect();
        entry.status.mark_open(Utc::now());
        info!(endpoint = %endpoint, conn_id, "websocket connection established");

        if let LinkPhase::Connecting { reply, .. } = previous {
            settle(reply, Ok(()));
        }
        self.publish_status(&endpoint);
    }

    fn on_connection_failed(&mut self, msg: ConnectionFailed) {
        let ConnectionFailed {
            endpoint,
            conn_id,
            error,
        } = msg;
        let Some(entry) = self.endpoints.get_mut(&endpoint) else {
            return;
        };
        if !matches!(entry.phase, LinkPhase::Connecting { conn_id: id, .. } if id == conn_id) {
            debug!(endpoint = %endpoint, conn_id, "ignoring failure of superseded connect");
            return;
        }

        warn!(endpoint = %endpoint, conn_id, error = %error, "websocket connect failed");
        if let LinkPhase::Connecting { reply, .. } =
            std::mem::replace(&mut entry.phase, LinkPhase::Idle)
        {
            settle(reply, Err(error.clone()));
        }
        entry.status.mark_failed(error.to_string());
        self.publish_status(&endpoint);

        // A failed handshake is an abnormal closure as far as the retry policy is concerned.
        self.schedule_reconnect(&endpoint);
    }

    fn spawn_reader(&self, endpoint: String, conn_id: u64, mut reader: T::Reader) -> JoinHandle<()> {
        let actor_ref = self.actor_ref.clone();
        tokio::spawn(async move {
            loop {
                let (code, reason) = match reader.next().await {
                    Some(Ok(WsFrame::Close(frame))) => match frame {
                        Some(frame) => (frame.code, frame.reason_lossy()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    },
                    Some(Ok(frame @ (WsFrame::Text(_) | WsFrame::Binary(_)))) => {
                        let event = ManagerEvent::Inbound {
                            endpoint: endpoint.clone(),
                            conn_id,
                            frame,
                        };
                        if actor_ref.tell(event).send().await.is_err() {
                            return;
                        }
                        continue;
                    }
                    // Protocol-level ping/pong is answered by the transport.
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => (CLOSE_ABNORMAL, err.to_string()),
                    None => (CLOSE_ABNORMAL, "connection dropped".to_string()),
                };

                let _ = actor_ref
                    .tell(ManagerEvent::Closed {
                        endpoint,
                        conn_id,
                        code,
                        reason,
                    })
                    .send()
                    .await;
                return;
            }
        })
    }

    fn spawn_heartbeat(&self, endpoint: String, conn_id: u64) -> JoinHandle<()> {
        let interval = self.config.ping_interval;
        let actor_ref = self.actor_ref.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let event = ManagerEvent::HeartbeatDue {
                    endpoint: endpoint.clone(),
                    conn_id,
                };
                if actor_ref.tell(event).send().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn on_closed(&mut self, endpoint: &str, conn_id: u64, code: u16, reason: String) {
        let Some(entry) = self.endpoints.get_mut(endpoint) else {
            return;
        };
        if !matches!(entry.phase, LinkPhase::Open { conn_id: id, .. } if id == conn_id) {
            debug!(endpoint = %endpoint, conn_id, "ignoring close of superseded connection");
            return;
        }

        if let LinkPhase::Open {
            writer,
            heartbeat_task,
            ..
        } = std::mem::replace(&mut entry.phase, LinkPhase::Idle)
        {
            if let Some(task) = heartbeat_task {
                task.abort();
            }
            let _ = writer.stop_gracefully().await;
        }

        entry.status.connected = false;
        entry.status.connecting = false;
        let clean = is_clean_close(code);
        if clean {
            info!(endpoint = %endpoint, code, reason = %reason, "websocket closed");
        } else {
            warn!(endpoint = %endpoint, code, reason = %reason, "websocket closed unexpectedly");
        }
        entry.status.error = Some(close_error(code, &reason));
        self.publish_status(endpoint);

        if !clean {
            self.schedule_reconnect(endpoint);
        }
    }

    /// Arm the backoff timer for `endpoint` unless one is pending, the host is offline or the
    /// retry budget is spent.
    fn schedule_reconnect(&mut self, endpoint: &str) {
        if !self.online {
            debug!(endpoint = %endpoint, "offline; reconnect suspended");
            return;
        }
        let Some(entry) = self.endpoints.get_mut(endpoint) else {
            return;
        };
        if entry.reconnect_timer.is_some() {
            return;
        }

        let attempts = entry.status.reconnect_attempts;
        let Some(delay) = self.config.reconnect.next_delay(attempts) else {
            warn!(endpoint = %endpoint, attempts, "giving up on reconnect");
            entry.status.error = Some(WebSocketError::MaxReconnectAttemptsReached.to_string());
            entry.status.connecting = false;
            self.publish_status(endpoint);
            return;
        };

        let attempt = attempts + 1;
        entry.status.reconnect_attempts = attempt;
        warn!(
            endpoint = %endpoint,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling websocket reconnect"
        );
        if let Some(metrics) = self.metrics.as_ref() {
            metrics.track_reconnect_scheduled(endpoint, attempt, delay);
        }
        self.arm_reconnect_timer(endpoint, delay);
    }

    /// Start the retry timer without touching `reconnect_attempts`.
    fn arm_reconnect_timer(&mut self, endpoint: &str, delay: Duration) {
        self.next_conn_id = self.next_conn_id.wrapping_add(1);
        let timer_id = self.next_conn_id;
        let Some(entry) = self.endpoints.get_mut(endpoint) else {
            return;
        };
        let actor_ref = self.actor_ref.clone();
        let due = endpoint.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor_ref
                .tell(ManagerEvent::ReconnectDue {
                    endpoint: due,
                    timer_id,
                })
                .send()
                .await;
        });
        entry.reconnect_timer = Some(ReconnectTimer { id: timer_id, task });
        self.publish_status(endpoint);
    }

    async fn emit_ping(&mut self, endpoint: &str, conn_id: u64) {
        let Some(entry) = self.endpoints.get_mut(endpoint) else {
            return;
        };
        let LinkPhase::Open {
            conn_id: id,
            writer,
            heartbeat,
            heartbeat_task,
            ..
        } = &mut entry.phase
        else {
            return;
        };
        if *id != conn_id {
            return;
        }

        let result = match heartbeat.create_ping().encode() {
            Ok(text) => writer
                .ask(WriterWrite {
                    message: WsFrame::text(text),
                })
                .await
                .map_err(writer_error),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => debug!(endpoint = %endpoint, "heartbeat ping sent"),
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "heartbeat failed; stopping heartbeat");
                if let Some(task) = heartbeat_task.take() {
                    task.abort();
                }
                entry.health.record_send_error();
                entry.status.error = Some(format!("Heartbeat failed: {err}"));
                if let Some(metrics) = self.metrics.as_ref() {
                    metrics.track_send_error(endpoint);
                }
                self.publish_status(endpoint);
            }
        }
    }

    fn process_inbound(&mut self, endpoint: &str, conn_id: u64, frame: WsFrame) {
        let Some(entry) = self.endpoints.get_mut(endpoint) else {
            return;
        };
        let LinkPhase::Open {
            conn_id: id,
            heartbeat,
            ..
        } = &mut entry.phase
        else {
            return;
        };
        if *id != conn_id {
            return;
        }

        let Some(text) = frame.as_text() else {
            warn!(endpoint = %endpoint, "dropping non-utf8 frame");
            return;
        };
        let message = match RealtimeMessage::decode(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "dropping malformed realtime frame");
                return;
            }
        };

        if let WsPongResult::PongReceived(rtt) = heartbeat.handle_inbound(&message) {
            if let Some(rtt) = rtt {
                entry.health.record_rtt(rtt);
                if let Some(metrics) = self.metrics.as_ref() {
                    metrics.observe_heartbeat_rtt_us(endpoint, rtt.as_micros() as u64);
                }
            }
            debug!(endpoint = %endpoint, rtt = ?rtt, "heartbeat acknowledged");
            return;
        }

        debug!(endpoint = %endpoint, message_type = %message.kind, "dispatching inbound message");
        self.dispatcher.dispatch(&message);
    }

    async fn send_message(&mut self, endpoint: String, mut message: RealtimeMessage) -> WebSocketResult<()> {
        let Some(entry) = self.endpoints.get_mut(&endpoint) else {
            return Err(not_open(endpoint));
        };
        let LinkPhase::Open { writer, .. } = &entry.phase else {
            return Err(not_open(endpoint));
        };

        message.stamp();
        let text = message.encode()?;
        let result = writer
            .ask(WriterWrite {
                message: WsFrame::text(text),
            })
            .await
            .map_err(writer_error);

        if let Err(err) = result {
            entry.health.record_send_error();
            if let Some(metrics) = self.metrics.as_ref() {
                metrics.track_send_error(&endpoint);
            }
            warn!(endpoint = %endpoint, error = %err, "outbound send failed");
            return Err(WebSocketError::SendFailed {
                endpoint,
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    async fn handle_disconnect(&mut self, endpoint: &str) {
        let Some(entry) = self.endpoints.get_mut(endpoint) else {
            return;
        };
        entry.cancel_reconnect();
        let was_live = entry.phase.conn_id().is_some();
        entry
            .close_link(
                CLOSE_NORMAL,
                "Manual disconnect",
                WebSocketError::InvalidState(format!("{endpoint} was disconnected before it opened")),
            )
            .await;

        let changed = entry.status != ConnectionStatus::default();
        entry.status = ConnectionStatus::default();
        if was_live {
            info!(endpoint = %endpoint, "websocket disconnected");
        }
        if changed {
            self.publish_status(endpoint);
        }
    }

    fn on_offline(&mut self) {
        if !self.online {
            return;
        }
        self.online = false;
        warn!("network offline; reconnects suspended");

        let mut changed = Vec::new();
        for (name, entry) in self.endpoints.iter_mut() {
            if entry.status.connected {
                entry.status.connected = false;
                changed.push(name.clone());
            }
        }
        for name in changed {
            self.publish_status(&name);
        }
    }

    fn on_online(&mut self) {
        self.online = true;
        info!("network online; resuming connections");

        let mut resync = Vec::new();
        let mut retry = Vec::new();
        for (name, entry) in self.endpoints.iter_mut() {
            if entry.status.connected || entry.status.last_connected.is_none() {
                continue;
            }
            match entry.phase {
                // The socket survived the outage; only the status was marked down.
                LinkPhase::Open { .. } => {
                    entry.status.connected = true;
                    resync.push(name.clone());
                }
                LinkPhase::Connecting { .. } => {}
                LinkPhase::Idle => retry.push(name.clone()),
            }
        }
        for name in resync {
            self.publish_status(&name);
        }
        for name in retry {
            let exhausted = self.endpoints.get(&name).is_some_and(|entry| {
                entry.reconnect_timer.is_none()
                    && self
                        .config
                        .reconnect
                        .next_delay(entry.status.reconnect_attempts)
                        .is_none()
            });
            if exhausted {
                // One fresh attempt; the budget only resets once a socket opens.
                info!(endpoint = %name, "restarting exhausted reconnect sequence");
                let delay = self.config.reconnect.base();
                self.arm_reconnect_timer(&name, delay);
            } else {
                self.schedule_reconnect(&name);
            }
        }
    }

    async fn teardown_all(&mut self) {
        if self.endpoints.is_empty() {
            return;
        }
        info!(endpoints = self.endpoints.len(), "tearing down websocket connections");
        for (name, mut entry) in std::mem::take(&mut self.endpoints) {
            entry.cancel_reconnect();
            entry
                .close_link(
                    CLOSE_GOING_AWAY,
                    "Client shutdown",
                    WebSocketError::InvalidState(format!("{name} was shut down before it opened")),
                )
                .await;
        }
    }
}

fn settle(reply: Option<ConnectReply>, result: WebSocketResult<()>) {
    if let Some(reply) = reply {
        // The caller may have given up waiting.
        let _ = reply.send(result);
    }
}

fn close_error(code: u16, reason: &str) -> String {
    let summary = if is_clean_close(code) {
        "Connection closed"
    } else {
        "Connection closed unexpectedly"
    };
    if reason.is_empty() {
        format!("{summary} (code {code})")
    } else {
        format!("{summary} (code {code}): {reason}")
    }
}

fn not_open(endpoint: String) -> WebSocketError {
    WebSocketError::SendFailed {
        endpoint,
        reason: "connection is not open".to_string(),
    }
}

fn writer_error(err: SendError<WriterWrite, WebSocketError>) -> WebSocketError {
    match err {
        SendError::HandlerError(err) => err,
        other => WebSocketError::InvalidState(format!("writer unavailable: {other}")),
    }
}
