mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use realtime_ws::core::{MAX_RECONNECT_ATTEMPTS_REACHED, StaticToken, WebSocketError};
use realtime_ws::testing::MockTransport;
use realtime_ws::ws::{ConnectionManager, ConnectionManagerArgs, ConnectionMetricsReporter};
use support::{init_tracing, open, spawn_manager, status, test_config, wait_for_status};
use tokio::time::Instant;

fn refused() -> WebSocketError {
    WebSocketError::TransportError {
        context: "connect",
        error: "connection refused".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn abnormal_drop_backs_off_exponentially_then_gives_up() {
    let (manager, mut server) = spawn_manager();
    let mut socket = open(&manager, &mut server, "notifications").await;

    let dropped_at = Instant::now();
    socket.drop_socket();

    for (expected_at, attempts) in [(30, 1), (90, 2), (210, 3)] {
        let pending = server.next_connect().await.expect("scheduled reconnect");
        assert_eq!(dropped_at.elapsed().as_secs(), expected_at);
        assert_eq!(
            status(&manager, "notifications").await.reconnect_attempts,
            attempts
        );
        pending.reject(refused());
    }

    let exhausted = wait_for_status(&manager, "notifications", |s| {
        s.error.as_deref() == Some(MAX_RECONNECT_ATTEMPTS_REACHED)
    })
    .await;
    assert_eq!(exhausted.reconnect_attempts, 3);
    assert!(!exhausted.connected && !exhausted.connecting);

    assert!(
        server
            .next_connect_timeout(Duration::from_secs(3600))
            .await
            .is_none(),
        "no retries after the budget is spent"
    );
    assert_eq!(server.connect_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_the_attempt_counter() {
    let (manager, mut server) = spawn_manager();
    let mut socket = open(&manager, &mut server, "chat").await;

    socket.drop_socket();
    let _socket = server.accept_next().await.expect("scheduled reconnect");

    let recovered = wait_for_status(&manager, "chat", |s| s.connected).await;
    assert_eq!(recovered.reconnect_attempts, 0);
    assert_eq!(recovered.error, None);
}

#[tokio::test(start_paused = true)]
async fn clean_close_codes_record_the_reason_without_reconnecting() {
    let (manager, mut server) = spawn_manager();
    let normal = open(&manager, &mut server, "chat").await;
    let going_away = open(&manager, &mut server, "payments").await;

    normal.close(1000, "bye").unwrap();
    going_away.close(1001, "server restart").unwrap();

    let expected = [("chat", "1000", "bye"), ("payments", "1001", "server restart")];
    for (endpoint, code, reason) in expected {
        let closed = wait_for_status(&manager, endpoint, |s| !s.connected).await;
        let error = closed.error.expect("close reason recorded");
        assert!(error.contains(code) && error.contains(reason), "{error}");
        assert!(!error.contains("unexpectedly"), "{error}");
        assert_eq!(closed.reconnect_attempts, 0);
    }
    assert!(server.next_connect_timeout(Duration::from_secs(600)).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn application_close_code_schedules_a_reconnect() {
    let (manager, mut server) = spawn_manager();
    let socket = open(&manager, &mut server, "chat").await;
    let closed_at = Instant::now();

    socket.close(4000, "session expired").unwrap();

    let _retry = server.next_connect().await.expect("scheduled reconnect");
    assert_eq!(closed_at.elapsed().as_secs(), 30);
    let retrying = status(&manager, "chat").await;
    assert_eq!(retrying.reconnect_attempts, 1);
    assert!(retrying.error.unwrap().contains("4000"));
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_cancels_the_pending_retry() {
    let (manager, mut server) = spawn_manager();
    let mut socket = open(&manager, &mut server, "chat").await;

    socket.drop_socket();
    wait_for_status(&manager, "chat", |s| s.reconnect_attempts == 1).await;

    let _socket = open(&manager, &mut server, "chat").await;
    assert_eq!(status(&manager, "chat").await.reconnect_attempts, 0);

    assert!(server.next_connect_timeout(Duration::from_secs(600)).await.is_none());
    assert_eq!(server.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_explicit_connect_keeps_the_pending_retry() {
    let (manager, mut server) = spawn_manager();
    let _first = open(&manager, &mut server, "chat").await;
    manager.disconnect("chat").await.unwrap();
    let mut second = open(&manager, &mut server, "chat").await;

    let dropped_at = Instant::now();
    second.drop_socket();
    wait_for_status(&manager, "chat", |s| s.reconnect_attempts == 1).await;

    // Both attempts of the window are spent, so the caller is turned away.
    let denied = manager.connect("chat").await;
    assert!(
        matches!(denied, Err(WebSocketError::RateLimitExceeded { .. })),
        "{denied:?}"
    );

    // The backoff timer survives: denied again at +30s, then retried once the window rolls.
    let _retry = server
        .next_connect_timeout(Duration::from_secs(3600))
        .await
        .expect("scheduled retry still armed");
    assert_eq!(dropped_at.elapsed().as_secs(), 90);
    assert_eq!(status(&manager, "chat").await.reconnect_attempts, 2);
    assert_eq!(server.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_retry_counts_as_failure_and_reschedules() {
    let (manager, mut server) = spawn_manager();
    let mut first = open(&manager, &mut server, "chat").await;
    first.drop_socket();
    wait_for_status(&manager, "chat", |s| s.reconnect_attempts == 1).await;

    // Second attempt inside the window: the explicit connect cancels the pending retry.
    let mut second = open(&manager, &mut server, "chat").await;
    let dropped_at = Instant::now();
    second.drop_socket();

    // The retry at +30s is denied by the limiter and pushed out by 60s.
    let _third = server.next_connect().await.expect("rescheduled retry");
    assert_eq!(dropped_at.elapsed().as_secs(), 90);
    assert_eq!(status(&manager, "chat").await.reconnect_attempts, 2);
    assert_eq!(server.connect_count(), 3);
}

#[derive(Default)]
struct RecordingMetrics {
    scheduled: Mutex<Vec<(String, u32, Duration)>>,
}

impl ConnectionMetricsReporter for RecordingMetrics {
    fn track_reconnect_scheduled(&self, endpoint: &str, attempt: u32, delay: Duration) {
        self.scheduled
            .lock()
            .unwrap()
            .push((endpoint.to_string(), attempt, delay));
    }

    fn track_send_error(&self, _endpoint: &str) {}
}

#[tokio::test(start_paused = true)]
async fn metrics_hook_sees_each_scheduled_reconnect() {
    init_tracing();
    let metrics = Arc::new(RecordingMetrics::default());
    let (transport, mut server) = MockTransport::channel_pair();
    let manager = ConnectionManager::spawn(
        ConnectionManagerArgs::with_transport(
            test_config(),
            transport,
            Arc::new(StaticToken(Some("t0k".to_string()))),
        )
        .with_metrics(metrics.clone()),
    );

    let mut socket = open(&manager, &mut server, "notifications").await;
    socket.drop_socket();
    server
        .next_connect()
        .await
        .expect("first retry")
        .reject(refused());
    let _second = server.next_connect().await.expect("second retry");

    let scheduled = metrics.scheduled.lock().unwrap().clone();
    assert_eq!(
        scheduled,
        vec![
            ("notifications".to_string(), 1, Duration::from_secs(30)),
            ("notifications".to_string(), 2, Duration::from_secs(60)),
        ]
    );
}
