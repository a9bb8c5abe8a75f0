mod support;

use std::time::Duration;

use realtime_ws::core::{CLOSE_GOING_AWAY, CLOSE_NORMAL, HostSignal, WebSocketError, WsFrame};
use support::{TOKEN, open, spawn_manager, spawn_manager_with, status, test_config};

fn close_code(frame: Option<WsFrame>) -> Option<(u16, String)> {
    match frame {
        Some(WsFrame::Close(Some(close))) => Some((close.code, close.reason_lossy())),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn connect_opens_endpoint_url_with_token() {
    let (manager, mut server) = spawn_manager();

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("notifications").await })
    };
    let pending = server.next_connect().await.expect("connect attempt");
    assert_eq!(
        pending.url,
        format!("ws://realtime.test/ws/notifications/?token={TOKEN}")
    );

    let connecting_status = status(&manager, "notifications").await;
    assert!(connecting_status.connecting && !connecting_status.connected);

    let _socket = pending.accept();
    connecting.await.unwrap().expect("connect succeeds");

    let open = status(&manager, "notifications").await;
    assert!(open.connected && !open.connecting);
    assert!(open.last_connected.is_some());
    assert_eq!(open.error, None);
    assert_eq!(open.reconnect_attempts, 0);
    assert!(manager.is_connected("notifications").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn connect_is_single_flight_and_idempotent() {
    let (manager, mut server) = spawn_manager();

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("chat").await })
    };
    let pending = server.next_connect().await.expect("connect attempt");

    // Already connecting: resolves immediately without a second transport connect.
    manager.connect("chat").await.expect("joins in-flight connect");

    let _socket = pending.accept();
    first.await.unwrap().expect("first connect");

    // Already open.
    manager.connect("chat").await.expect("open connect is a no-op");
    assert_eq!(server.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_credentials_reject_without_touching_the_transport() {
    let (manager, server) = spawn_manager_with(test_config(), None);

    let err = manager.connect("notifications").await.unwrap_err();
    assert_eq!(err, WebSocketError::AuthenticationMissing);
    assert_eq!(server.connect_count(), 0);
    assert!(!manager.is_connected("notifications").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn third_attempt_inside_the_window_is_rate_limited() {
    let (manager, mut server) = spawn_manager();

    for _ in 0..2 {
        let _socket = open(&manager, &mut server, "payments").await;
        manager.disconnect("payments").await.unwrap();
    }

    match manager.connect("payments").await {
        Err(WebSocketError::RateLimitExceeded {
            endpoint,
            retry_after,
        }) => {
            assert_eq!(endpoint, "payments");
            let retry_after = retry_after.expect("retry hint");
            assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(60));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert_eq!(server.connect_count(), 2);

    tokio::time::advance(Duration::from_secs(60)).await;
    let _socket = open(&manager, &mut server, "payments").await;
    assert_eq!(server.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn manual_disconnect_closes_normally_and_never_reconnects() {
    let (manager, mut server) = spawn_manager();
    let mut socket = open(&manager, &mut server, "notifications").await;

    manager.disconnect("notifications").await.unwrap();

    assert_eq!(
        close_code(socket.recv_outbound().await),
        Some((CLOSE_NORMAL, "Manual disconnect".to_string()))
    );
    // Writer is gone: no heartbeat frames follow the close.
    assert_eq!(socket.recv_outbound_timeout(Duration::from_secs(300)).await, None);

    let after = status(&manager, "notifications").await;
    assert_eq!(after, Default::default());

    assert!(
        server
            .next_connect_timeout(Duration::from_secs(600))
            .await
            .is_none(),
        "manual disconnect must not schedule a reconnect"
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (manager, mut server) = spawn_manager();

    manager.disconnect("never-connected").await.unwrap();

    let _socket = open(&manager, &mut server, "chat").await;
    manager.disconnect("chat").await.unwrap();
    manager.disconnect("chat").await.unwrap();
    assert!(!manager.is_connected("chat").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn disconnect_does_not_hang_on_a_stalled_socket() {
    let (manager, mut server) = spawn_manager();
    let socket = open(&manager, &mut server, "chat").await;
    socket.stall_writes();

    let started = tokio::time::Instant::now();
    manager.disconnect("chat").await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(5));
    assert_eq!(status(&manager, "chat").await, Default::default());

    // The manager keeps serving other endpoints.
    let _other = open(&manager, &mut server, "payments").await;
    assert!(manager.is_connected("payments").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn disconnect_rejects_an_in_flight_connect() {
    let (manager, mut server) = spawn_manager();

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("chat").await })
    };
    let pending = server.next_connect().await.expect("connect attempt");

    manager.disconnect("chat").await.unwrap();
    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, WebSocketError::InvalidState(_)), "{err:?}");

    // The handshake completing late must not revive the endpoint.
    drop(pending);
    assert!(!manager.is_connected("chat").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_rejects_the_call_and_schedules_a_retry() {
    let (manager, mut server) = spawn_manager();
    let started = tokio::time::Instant::now();

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("notifications").await })
    };
    let _stalled = server.next_connect().await.expect("connect attempt");

    let err = connecting.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        WebSocketError::ConnectionTimeout {
            endpoint: "notifications".to_string(),
            timeout: Duration::from_secs(10),
        }
    );
    assert_eq!(started.elapsed().as_secs(), 10);

    let failed = status(&manager, "notifications").await;
    assert!(!failed.connecting && !failed.connected);
    assert!(failed.error.is_some());
    assert_eq!(failed.reconnect_attempts, 1);

    let _retry = server.next_connect().await.expect("scheduled retry");
    assert_eq!(started.elapsed().as_secs(), 40);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_rejects_with_transport_error() {
    let (manager, mut server) = spawn_manager();

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("chat").await })
    };
    server
        .next_connect()
        .await
        .expect("connect attempt")
        .reject(WebSocketError::TransportError {
            context: "connect",
            error: "connection refused".to_string(),
        });

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, WebSocketError::TransportError { .. }), "{err:?}");
    let failed = status(&manager, "chat").await;
    assert!(failed.error.unwrap().contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn clear_status_forgets_the_endpoint() {
    let (manager, mut server) = spawn_manager();
    let _socket = open(&manager, &mut server, "chat").await;

    manager.clear_status("chat").await.unwrap();
    assert_eq!(manager.status("chat").await.unwrap(), None);
    assert!(manager.health_status().await.unwrap().endpoints.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_socket_going_away() {
    let (manager, mut server) = spawn_manager();
    let mut chat = open(&manager, &mut server, "chat").await;
    let mut notifications = open(&manager, &mut server, "notifications").await;

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect("payments").await })
    };
    let _stalled = server.next_connect().await.expect("connect attempt");

    manager.shutdown().await.unwrap();

    for socket in [&mut chat, &mut notifications] {
        assert_eq!(
            close_code(socket.recv_outbound().await),
            Some((CLOSE_GOING_AWAY, "Client shutdown".to_string()))
        );
    }
    assert!(pending.await.unwrap().is_err());
    assert!(matches!(
        manager.status("chat").await,
        Err(WebSocketError::ActorError(_))
    ));
    manager.shutdown().await.expect("shutdown is idempotent");
}

#[tokio::test(start_paused = true)]
async fn terminate_signal_tears_down() {
    let (manager, mut server) = spawn_manager();
    let mut socket = open(&manager, &mut server, "chat").await;

    manager.handle_host_signal(HostSignal::Terminate).await.unwrap();

    assert_eq!(
        close_code(socket.recv_outbound().await).map(|(code, _)| code),
        Some(CLOSE_GOING_AWAY)
    );
    assert!(server.next_connect_timeout(Duration::from_secs(600)).await.is_none());
}
