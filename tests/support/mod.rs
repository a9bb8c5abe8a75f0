#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use realtime_ws::core::{ConnectionManagerConfig, ConnectionStatus, StaticToken, WsBaseUrl};
use realtime_ws::testing::{MockServer, MockSocket, MockTransport};
use realtime_ws::ws::{ConnectionManager, ConnectionManagerArgs};

pub const TOKEN: &str = "t0k";

pub type TestManager = ConnectionManager<MockTransport>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig {
        base_url: WsBaseUrl::Override("ws://realtime.test".to_string()),
        ..ConnectionManagerConfig::default()
    }
}

pub fn spawn_manager() -> (TestManager, MockServer) {
    spawn_manager_with(test_config(), Some(TOKEN))
}

pub fn spawn_manager_with(
    config: ConnectionManagerConfig,
    token: Option<&str>,
) -> (TestManager, MockServer) {
    init_tracing();
    let (transport, server) = MockTransport::channel_pair();
    let credentials = Arc::new(StaticToken(token.map(str::to_string)));
    let manager = ConnectionManager::spawn(ConnectionManagerArgs::with_transport(
        config,
        transport,
        credentials,
    ));
    (manager, server)
}

/// Connect `endpoint` and accept the handshake on the server side.
pub async fn open(manager: &TestManager, server: &mut MockServer, endpoint: &str) -> MockSocket {
    let connecting = {
        let manager = manager.clone();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move { manager.connect(endpoint).await })
    };
    let socket = server.accept_next().await.expect("connect attempt");
    connecting
        .await
        .expect("connect task")
        .expect("connect succeeds");
    socket
}

pub async fn status(manager: &TestManager, endpoint: &str) -> ConnectionStatus {
    manager
        .status(endpoint)
        .await
        .expect("manager running")
        .expect("endpoint tracked")
}

/// Poll the status of `endpoint` in small (virtual) time steps until `check` accepts it.
pub async fn wait_for_status<F>(manager: &TestManager, endpoint: &str, mut check: F) -> ConnectionStatus
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    for _ in 0..200 {
        if let Some(status) = manager.status(endpoint).await.expect("manager running") {
            if check(&status) {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("status of {endpoint} never reached the expected state");
}
