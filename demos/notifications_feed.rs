use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use realtime_ws::core::ACCESS_TOKEN_KEY;
use realtime_ws::{
    ConnectionManager, ConnectionManagerArgs, ConnectionManagerConfig, HostSignal, TokenStore,
    WsBaseUrl,
};

fn usage() -> &'static str {
    "notifications_feed\n\
  Connects to one or more realtime endpoints and logs every inbound message and status change.\n\
\n\
USAGE:\n\
  cargo run --example notifications_feed -- [--page <url>] [--endpoints <CSV>] [--health-secs <N>]\n\
\n\
ENVIRONMENT:\n\
  REALTIME_TOKEN                  bearer token presented on connect (required)\n\
  REALTIME_WS_URL                 explicit ws:// or wss:// base, overrides --page\n\
  REALTIME_WS_CONNECT_TIMEOUT_MS  connect timeout override\n\
  REALTIME_WS_PING_INTERVAL_MS    heartbeat interval override\n\
\n\
DEFAULTS:\n\
  --page         http://localhost:8000\n\
  --endpoints    notifications\n\
  --health-secs  30\n\
"
}

struct Args {
    page: String,
    endpoints: Vec<String>,
    health_every: Duration,
}

fn parse_args() -> Args {
    let mut args = Args {
        page: "http://localhost:8000".to_string(),
        endpoints: vec!["notifications".to_string()],
        health_every: Duration::from_secs(30),
    };

    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        let mut value = || {
            it.next().unwrap_or_else(|| {
                eprintln!("{usage}", usage = usage());
                std::process::exit(2);
            })
        };
        match a.as_str() {
            "--page" => args.page = value(),
            "--endpoints" => {
                args.endpoints = value()
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| s.trim().to_string())
                    .collect();
                if args.endpoints.is_empty() {
                    eprintln!("--endpoints must not be empty");
                    std::process::exit(2);
                }
            }
            "--health-secs" => {
                let secs = value().parse::<u64>().unwrap_or(30).max(1);
                args.health_every = Duration::from_secs(secs);
            }
            "-h" | "--help" => {
                eprintln!("{usage}", usage = usage());
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown arg: {other}\n\n{usage}", usage = usage());
                std::process::exit(2);
            }
        }
    }
    args
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();

    let tokens = TokenStore::new();
    if let Ok(token) = std::env::var("REALTIME_TOKEN") {
        tokens.set(ACCESS_TOKEN_KEY, token);
    } else {
        warn!("REALTIME_TOKEN is not set; every connect will fail with missing credentials");
    }

    let config = ConnectionManagerConfig::from_env(WsBaseUrl::from_page_url(&args.page)?);
    info!(base = ?config.base_url, "starting notifications feed");
    let manager = ConnectionManager::spawn(ConnectionManagerArgs::new(config, Arc::new(tokens)));

    let _messages = manager.subscribe_fn("*", |msg| {
        info!(
            kind = %msg.kind,
            message = ?msg.message,
            notification_id = ?msg.notification_id,
            timestamp = ?msg.timestamp,
            "inbound"
        );
    });
    let _statuses = manager.on_status_change(|endpoint, status| {
        info!(
            endpoint,
            connected = status.connected,
            connecting = status.connecting,
            attempts = status.reconnect_attempts,
            error = ?status.error,
            "status"
        );
    });

    let report = manager.connect_to_endpoints(args.endpoints.clone()).await;
    for (endpoint, err) in &report.failed {
        warn!(endpoint = %endpoint, error = %err, "initial connect failed");
    }

    let mut health_tick = tokio::time::interval(args.health_every);
    health_tick.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, closing sockets");
                manager.handle_host_signal(HostSignal::Terminate).await?;
                break;
            }
            _ = health_tick.tick() => {
                let health = manager.health_status().await?;
                info!(
                    total = health.total_connections,
                    healthy = health.healthy_connections,
                    errors = health.error_connections,
                    "health"
                );
            }
        }
    }

    Ok(())
}
