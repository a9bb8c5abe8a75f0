use std::time::Duration;

use tracing::warn;
use url::Url;

use super::rate_limit::ConnectRateLimitConfig;
use super::reconnect::ExponentialBackoffReconnect;
use super::types::{WebSocketBufferConfig, WebSocketError, WebSocketResult};

pub const ENV_WS_URL: &str = "REALTIME_WS_URL";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "REALTIME_WS_CONNECT_TIMEOUT_MS";
pub const ENV_PING_INTERVAL_MS: &str = "REALTIME_WS_PING_INTERVAL_MS";

/// Where endpoint sockets are opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsBaseUrl {
    /// Derived from the hosting page: secure pages use `wss`, insecure ones `ws`.
    Page { secure: bool, host: String },
    /// Explicit `ws://` / `wss://` base, e.g. from the environment.
    Override(String),
}

impl WsBaseUrl {
    pub fn from_page(secure: bool, host: impl Into<String>) -> Self {
        Self::Page {
            secure,
            host: host.into(),
        }
    }

    /// Derive from the page location, e.g. `https://app.example.com:8443/contracts`.
    pub fn from_page_url(page_url: &str) -> WebSocketResult<Self> {
        let url = Url::parse(page_url).map_err(|err| url_error(err.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| url_error(format!("page url has no host: {page_url}")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self::from_page(url.scheme() == "https", host))
    }

    fn base(&self) -> String {
        match self {
            WsBaseUrl::Page { secure, host } => {
                let scheme = if *secure { "wss" } else { "ws" };
                format!("{scheme}://{host}")
            }
            WsBaseUrl::Override(base) => base.trim_end_matches('/').to_string(),
        }
    }

    /// `{base}/ws/{endpoint}/?token={token}` with the token query-encoded.
    pub fn endpoint_url(&self, endpoint: &str, token: &str) -> WebSocketResult<String> {
        let endpoint = endpoint.trim_matches('/');
        let mut url = Url::parse(&format!("{}/ws/{endpoint}/", self.base()))
            .map_err(|err| url_error(err.to_string()))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }
}

impl Default for WsBaseUrl {
    fn default() -> Self {
        Self::from_page(false, "localhost:8000")
    }
}

fn url_error(error: String) -> WebSocketError {
    WebSocketError::TransportError {
        context: "url",
        error,
    }
}

/// Tunables of the connection manager. `Default` carries the production constants.
#[derive(Clone, Debug)]
pub struct ConnectionManagerConfig {
    pub base_url: WsBaseUrl,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub reconnect: ExponentialBackoffReconnect,
    pub rate_limit: ConnectRateLimitConfig,
    pub ws_buffers: WebSocketBufferConfig,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            base_url: WsBaseUrl::default(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(45),
            reconnect: ExponentialBackoffReconnect::default(),
            rate_limit: ConnectRateLimitConfig::default(),
            ws_buffers: WebSocketBufferConfig::default(),
        }
    }
}

impl ConnectionManagerConfig {
    /// Page-derived base URL, overridden by environment values where present.
    pub fn from_env(page: WsBaseUrl) -> Self {
        Self::from_lookup(page, |key| std::env::var(key).ok())
    }

    fn from_lookup(page: WsBaseUrl, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            base_url: page,
            ..Self::default()
        };

        if let Some(url) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            config.base_url = WsBaseUrl::Override(url.trim().to_string());
        }
        if let Some(timeout) = duration_ms(&lookup, ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout = timeout;
        }
        if let Some(interval) = duration_ms(&lookup, ENV_PING_INTERVAL_MS) {
            config.ping_interval = interval;
        }
        config
    }
}

fn duration_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!(key, value = %raw, "ignoring invalid duration override");
            None
        }
    }
}
