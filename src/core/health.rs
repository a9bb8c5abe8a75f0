use hdrhistogram::Histogram;
use std::time::Duration;

use super::types::{ConnectionStatus, EndpointHealth, HealthStatus};

/// Whether an endpoint currently owns a transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
}

/// Heartbeat round-trip tracking for one endpoint.
#[derive(Debug)]
pub struct WsHealthMonitor {
    latency_histogram: Histogram<u64>,
    send_errors: u64,
}

impl WsHealthMonitor {
    pub fn new() -> Self {
        Self {
            // 1us .. 10min, 3 significant figures.
            latency_histogram: Histogram::new_with_bounds(1, 600_000_000, 3)
                .expect("histogram bounds are valid"),
            send_errors: 0,
        }
    }

    pub fn record_rtt(&mut self, latency: Duration) {
        let micros = latency.as_micros().clamp(1, u64::MAX as u128) as u64;
        self.latency_histogram.saturating_record(micros);
    }

    pub fn record_send_error(&mut self) {
        self.send_errors = self.send_errors.saturating_add(1);
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    /// `(samples, p50_us, p99_us)`.
    pub fn latency(&self) -> (u64, u64, u64) {
        let samples = self.latency_histogram.len();
        if samples == 0 {
            return (0, 0, 0);
        }
        (
            samples,
            self.latency_histogram.value_at_percentile(50.0),
            self.latency_histogram.value_at_percentile(99.0),
        )
    }
}

impl Default for WsHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold per-endpoint state into the public health snapshot, ordered by endpoint name.
pub fn health_snapshot<'a, I>(items: I) -> HealthStatus
where
    I: IntoIterator<Item = (&'a str, LinkState, &'a ConnectionStatus, &'a WsHealthMonitor)>,
{
    let mut total_connections = 0;
    let mut healthy_connections = 0;
    let mut error_connections = 0;
    let mut endpoints = Vec::new();

    for (endpoint, link, status, monitor) in items {
        match link {
            LinkState::Open => {
                total_connections += 1;
                if status.connected {
                    healthy_connections += 1;
                }
            }
            LinkState::Connecting => total_connections += 1,
            LinkState::Idle => {}
        }
        if status.has_error() {
            error_connections += 1;
        }
        let (heartbeat_samples, heartbeat_p50_us, heartbeat_p99_us) = monitor.latency();
        endpoints.push(EndpointHealth {
            endpoint: endpoint.to_string(),
            status: status.clone(),
            heartbeat_samples,
            heartbeat_p50_us,
            heartbeat_p99_us,
        });
    }

    endpoints.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

    HealthStatus {
        total_connections,
        healthy_connections,
        error_connections,
        endpoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_monitor_records_rtt_and_percentiles() {
        let mut monitor = WsHealthMonitor::new();
        monitor.record_rtt(Duration::from_micros(100));
        monitor.record_rtt(Duration::from_micros(200));
        monitor.record_rtt(Duration::from_micros(300));

        let (samples, p50, p99) = monitor.latency();
        assert_eq!(samples, 3);
        assert_eq!(p50, 200);
        assert_eq!(p99, 300);
    }

    #[test]
    fn snapshot_counts_live_open_and_errored_endpoints() {
        let open = ConnectionStatus {
            connected: true,
            ..Default::default()
        };
        let connecting = ConnectionStatus {
            connecting: true,
            ..Default::default()
        };
        let failed = ConnectionStatus {
            error: Some("Max reconnect attempts reached".into()),
            ..Default::default()
        };
        let monitor = WsHealthMonitor::new();

        let snapshot = health_snapshot([
            ("notifications", LinkState::Open, &open, &monitor),
            ("chat", LinkState::Connecting, &connecting, &monitor),
            ("payments", LinkState::Idle, &failed, &monitor),
        ]);

        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.healthy_connections, 1);
        assert_eq!(snapshot.error_connections, 1);
        let names: Vec<_> = snapshot.endpoints.iter().map(|e| e.endpoint.as_str()).collect();
        assert_eq!(names, ["chat", "notifications", "payments"]);
    }
}
