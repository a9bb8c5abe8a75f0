use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct ConnectRateLimitConfig {
    pub window: Duration,
    pub max_attempts_per_window: u32,
}

impl Default for ConnectRateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_attempts_per_window: 2,
        }
    }
}

/// Outcome of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Sliding-window limiter guarding connection attempts of a single endpoint.
///
/// Denied attempts are not recorded, so a burst of rejected retries cannot keep
/// pushing the window forward.
#[derive(Debug, Clone)]
pub struct WsConnectRateLimiter {
    config: ConnectRateLimitConfig,
    attempts: VecDeque<Instant>,
}

impl WsConnectRateLimiter {
    pub fn new(config: ConnectRateLimitConfig) -> Self {
        Self {
            config,
            attempts: VecDeque::with_capacity(config.max_attempts_per_window as usize),
        }
    }

    pub fn try_acquire(&mut self) -> RateDecision {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> RateDecision {
        self.prune(now);

        if self.attempts.len() >= self.config.max_attempts_per_window as usize {
            let retry_after = self
                .attempts
                .front()
                .map(|oldest| (*oldest + self.config.window).saturating_duration_since(now))
                .unwrap_or(self.config.window);
            return RateDecision::Denied { retry_after };
        }

        self.attempts.push_back(now);
        RateDecision::Allowed
    }

    /// Attempts still inside the window as of the last check.
    pub fn recorded(&self) -> usize {
        self.attempts.len()
    }

    fn prune(&mut self, now: Instant) {
        let window = self.config.window;
        while let Some(oldest) = self.attempts.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }
}
