use std::time::Duration;

/// Exponential backoff policy for unexpected disconnects.
///
/// `delay(n) = base * 2^n` where `n` is the endpoint's current reconnect attempt count.
/// Once `n` reaches `max_attempts` no further retry is scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExponentialBackoffReconnect {
    base: Duration,
    max_attempts: u32,
}

impl ExponentialBackoffReconnect {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempts + 1`, or `None` once the budget is spent.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

impl Default for ExponentialBackoffReconnect {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 3)
    }
}
