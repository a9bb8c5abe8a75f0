pub mod actor;
pub mod dispatch;
pub mod manager;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

pub use crate::core::*;

/// Hook interface for surfacing connection metrics without coupling to a metrics backend.
pub trait ConnectionMetricsReporter: Send + Sync + 'static {
    fn track_reconnect_scheduled(&self, endpoint: &str, attempt: u32, delay: Duration);

    fn track_send_error(&self, endpoint: &str);

    /// Round trip of an application-level ping, in microseconds.
    #[inline]
    fn observe_heartbeat_rtt_us(&self, _endpoint: &str, _rtt_us: u64) {}
}

/// Convenient alias for passing around boxed metric hooks.
pub type ConnectionMetricsHook = Arc<dyn ConnectionMetricsReporter>;

pub use actor::*;
pub use dispatch::*;
pub use manager::*;
pub use writer::*;
