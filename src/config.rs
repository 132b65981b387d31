//! Protocol and timing parameters shared by both endpoint kinds.

use std::time::Duration;

/// Maximum number of unacknowledged packets in flight to one peer.
pub const WINDOW_SIZE: usize = 16;

/// Interval after which an unacknowledged window is sent again.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet period after termination before an endpoint gives up on stragglers.
pub const GRACE_PERIOD: Duration = Duration::from_secs(1);

/// How long a closing endpoint waits for queued lines to be acknowledged
/// before discarding them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Adjustable endpoint parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Go-Back-N window size (N, at least 1).
    pub window_size: usize,
    pub retransmit_interval: Duration,
    pub grace_period: Duration,
    pub drain_timeout: Duration,
    /// Listener only: return once every peer has terminated and the grace
    /// period passed without traffic.
    pub exit_when_idle: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            retransmit_interval: RETRANSMIT_INTERVAL,
            grace_period: GRACE_PERIOD,
            drain_timeout: DRAIN_TIMEOUT,
            exit_when_idle: true,
        }
    }
}

impl Config {
    /// Clamp values that would stall the protocol.
    pub fn normalized(mut self) -> Self {
        self.window_size = self.window_size.max(1);
        if self.retransmit_interval.is_zero() {
            self.retransmit_interval = RETRANSMIT_INTERVAL;
        }
        self
    }
}
