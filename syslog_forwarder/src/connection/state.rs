//! Observable connection state.

use std::fmt;
use std::time::Duration;

/// Lifecycle state of a [`ConnectionManager`](super::ConnectionManager).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    /// Waiting out the backoff delay after a failure.
    Erroring,
    /// Terminal; no further reconnection attempts are made.
    ShuttingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Erroring => "erroring",
            ConnectionState::ShuttingDown => "shutting down",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of the manager's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    /// Attempts since the last successful connect.
    pub total_attempts: u32,
    pub current_delay: Duration,
    pub buffering_enabled: bool,
    pub buffered_records: usize,
    pub buffered_bytes: usize,
    pub delivered: u64,
    pub dropped: u64,
}
