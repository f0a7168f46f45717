//! Reconnecting connection management.
//!
//! [`ConnectionManager`] owns one logical connection to a log collector. A
//! worker thread drives the state machine (`Connecting`, `Connected`,
//! `Erroring`, `ShuttingDown`), reconnects with capped exponential backoff,
//! buffers payloads up to a byte limit while the endpoint is unavailable, and
//! drains them in submission order once a connection is re-established.

mod backoff;
mod buffer;
mod config;
mod events;
mod manager;
mod state;
mod transport;
mod worker;

#[cfg(test)]
mod tests;

pub use backoff::{AttemptOutcome, RetryState};
pub use buffer::{Completion, DropReason, OutboundBuffer, PendingWrite, WriteOutcome};
pub use config::{
    BackoffPolicy, ConnectionConfig, DEFAULT_ATTEMPTS_BEFORE_DECAY, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_LIVENESS_INTERVAL,
    DEFAULT_MAX_BUFFER_BYTES, DEFAULT_MAX_RECONNECT_DELAY, DEFAULT_MAXIMUM_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY, DEFAULT_WRITE_TIMEOUT, TlsOptions,
};
pub use events::{ConnectionError, ConnectionEvents};
pub use manager::ConnectionManager;
pub use state::{ConnectionState, ConnectionStats};
pub use transport::{ActiveConnection, Connector, TcpConnector, Transport};
