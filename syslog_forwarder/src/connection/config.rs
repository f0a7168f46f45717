//! Configuration consumed by the connection manager.
//!
//! [`SyslogHandlerBuilder`](crate::SyslogHandlerBuilder) normally produces
//! these values; they can also be assembled directly and handed to
//! [`ConnectionManager::new`](super::ConnectionManager::new), which validates
//! them before starting the worker.

use std::time::Duration;

use crate::handlers::HandlerBuildError;
use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;

/// Default bounded channel capacity between producers and the worker.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
/// Default connection timeout applied when establishing sockets.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default write timeout applied to socket writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of failed attempts before the reconnect delay doubles.
pub const DEFAULT_ATTEMPTS_BEFORE_DECAY: u32 = 5;
/// Default number of failed attempts before buffering is disabled.
pub const DEFAULT_MAXIMUM_ATTEMPTS: u32 = 25;
/// Default delay before the first reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Default ceiling for the reconnect delay.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
/// Default cap on buffered bytes while disconnected.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1 << 20; // 1 MiB
/// Default interval between end-of-stream probes on an idle connection.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5);
/// Default time `close` waits for the worker to acknowledge shutdown.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default idle time before TCP keepalive probes start.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// TLS connection options.
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// Domain name presented during the TLS handshake.
    pub domain: String,
    /// Validate the peer certificate and hostname.
    pub verify_peer: bool,
}

/// Exponential backoff and buffering policy for reconnection.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub attempts_before_decay: u32,
    pub maximum_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: DEFAULT_MAX_RECONNECT_DELAY,
            attempts_before_decay: DEFAULT_ATTEMPTS_BEFORE_DECAY,
            maximum_attempts: DEFAULT_MAXIMUM_ATTEMPTS,
        }
    }
}

/// Settings for one logical connection.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// TLS is used when present; plain TCP otherwise.
    pub tls: Option<TlsOptions>,
    /// Idle time before TCP keepalive probes; `None` leaves keepalive off.
    pub keepalive: Option<Duration>,
    pub backoff: BackoffPolicy,
    pub max_buffer_bytes: usize,
    pub flush_on_close: bool,
    pub capacity: usize,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub liveness_interval: Duration,
    pub close_timeout: Duration,
    pub warn_interval: Duration,
}

impl ConnectionConfig {
    /// TLS configuration for `host:port` with default tuning.
    ///
    /// The handshake presents `host` and does not verify the peer; call
    /// [`with_tls`](Self::with_tls) to turn verification on or
    /// [`with_plain_tcp`](Self::with_plain_tcp) to drop encryption.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            tls: Some(TlsOptions {
                domain: host.clone(),
                verify_peer: false,
            }),
            host,
            port,
            keepalive: Some(DEFAULT_KEEPALIVE),
            backoff: BackoffPolicy::default(),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            flush_on_close: true,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }

    /// Enable TLS, presenting the configured host as the handshake domain.
    pub fn with_tls(mut self, verify_peer: bool) -> Self {
        self.tls = Some(TlsOptions {
            domain: self.host.clone(),
            verify_peer,
        });
        self
    }

    /// Send records unencrypted.
    pub fn with_plain_tcp(mut self) -> Self {
        self.tls = None;
        self
    }

    /// Human-readable endpoint description used in `connect` events.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the invariants required before a manager can start.
    pub fn validate(&self) -> Result<(), HandlerBuildError> {
        if self.host.trim().is_empty() {
            return Err(HandlerBuildError::InvalidConfig(
                "host must not be empty".into(),
            ));
        }
        if self.port == 0 {
            return Err(HandlerBuildError::InvalidConfig(
                "port must be between 1 and 65535".into(),
            ));
        }
        if let Some(tls) = &self.tls
            && tls.domain.trim().is_empty()
        {
            return Err(HandlerBuildError::InvalidConfig(
                "tls domain must not be empty".into(),
            ));
        }
        ensure_positive("attempts_before_decay", u64::from(self.backoff.attempts_before_decay))?;
        ensure_positive("maximum_attempts", u64::from(self.backoff.maximum_attempts))?;
        ensure_positive("initial_reconnect_delay", millis(self.backoff.initial_delay))?;
        if self.backoff.max_delay < self.backoff.initial_delay {
            return Err(HandlerBuildError::InvalidConfig(
                "max_reconnect_delay must not be shorter than initial_reconnect_delay".into(),
            ));
        }
        ensure_positive("max_buffer_bytes", self.max_buffer_bytes as u64)?;
        ensure_positive("capacity", self.capacity as u64)?;
        ensure_positive("connect_timeout", millis(self.connect_timeout))?;
        ensure_positive("write_timeout", millis(self.write_timeout))?;
        ensure_positive("liveness_interval", millis(self.liveness_interval))?;
        if let Some(idle) = self.keepalive {
            ensure_positive("keepalive", idle.as_secs())?;
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn ensure_positive(field: &str, value: u64) -> Result<(), HandlerBuildError> {
    if value == 0 {
        Err(HandlerBuildError::InvalidConfig(format!(
            "{field} must be greater than zero"
        )))
    } else {
        Ok(())
    }
}
