//! Builder for [`SyslogHandler`].
//!
//! Exposes endpoint selection, TLS configuration, record presentation
//! (hostname, program, facility, level threshold, formatting hooks) and the
//! reconnection and buffering parameters of the underlying
//! [`ConnectionManager`].

use std::{sync::Arc, time::Duration};

use once_cell::sync::Lazy;

use crate::connection::{
    BackoffPolicy, ConnectionConfig, ConnectionEvents, ConnectionManager, TlsOptions,
};
use crate::formatter::{Clock, FrameEncoder, LineFormat};
use crate::level::{Facility, SeverityMap};

use super::{
    HandlerBuildError,
    builder_macros::{ensure_positive, option_setter},
    syslog::{HandlerSettings, MessageFormat, SyslogHandler},
};

/// Program name used when none is configured.
pub const DEFAULT_PROGRAM: &str = "default";
/// Level threshold used when none is configured.
pub const DEFAULT_LEVEL: &str = "info";

static DEFAULT_HOSTNAME: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
});

/// Name of the local machine as reported by the operating system.
pub fn default_hostname() -> &'static str {
    &DEFAULT_HOSTNAME
}

#[derive(Clone, Debug)]
struct Endpoint {
    host: String,
    port: u16,
}

#[derive(Clone, Debug, Default)]
struct TlsConfig {
    domain: Option<String>,
    verify_peer: bool,
}

/// Overrides for the reconnection backoff applied by the manager.
#[derive(Clone, Debug, Default)]
pub struct BackoffOverrides {
    attempts_before_decay: Option<u32>,
    maximum_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

impl BackoffOverrides {
    /// Create overrides with no custom values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures before the reconnect delay doubles.
    pub fn with_attempts_before_decay(mut self, attempts: u32) -> Self {
        self.attempts_before_decay = Some(attempts);
        self
    }

    /// Failures after which buffering is disabled until the next connect.
    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = Some(attempts);
        self
    }

    /// Delay before the first reconnection attempt, in milliseconds.
    pub fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = Some(delay_ms);
        self
    }

    /// Ceiling for the reconnect delay, in milliseconds.
    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = Some(delay_ms);
        self
    }

    fn apply(&self, policy: &mut BackoffPolicy) -> Result<(), HandlerBuildError> {
        if let Some(attempts) = self.attempts_before_decay {
            policy.attempts_before_decay = ensure_positive!(attempts, "attempts_before_decay")?;
        }
        if let Some(attempts) = self.maximum_attempts {
            policy.maximum_attempts = ensure_positive!(attempts, "maximum_attempts")?;
        }
        if let Some(delay) = self.initial_delay_ms {
            ensure_positive!(delay, "initial_reconnect_delay_ms")?;
            policy.initial_delay = Duration::from_millis(delay);
        }
        if let Some(delay) = self.max_delay_ms {
            ensure_positive!(delay, "max_reconnect_delay_ms")?;
            policy.max_delay = Duration::from_millis(delay);
        }
        Ok(())
    }
}

/// Builder for constructing [`SyslogHandler`] instances.
#[derive(Clone, Default)]
pub struct SyslogHandlerBuilder {
    endpoint: Option<Endpoint>,
    tls: TlsConfig,
    plain_tcp: bool,
    hostname: Option<String>,
    program: Option<String>,
    facility: Option<Facility>,
    level: Option<String>,
    colorize: bool,
    inline_meta: bool,
    severities: Option<SeverityMap>,
    log_format: Option<LineFormat>,
    message_format: Option<MessageFormat>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<ConnectionEvents>>,
    backoff: BackoffOverrides,
    max_buffer_bytes: Option<usize>,
    flush_on_close: Option<bool>,
    capacity: Option<usize>,
    connect_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    liveness_interval_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
    keepalive_secs: Option<u64>,
}

impl SyslogHandlerBuilder {
    /// Create a new builder with no endpoint configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward records to `host:port`, over TLS unless
    /// [`with_plain_tcp`](Self::with_plain_tcp) is set.
    pub fn with_tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.endpoint = Some(Endpoint {
            host: host.into(),
            port,
        });
        self
    }

    /// Configure the TLS handshake.
    ///
    /// TLS is on by default without peer verification. `domain` defaults to
    /// the endpoint host. With `verify_peer` unset the certificate chain and
    /// hostname are not checked.
    pub fn with_tls(mut self, domain: Option<String>, verify_peer: bool) -> Self {
        self.tls = TlsConfig {
            domain,
            verify_peer,
        };
        self.plain_tcp = false;
        self
    }

    /// Send records unencrypted.
    pub fn with_plain_tcp(mut self) -> Self {
        self.plain_tcp = true;
        self
    }

    option_setter!(
        #[doc = "Hostname written into each record. Defaults to the OS hostname."]
        with_hostname,
        hostname,
        String
    );
    option_setter!(
        #[doc = "Program name written into each record. Defaults to `default`."]
        with_program,
        program,
        String
    );
    option_setter!(with_facility, facility, Facility);
    option_setter!(
        #[doc = "Skip records less severe than `level`."]
        with_level,
        level,
        String
    );
    option_setter!(
        #[doc = "Replace the level-to-severity mapping."]
        with_severities,
        severities,
        SeverityMap
    );
    option_setter!(
        #[doc = "Format the `LEVEL LINE` part of every record."]
        with_log_format,
        log_format,
        LineFormat
    );
    option_setter!(
        #[doc = "Format whole messages and send each as one record."]
        with_message_format,
        message_format,
        MessageFormat
    );
    option_setter!(with_clock, clock, Arc<dyn Clock>);
    option_setter!(
        #[doc = "Listener registry attached before the first connection attempt."]
        with_events,
        events,
        Arc<ConnectionEvents>
    );
    option_setter!(
        #[doc = "Cap on bytes buffered while the endpoint is unreachable."]
        with_max_buffer_bytes,
        max_buffer_bytes,
        usize
    );
    option_setter!(
        #[doc = "Deliver buffered records before closing. Defaults to `true`."]
        with_flush_on_close,
        flush_on_close,
        bool
    );
    option_setter!(
        #[doc = "Set the bounded channel capacity."]
        with_capacity,
        capacity,
        usize
    );
    option_setter!(with_connect_timeout_ms, connect_timeout_ms, u64);
    option_setter!(with_write_timeout_ms, write_timeout_ms, u64);
    option_setter!(with_liveness_interval_ms, liveness_interval_ms, u64);
    option_setter!(with_close_timeout_ms, close_timeout_ms, u64);
    option_setter!(
        #[doc = "Idle seconds before TCP keepalive probes. `0` turns keepalive off."]
        with_keepalive_secs,
        keepalive_secs,
        u64
    );

    /// Show the level in ANSI colour inside the message text.
    pub fn with_colorize(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    /// Append structured metadata on the message line instead of below it.
    pub fn with_inline_meta(mut self, inline_meta: bool) -> Self {
        self.inline_meta = inline_meta;
        self
    }

    /// Override backoff timings using the provided overrides.
    pub fn with_backoff(mut self, overrides: BackoffOverrides) -> Self {
        self.backoff = overrides;
        self
    }

    /// Build a handler with its own connection manager.
    pub fn build(&self) -> Result<SyslogHandler, HandlerBuildError> {
        let settings = self.build_settings()?;
        let config = self.build_config()?;
        let manager = match &self.events {
            Some(events) => ConnectionManager::with_events(config, Arc::clone(events))?,
            None => ConnectionManager::new(config)?,
        };
        Ok(SyslogHandler::new(Arc::new(manager), settings))
    }

    /// Build a handler writing through an existing, possibly shared, manager.
    ///
    /// Endpoint, TLS and connection options are ignored; the manager's own
    /// configuration applies.
    pub fn build_with_manager(
        &self,
        manager: Arc<ConnectionManager>,
    ) -> Result<SyslogHandler, HandlerBuildError> {
        let settings = self.build_settings()?;
        Ok(SyslogHandler::new(manager, settings))
    }

    /// Resolve the connection configuration without starting a manager.
    pub fn build_config(&self) -> Result<ConnectionConfig, HandlerBuildError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(HandlerBuildError::InvalidConfig(
                "syslog handler requires a tcp endpoint".into(),
            ));
        };
        if endpoint.host.trim().is_empty() {
            return Err(HandlerBuildError::InvalidConfig(
                "tcp host must not be empty".into(),
            ));
        }
        ensure_positive!(endpoint.port, "port")?;
        let mut config = ConnectionConfig::new(endpoint.host.clone(), endpoint.port);
        config.tls = self.build_tls_options(&endpoint.host);
        self.backoff.apply(&mut config.backoff)?;
        self.apply_optional_fields(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_optional_fields(&self, config: &mut ConnectionConfig) -> Result<(), HandlerBuildError> {
        if let Some(bytes) = self.max_buffer_bytes {
            config.max_buffer_bytes = ensure_positive!(bytes, "max_buffer_bytes")?;
        }
        if let Some(flush) = self.flush_on_close {
            config.flush_on_close = flush;
        }
        if let Some(capacity) = self.capacity {
            config.capacity = ensure_positive!(capacity, "capacity")?;
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config.connect_timeout = millis(ensure_positive!(timeout, "connect_timeout_ms")?);
        }
        if let Some(timeout) = self.write_timeout_ms {
            config.write_timeout = millis(ensure_positive!(timeout, "write_timeout_ms")?);
        }
        if let Some(interval) = self.liveness_interval_ms {
            config.liveness_interval =
                millis(ensure_positive!(interval, "liveness_interval_ms")?);
        }
        if let Some(timeout) = self.close_timeout_ms {
            config.close_timeout = millis(ensure_positive!(timeout, "close_timeout_ms")?);
        }
        if let Some(secs) = self.keepalive_secs {
            config.keepalive = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(())
    }

    fn build_tls_options(&self, host: &str) -> Option<TlsOptions> {
        if self.plain_tcp {
            return None;
        }
        let domain = self
            .tls
            .domain
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| host.to_owned());
        Some(TlsOptions {
            domain,
            verify_peer: self.tls.verify_peer,
        })
    }

    pub(crate) fn build_settings(&self) -> Result<HandlerSettings, HandlerBuildError> {
        let hostname = non_empty(self.hostname.as_deref(), "hostname")?
            .unwrap_or_else(|| default_hostname().to_owned());
        let program = non_empty(self.program.as_deref(), "program")?
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_owned());
        let severities = self.severities.clone().unwrap_or_default();
        if let Some(level) = &self.level
            && severities.severity(level).is_none()
        {
            return Err(HandlerBuildError::InvalidConfig(format!(
                "level {level:?} has no configured severity"
            )));
        }
        // A replacement map without `info` leaves records unfiltered.
        let level = self.level.clone().or_else(|| {
            severities
                .severity(DEFAULT_LEVEL)
                .map(|_| DEFAULT_LEVEL.to_owned())
        });
        let mut encoder = FrameEncoder::new()
            .with_facility(self.facility.unwrap_or_default())
            .with_severities(severities)
            .with_colorize(self.colorize);
        if let Some(format) = &self.log_format {
            encoder = encoder.with_line_format(Arc::clone(format));
        }
        if let Some(clock) = &self.clock {
            encoder = encoder.with_clock(Arc::clone(clock));
        }
        Ok(HandlerSettings {
            encoder,
            hostname,
            program,
            level,
            inline_meta: self.inline_meta,
            message_format: self.message_format.clone(),
        })
    }
}

impl std::fmt::Debug for SyslogHandlerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyslogHandlerBuilder")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls)
            .field("plain_tcp", &self.plain_tcp)
            .field("hostname", &self.hostname)
            .field("program", &self.program)
            .field("facility", &self.facility)
            .field("level", &self.level)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn non_empty(value: Option<&str>, field: &str) -> Result<Option<String>, HandlerBuildError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(HandlerBuildError::InvalidConfig(format!(
            "{field} must not be empty"
        ))),
        Some(v) if v.contains(char::is_whitespace) => Err(HandlerBuildError::InvalidConfig(
            format!("{field} must not contain whitespace"),
        )),
        other => Ok(other.map(str::to_owned)),
    }
}
