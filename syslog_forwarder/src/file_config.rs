//! INI configuration for syslog handlers.
//!
//! A section describes one handler:
//!
//! ```ini
//! [syslog]
//! host = logs.example.com
//! port = 6514
//! tls = true
//! program = billing
//! max_buffer_bytes = 262144
//! severity.notice = 5
//! ```
//!
//! Keys mirror the [`SyslogHandlerBuilder`] setters. `severity.<level>` keys
//! extend the default level mapping. Connections use TLS unless the section
//! sets `tls = false`.

use std::{fs, path::Path, str::FromStr};

use ini::{Ini, Properties};

use crate::handlers::{
    HandlerBuildError, SyslogHandlerBuilder, syslog_builder::BackoffOverrides,
};
use crate::level::{Facility, SeverityMap};

const SEVERITY_PREFIX: &str = "severity.";

/// Read `section` of the INI file at `path` into a builder.
pub fn builder_from_ini(
    path: impl AsRef<Path>,
    section: &str,
) -> Result<SyslogHandlerBuilder, HandlerBuildError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    builder_from_ini_str(&text, section).map_err(|err| match err {
        HandlerBuildError::InvalidConfig(msg) => {
            HandlerBuildError::InvalidConfig(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Parse `section` of INI `text` into a builder.
pub fn builder_from_ini_str(
    text: &str,
    section: &str,
) -> Result<SyslogHandlerBuilder, HandlerBuildError> {
    let ini = Ini::load_from_str(text)
        .map_err(|err| HandlerBuildError::InvalidConfig(format!("invalid ini: {err}")))?;
    let props = ini.section(Some(section)).ok_or_else(|| {
        HandlerBuildError::InvalidConfig(format!("missing section [{section}]"))
    })?;
    SectionReader::default().read(props)
}

#[derive(Default)]
struct SectionReader {
    host: Option<String>,
    port: Option<u16>,
    tls: Option<bool>,
    tls_domain: Option<String>,
    verify_peer: Option<bool>,
    severities: Option<SeverityMap>,
    backoff: BackoffOverrides,
}

impl SectionReader {
    fn read(mut self, props: &Properties) -> Result<SyslogHandlerBuilder, HandlerBuildError> {
        let mut builder = SyslogHandlerBuilder::new();
        for (key, value) in props.iter() {
            let value = value.trim();
            if let Some(level) = key.strip_prefix(SEVERITY_PREFIX) {
                let severity = parse_severity(key, value)?;
                self.severities
                    .get_or_insert_with(SeverityMap::default)
                    .insert(level, severity);
                continue;
            }
            builder = self.apply(builder, key, value)?;
        }
        self.finish(builder)
    }

    fn apply(
        &mut self,
        builder: SyslogHandlerBuilder,
        key: &str,
        value: &str,
    ) -> Result<SyslogHandlerBuilder, HandlerBuildError> {
        let builder = match key {
            "host" => {
                self.host = Some(value.to_owned());
                builder
            }
            "port" => {
                self.port = Some(parse(key, value)?);
                builder
            }
            "tls" => {
                self.tls = Some(parse_bool(key, value)?);
                builder
            }
            "tls_domain" => {
                self.tls_domain = Some(value.to_owned());
                builder
            }
            "verify_peer" => {
                self.verify_peer = Some(parse_bool(key, value)?);
                builder
            }
            "attempts_before_decay" => {
                self.backoff = std::mem::take(&mut self.backoff).with_attempts_before_decay(parse(key, value)?);
                builder
            }
            "maximum_attempts" => {
                self.backoff = std::mem::take(&mut self.backoff).with_maximum_attempts(parse(key, value)?);
                builder
            }
            "initial_reconnect_delay_ms" => {
                self.backoff = std::mem::take(&mut self.backoff).with_initial_delay_ms(parse(key, value)?);
                builder
            }
            "max_reconnect_delay_ms" => {
                self.backoff = std::mem::take(&mut self.backoff).with_max_delay_ms(parse(key, value)?);
                builder
            }
            "hostname" => builder.with_hostname(value.to_owned()),
            "program" => builder.with_program(value.to_owned()),
            "facility" => builder.with_facility(parse_facility(value)?),
            "level" => builder.with_level(value.to_owned()),
            "colorize" => builder.with_colorize(parse_bool(key, value)?),
            "inline_meta" => builder.with_inline_meta(parse_bool(key, value)?),
            "max_buffer_bytes" => builder.with_max_buffer_bytes(parse(key, value)?),
            "flush_on_close" => builder.with_flush_on_close(parse_bool(key, value)?),
            "capacity" => builder.with_capacity(parse(key, value)?),
            "connect_timeout_ms" => builder.with_connect_timeout_ms(parse(key, value)?),
            "write_timeout_ms" => builder.with_write_timeout_ms(parse(key, value)?),
            "liveness_interval_ms" => builder.with_liveness_interval_ms(parse(key, value)?),
            "close_timeout_ms" => builder.with_close_timeout_ms(parse(key, value)?),
            "keepalive_secs" => builder.with_keepalive_secs(parse(key, value)?),
            other => {
                return Err(HandlerBuildError::InvalidConfig(format!(
                    "unknown option {other:?}"
                )));
            }
        };
        Ok(builder)
    }

    fn finish(self, mut builder: SyslogHandlerBuilder) -> Result<SyslogHandlerBuilder, HandlerBuildError> {
        match (self.host, self.port) {
            (Some(host), Some(port)) => builder = builder.with_tcp(host, port),
            (None, None) => {}
            (Some(_), None) => {
                return Err(HandlerBuildError::InvalidConfig("port is required".into()));
            }
            (None, Some(_)) => {
                return Err(HandlerBuildError::InvalidConfig("host is required".into()));
            }
        }
        let tls_options = self.tls_domain.is_some() || self.verify_peer.is_some();
        match self.tls {
            Some(false) if tls_options => {
                return Err(HandlerBuildError::InvalidConfig(
                    "tls_domain and verify_peer require tls = true".into(),
                ));
            }
            Some(false) => builder = builder.with_plain_tcp(),
            _ if tls_options => {
                builder = builder.with_tls(self.tls_domain, self.verify_peer.unwrap_or(false));
            }
            _ => {}
        }
        if let Some(severities) = self.severities {
            builder = builder.with_severities(severities);
        }
        Ok(builder.with_backoff(self.backoff))
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, HandlerBuildError> {
    value.parse().map_err(|_| {
        HandlerBuildError::InvalidConfig(format!("{key} has invalid value {value:?}"))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, HandlerBuildError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(HandlerBuildError::InvalidConfig(format!(
            "{key} must be a boolean, got {value:?}"
        ))),
    }
}

fn parse_severity(key: &str, value: &str) -> Result<u8, HandlerBuildError> {
    let severity: u8 = parse(key, value)?;
    if severity > 7 {
        return Err(HandlerBuildError::InvalidConfig(format!(
            "{key} must be a syslog severity between 0 and 7"
        )));
    }
    Ok(severity)
}

fn parse_facility(value: &str) -> Result<Facility, HandlerBuildError> {
    value
        .parse()
        .map_err(|()| HandlerBuildError::InvalidConfig(format!("unknown facility {value:?}")))
}
