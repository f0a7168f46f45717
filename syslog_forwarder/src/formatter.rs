//! Syslog framing of log messages.
//!
//! [`FrameEncoder`] turns a `(level, host, program, message)` tuple into one
//! wire record per message line:
//!
//! ```text
//! <PRI>TIMESTAMP HOST PROGRAM: LEVEL LINE\r\n
//! ```
//!
//! `PRI` is `facility * 8 + severity` when the level is mapped, otherwise the
//! literal level name. Lines after the first carry a four-space indent so
//! continuation lines stand out in line-oriented viewers.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::level::{Facility, SeverityMap, colorize, strip_ansi};

/// Separator terminating each wire record.
pub const RECORD_SEPARATOR: &str = "\r\n";
/// Prefix applied to continuation lines of multi-line messages.
pub const CONTINUATION_INDENT: &str = "    ";

/// Source of wall-clock timestamps for encoded records.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Formats the `LEVEL LINE` portion of a record.
pub type LineFormat = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Default line formatter producing `"{level} {line}"`.
pub fn default_line_format() -> LineFormat {
    Arc::new(|level, line| format!("{level} {line}"))
}

/// Encodes messages into CRLF-terminated syslog records.
#[derive(Clone)]
pub struct FrameEncoder {
    facility: Facility,
    severities: SeverityMap,
    colorize: bool,
    line_format: LineFormat,
    clock: Arc<dyn Clock>,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            facility: Facility::default(),
            severities: SeverityMap::default(),
            colorize: false,
            line_format: default_line_format(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.facility = facility;
        self
    }

    pub fn with_severities(mut self, severities: SeverityMap) -> Self {
        self.severities = severities;
        self
    }

    /// Show the level in ANSI colour inside the message text.
    pub fn with_colorize(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    pub fn with_line_format(mut self, line_format: LineFormat) -> Self {
        self.line_format = line_format;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn severities(&self) -> &SeverityMap {
        &self.severities
    }

    /// Encode `message` into one record per line.
    ///
    /// A trailing line break does not produce an extra record; an empty
    /// message still produces a single record with empty text.
    pub fn encode(&self, level: &str, hostname: &str, program: &str, message: &str) -> Vec<String> {
        let plain = strip_ansi(level);
        let display = self.display_level(&plain);
        split_lines(message)
            .enumerate()
            .map(|(index, line)| {
                let text = if index == 0 {
                    (self.line_format)(&display, line)
                } else {
                    (self.line_format)(&display, &format!("{CONTINUATION_INDENT}{line}"))
                };
                self.frame(&plain, hostname, program, &text)
            })
            .collect()
    }

    /// Encode pre-formatted `text` as a single record without line splitting.
    pub fn encode_whole(&self, level: &str, hostname: &str, program: &str, text: &str) -> String {
        self.frame(&strip_ansi(level), hostname, program, text)
    }

    fn display_level(&self, plain: &str) -> String {
        if self.colorize {
            colorize(plain)
        } else {
            plain.to_owned()
        }
    }

    fn priority_token(&self, plain: &str) -> String {
        match self.severities.severity(plain) {
            Some(severity) => self.facility.priority(severity).to_string(),
            None => plain.to_owned(),
        }
    }

    fn frame(&self, plain: &str, hostname: &str, program: &str, text: &str) -> String {
        let timestamp = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        format!(
            "<{}>{timestamp} {hostname} {program}: {text}{RECORD_SEPARATOR}",
            self.priority_token(plain)
        )
    }
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("facility", &self.facility)
            .field("severities", &self.severities)
            .field("colorize", &self.colorize)
            .finish()
    }
}

/// Split on `\n`, dropping the empty segment after a trailing line break.
fn split_lines(message: &str) -> impl Iterator<Item = &str> {
    message
        .strip_suffix('\n')
        .unwrap_or(message)
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}
