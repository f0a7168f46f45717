//! Handler forwarding records to a remote syslog collector.
//!
//! [`SyslogHandler`] renders each [`LogRecord`] (message plus metadata),
//! frames it with a [`FrameEncoder`], and hands the bytes to a
//! [`ConnectionManager`]. Several handlers may share one manager, and so one
//! socket, through an `Arc`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::connection::{ConnectionManager, DropReason, WriteOutcome};
use crate::formatter::FrameEncoder;
use crate::handler::{HandlerError, RecordHandler};
use crate::log_record::{LogRecord, Meta, render_value};

/// Formats a whole message, sent as one record without line splitting.
///
/// Called with the record's level, its rendered message text, and its
/// metadata.
pub type MessageFormat = Arc<dyn Fn(&str, &str, &Meta) -> String + Send + Sync>;

type LoggedListener = Box<dyn Fn(&LogRecord) + Send + Sync>;

/// Presentation settings resolved by the builder.
pub(crate) struct HandlerSettings {
    pub encoder: FrameEncoder,
    pub hostname: String,
    pub program: String,
    pub level: Option<String>,
    pub inline_meta: bool,
    pub message_format: Option<MessageFormat>,
}

/// Forwards log records to a syslog endpoint over TCP or TLS.
pub struct SyslogHandler {
    manager: Arc<ConnectionManager>,
    settings: HandlerSettings,
    logged: RwLock<Vec<LoggedListener>>,
}

impl SyslogHandler {
    pub(crate) fn new(manager: Arc<ConnectionManager>, settings: HandlerSettings) -> Self {
        Self {
            manager,
            settings,
            logged: RwLock::new(Vec::new()),
        }
    }

    /// Forward `record` without tracking its delivery.
    pub fn log(&self, record: LogRecord) -> Result<(), HandlerError> {
        self.log_with_completion(record, |_| {})
    }

    /// Forward `record`, running `completion` once its bytes are written or
    /// dropped.
    ///
    /// Records less severe than the handler's level are skipped: `completion`
    /// does not run and `Ok(())` is returned. `logged` listeners fire before
    /// the payload is queued, independent of delivery.
    pub fn log_with_completion(
        &self,
        record: LogRecord,
        completion: impl FnOnce(WriteOutcome) + Send + 'static,
    ) -> Result<(), HandlerError> {
        if !self.enabled(&record.level) {
            return Ok(());
        }
        let payload = self.encode(&record);
        self.emit_logged(&record);
        self.manager
            .write(payload.into_bytes(), completion)
            .map_err(|reason| match reason {
                DropReason::QueueFull => HandlerError::QueueFull,
                _ => HandlerError::Closed,
            })
    }

    /// Register a listener fired for every record accepted by [`log`](Self::log).
    pub fn on_logged(&self, listener: impl Fn(&LogRecord) + Send + Sync + 'static) {
        self.logged.write().push(Box::new(listener));
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn hostname(&self) -> &str {
        &self.settings.hostname
    }

    pub fn program(&self) -> &str {
        &self.settings.program
    }

    /// Close the underlying connection manager.
    ///
    /// A manager shared with other handlers is closed for all of them.
    pub fn close(&self) {
        self.manager.close();
    }

    /// Whether `level` passes the configured threshold.
    ///
    /// Levels missing from the severity map are always forwarded.
    fn enabled(&self, level: &str) -> bool {
        let Some(threshold) = &self.settings.level else {
            return true;
        };
        let severities = self.settings.encoder.severities();
        match (severities.severity(level), severities.severity(threshold)) {
            (Some(record), Some(limit)) => record <= limit,
            _ => true,
        }
    }

    fn encode(&self, record: &LogRecord) -> String {
        let settings = &self.settings;
        let message = record.message.render();
        if let Some(format) = &settings.message_format {
            let text = format(&record.level, &message, &record.meta);
            return settings.encoder.encode_whole(
                &record.level,
                &settings.hostname,
                &settings.program,
                &text,
            );
        }
        let text = append_meta(message, &record.meta, settings.inline_meta);
        settings
            .encoder
            .encode(&record.level, &settings.hostname, &settings.program, &text)
            .concat()
    }

    fn emit_logged(&self, record: &LogRecord) {
        for listener in self.logged.read().iter() {
            listener(record);
        }
    }
}

impl RecordHandler for SyslogHandler {
    fn handle(&self, record: LogRecord) -> Result<(), HandlerError> {
        self.log(record)
    }

    fn close(&self) {
        SyslogHandler::close(self);
    }
}

impl std::fmt::Debug for SyslogHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyslogHandler")
            .field("endpoint", &self.manager.endpoint())
            .field("hostname", &self.settings.hostname)
            .field("program", &self.settings.program)
            .field("level", &self.settings.level)
            .finish()
    }
}

/// Append metadata to the rendered message.
///
/// Scalars follow after a space. Structured values are pretty-printed either
/// on the same line, with line breaks collapsed, or on the following lines.
fn append_meta(mut message: String, meta: &Meta, inline: bool) -> String {
    match meta.normalised() {
        Meta::Absent => {}
        Meta::Scalar(text) => {
            message.push(' ');
            message.push_str(text);
        }
        Meta::Structured(value) => {
            let pretty = render_value(value);
            if inline {
                message.push(' ');
                message.push_str(&collapse_breaks(&pretty));
            } else {
                message.push('\n');
                message.push_str(&pretty);
            }
        }
    }
    message
}

/// Replace each newline or tab, with the whitespace following it, by one space.
fn collapse_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' || c == '\t' {
            out.push(' ');
            while chars.next_if(|next| next.is_whitespace()).is_some() {}
        } else {
            out.push(c);
        }
    }
    out
}
