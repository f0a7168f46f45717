//! Log record representation accepted by [`SyslogHandler`](crate::SyslogHandler).
//!
//! Records carry a free-form level string, a message that is either text or a
//! structured JSON value, and optional metadata. Metadata is modelled as a
//! tagged [`Meta`] so rendering can branch on the variant rather than
//! inspecting runtime types.

use std::fmt;

use serde_json::Value;

/// Message body of a record.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Text(String),
    Structured(Value),
}

impl Message {
    /// Render the message as text. Structured values are pretty-printed.
    pub fn render(&self) -> String {
        match self {
            Message::Text(text) => text.clone(),
            Message::Structured(value) => render_value(value),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Message::Text(text),
            other => Message::Structured(other),
        }
    }
}

/// Metadata attached to a record.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Meta {
    #[default]
    Absent,
    /// Primitive metadata appended inline after a space.
    Scalar(String),
    /// Object or array metadata.
    Structured(Value),
}

static ABSENT: Meta = Meta::Absent;

impl Meta {
    /// Collapse empty structured values into [`Meta::Absent`].
    pub fn normalised(&self) -> &Meta {
        match self {
            Meta::Structured(Value::Object(map)) if map.is_empty() => &ABSENT,
            Meta::Structured(Value::Array(items)) if items.is_empty() => &ABSENT,
            Meta::Structured(Value::Null) => &ABSENT,
            other => other,
        }
    }

    /// Whether the metadata contributes nothing to the rendered message.
    pub fn is_absent(&self) -> bool {
        matches!(self.normalised(), Meta::Absent)
    }
}

impl From<Value> for Meta {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Meta::Absent,
            Value::String(text) => Meta::Scalar(text),
            Value::Bool(flag) => Meta::Scalar(flag.to_string()),
            Value::Number(number) => Meta::Scalar(number.to_string()),
            structured => Meta::Structured(structured).normalised().clone(),
        }
    }
}

impl From<&str> for Meta {
    fn from(text: &str) -> Self {
        Meta::Scalar(text.to_owned())
    }
}

/// A single application log entry.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    /// Level name, possibly wrapped in ANSI colour codes.
    pub level: String,
    pub message: Message,
    pub meta: Meta,
}

impl LogRecord {
    /// Construct a record without metadata.
    pub fn new(level: &str, message: impl Into<Message>) -> Self {
        Self {
            level: level.to_owned(),
            message: message.into(),
            meta: Meta::Absent,
        }
    }

    /// Attach metadata to the record.
    pub fn with_meta(mut self, meta: impl Into<Meta>) -> Self {
        self.meta = meta.into();
        self
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.level, self.message.render())
    }
}

/// Pretty-print a JSON value; bare strings are emitted without quotes.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
