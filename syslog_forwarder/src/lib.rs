//! Buffering, reconnecting syslog forwarder.
//!
//! Records are framed as CRLF-terminated syslog lines and streamed to a remote
//! collector over TCP or TLS. While the collector is unreachable the
//! [`ConnectionManager`] buffers payloads up to a byte cap and reconnects with
//! capped exponential backoff; buffered records are delivered in submission
//! order once the connection returns.
//!
//! ```no_run
//! use syslog_forwarder::{LogRecord, SyslogHandlerBuilder};
//!
//! let handler = SyslogHandlerBuilder::new()
//!     .with_tcp("logs.example.com", 6514)
//!     .with_tls(None, true)
//!     .with_program("billing".into())
//!     .build()?;
//! handler.log(LogRecord::new("info", "invoice sent"))?;
//! handler.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod connection;
pub mod file_config;
pub mod formatter;
pub mod handler;
pub mod handlers;
pub mod level;
pub mod log_record;
pub mod rate_limited_warner;

pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionEvents, ConnectionManager, ConnectionState,
    ConnectionStats, DropReason, WriteOutcome,
};
pub use file_config::builder_from_ini;
pub use formatter::{Clock, FrameEncoder, LineFormat, SystemClock};
pub use handler::{HandlerError, RecordHandler};
pub use handlers::{
    HandlerBuildError, MessageFormat, SyslogHandler, SyslogHandlerBuilder,
    syslog_builder::{BackoffOverrides, DEFAULT_PROGRAM, default_hostname},
};
pub use level::{Facility, SeverityMap};
pub use log_record::{LogRecord, Message, Meta};
