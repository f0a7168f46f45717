//! Handler builders and the syslog handler.
//!
//! [`SyslogHandlerBuilder`] validates user supplied options and produces a
//! [`SyslogHandler`] ready to accept records.

use std::io;

use thiserror::Error;

mod builder_macros;
pub mod syslog;
pub mod syslog_builder;

pub use syslog::{MessageFormat, SyslogHandler};
pub use syslog_builder::SyslogHandlerBuilder;

/// Errors that may occur while building a handler.
#[derive(Debug, Error)]
pub enum HandlerBuildError {
    /// Invalid user supplied configuration.
    #[error("invalid handler configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O error whilst creating the handler.
    #[error(transparent)]
    Io(#[from] io::Error),
}
