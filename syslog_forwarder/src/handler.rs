use thiserror::Error;

use crate::log_record::LogRecord;

/// Errors returned when a handler cannot accept a record.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The queue to the connection worker is full; the record was dropped.
    #[error("handler queue is full")]
    QueueFull,
    /// The handler has been closed.
    #[error("handler is closed")]
    Closed,
}

/// Trait implemented by all log handlers.
///
/// Implementations are `Send + Sync` so one handler can be shared between
/// threads. `handle` must not block on network I/O; delivery happens on the
/// handler's own worker thread.
pub trait RecordHandler: Send + Sync {
    /// Dispatch a log record for handling.
    fn handle(&self, record: LogRecord) -> Result<(), HandlerError>;

    /// Stop accepting records and release the underlying resources.
    fn close(&self);
}
