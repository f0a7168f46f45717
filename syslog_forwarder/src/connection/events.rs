//! Observer registry for connection lifecycle events.
//!
//! Listeners run on the connection worker thread and must not block. They may
//! register further listeners, which take effect from the next event. When an
//! error is reported and nobody is listening, a diagnostic line is written to
//! standard error instead.

use std::io;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Errors surfaced through the `error` event.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connecting or writing failed.
    #[error("transport error on {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// The peer closed the stream.
    #[error("connection to {endpoint} ended by peer")]
    StreamEnded { endpoint: String },
    /// Too many failed attempts; new writes are dropped until reconnection.
    #[error("max attempts ({attempts}) exceeded, disabling buffering")]
    BufferingDisabled { attempts: u32 },
}

type ConnectListener = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&ConnectionError) + Send + Sync>;
type DrainListener = Arc<dyn Fn() + Send + Sync>;

/// Registry of `connect`, `error`, and `drained` listeners.
#[derive(Default)]
pub struct ConnectionEvents {
    connect: RwLock<Vec<ConnectListener>>,
    error: RwLock<Vec<ErrorListener>>,
    drained: RwLock<Vec<DrainListener>>,
}

impl ConnectionEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Called with the endpoint description after every successful connect.
    pub fn on_connect(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.connect.write().push(Arc::new(listener));
    }

    pub fn on_error(&self, listener: impl Fn(&ConnectionError) + Send + Sync + 'static) {
        self.error.write().push(Arc::new(listener));
    }

    /// Called whenever the outbound buffer has been fully drained.
    pub fn on_drained(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.drained.write().push(Arc::new(listener));
    }

    pub fn has_error_listeners(&self) -> bool {
        !self.error.read().is_empty()
    }

    pub(crate) fn emit_connect(&self, description: &str) {
        for listener in snapshot(&self.connect) {
            listener(description);
        }
    }

    /// Deliver `err` to listeners, or to standard error when there are none.
    pub(crate) fn report_error(&self, err: &ConnectionError) {
        let listeners = snapshot(&self.error);
        if listeners.is_empty() {
            eprintln!("syslog_forwarder: {err}");
            return;
        }
        for listener in listeners {
            listener(err);
        }
    }

    pub(crate) fn emit_drained(&self) {
        for listener in snapshot(&self.drained) {
            listener();
        }
    }
}

/// Copy the listener list so none of them runs under the lock.
fn snapshot<T: ?Sized>(listeners: &RwLock<Vec<Arc<T>>>) -> Vec<Arc<T>> {
    listeners.read().clone()
}

impl std::fmt::Debug for ConnectionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEvents")
            .field("connect", &self.connect.read().len())
            .field("error", &self.error.read().len())
            .field("drained", &self.drained.read().len())
            .finish()
    }
}
