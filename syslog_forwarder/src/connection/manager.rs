//! Public handle to a single logical connection.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Sender, TrySendError, bounded};
use log::warn;
use parking_lot::Mutex;

use crate::handlers::HandlerBuildError;
use crate::rate_limited_warner::RateLimitedWarner;

use super::{
    buffer::{DropReason, PendingWrite, WriteOutcome},
    config::ConnectionConfig,
    events::{ConnectionError, ConnectionEvents},
    state::{ConnectionState, ConnectionStats},
    transport::{Connector, TcpConnector},
    worker::{Command, WorkerShared, spawn_worker},
};

/// Owns one reconnecting connection and its outbound buffer.
///
/// The handle is `Send + Sync`; share it through an `Arc` to funnel several
/// producers into a single socket. Writes are delivered in the order the
/// `write` calls were made. Construction fails only for invalid
/// configuration; connection failures are reported through the `error`
/// event.
pub struct ConnectionManager {
    tx: Mutex<Option<Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shared: WorkerShared,
    endpoint: String,
    close_timeout: Duration,
}

impl ConnectionManager {
    /// Validate `config` and start connecting over TCP or TLS.
    pub fn new(config: ConnectionConfig) -> Result<Self, HandlerBuildError> {
        Self::with_events(config, ConnectionEvents::new())
    }

    /// Like [`new`](Self::new), with listeners registered before the first
    /// connection attempt.
    pub fn with_events(
        config: ConnectionConfig,
        events: Arc<ConnectionEvents>,
    ) -> Result<Self, HandlerBuildError> {
        let connector = TcpConnector::from_config(&config);
        Self::with_connector(config, Box::new(connector), events)
    }

    /// Start a manager that opens transports through `connector`.
    pub fn with_connector(
        config: ConnectionConfig,
        connector: Box<dyn Connector>,
        events: Arc<ConnectionEvents>,
    ) -> Result<Self, HandlerBuildError> {
        config.validate()?;
        let endpoint = connector.describe();
        let close_timeout = config.close_timeout;
        let shared = WorkerShared {
            events,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
            warner: Arc::new(RateLimitedWarner::new(config.warn_interval)),
        };
        let (tx, handle) = spawn_worker(config, connector, shared.clone())?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            shared,
            endpoint,
            close_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn events(&self) -> &ConnectionEvents {
        &self.shared.events
    }

    pub fn on_connect(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.events.on_connect(listener);
    }

    pub fn on_error(&self, listener: impl Fn(&ConnectionError) + Send + Sync + 'static) {
        self.shared.events.on_error(listener);
    }

    pub fn on_drained(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared.events.on_drained(listener);
    }

    /// Submit `payload` for delivery.
    ///
    /// `completion` runs exactly once: with [`WriteOutcome::Delivered`] after
    /// the transport accepts the bytes, or with [`WriteOutcome::Dropped`] if
    /// the payload is discarded. An `Err` means the payload was rejected
    /// immediately and `completion` has already run.
    pub fn write(
        &self,
        payload: Vec<u8>,
        completion: impl FnOnce(WriteOutcome) + Send + 'static,
    ) -> Result<(), DropReason> {
        let command = Command::Write(PendingWrite::new(payload, Box::new(completion)));
        // The lock is held across `try_send` so a concurrent `close` cannot
        // slip in between; it is released before any completion runs.
        let result = match self.tx.lock().as_ref() {
            Some(tx) => tx.try_send(command),
            None => Err(TrySendError::Disconnected(command)),
        };
        let Err(err) = result else {
            return Ok(());
        };
        let reason = if err.is_full() {
            DropReason::QueueFull
        } else {
            DropReason::Closed
        };
        match err.into_inner() {
            Command::Write(write) => self.reject(write, reason),
            Command::Close(_) => Err(reason),
        }
    }

    fn reject(&self, write: PendingWrite, reason: DropReason) -> Result<(), DropReason> {
        let warner = &self.shared.warner;
        warner.record_drop();
        warner.warn_if_due(|count| {
            warn!(
                "syslog forwarder to {} dropped {count} records ({reason})",
                self.endpoint
            );
        });
        write.complete(WriteOutcome::Dropped(reason));
        Err(reason)
    }

    /// Stop reconnecting and release the transport.
    ///
    /// With `flush_on_close`, buffered records are delivered first. Safe to
    /// call repeatedly and from event listeners.
    pub fn close(&self) {
        self.request_shutdown();
        self.join_worker();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.stats.lock().state
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.dropped = self.shared.warner.total_dropped();
        stats
    }

    fn request_shutdown(&self) {
        let Some(tx) = self.tx.lock().take() else {
            return;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if tx
            .send_timeout(Command::Close(ack_tx), self.close_timeout)
            .is_err()
        {
            return;
        }
        drop(tx);
        if self.on_worker_thread() {
            return;
        }
        let _ = ack_rx.recv_timeout(self.close_timeout);
    }

    fn join_worker(&self) {
        if self.on_worker_thread() {
            // Called from a listener; the worker exits once the listener returns.
            return;
        }
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("syslog forwarder worker thread panicked");
        }
    }

    fn on_worker_thread(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
