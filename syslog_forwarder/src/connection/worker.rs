//! Worker thread driving the connection state machine.
//!
//! The worker exclusively owns the transport, the retry counters, and the
//! outbound buffer. Producers reach it only through [`Command`]s on a bounded
//! channel, so the order in which writes are submitted is the order in which
//! they are buffered and drained.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvError, Sender, at, bounded, select};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::rate_limited_warner::RateLimitedWarner;

use super::{
    backoff::{AttemptOutcome, RetryState},
    buffer::{DropReason, OutboundBuffer, PendingWrite, WriteOutcome},
    config::ConnectionConfig,
    events::{ConnectionError, ConnectionEvents},
    state::{ConnectionState, ConnectionStats},
    transport::{Connector, Transport},
};

/// Stand-in retry deadline for delays too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Commands processed by the worker thread.
#[derive(Debug)]
pub enum Command {
    Write(PendingWrite),
    Close(Sender<()>),
}

/// Handles shared between the worker and its [`ConnectionManager`](super::ConnectionManager).
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub events: Arc<ConnectionEvents>,
    pub stats: Arc<Mutex<ConnectionStats>>,
    pub warner: Arc<RateLimitedWarner>,
}

pub(crate) fn spawn_worker(
    config: ConnectionConfig,
    connector: Box<dyn Connector>,
    shared: WorkerShared,
) -> std::io::Result<(Sender<Command>, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded(config.capacity);
    let worker = Worker::new(config, connector, shared);
    worker.publish();
    let handle = thread::Builder::new()
        .name("syslog-forwarder".into())
        .spawn(move || worker.run(rx))?;
    Ok((tx, handle))
}

struct Worker {
    config: ConnectionConfig,
    connector: Box<dyn Connector>,
    endpoint: String,
    shared: WorkerShared,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    retry: RetryState,
    buffer: OutboundBuffer,
    retry_at: Option<Instant>,
    shutdown: bool,
    delivered: u64,
}

impl Worker {
    fn new(config: ConnectionConfig, connector: Box<dyn Connector>, shared: WorkerShared) -> Self {
        let endpoint = connector.describe();
        let retry = RetryState::new(config.backoff.clone());
        let buffer = OutboundBuffer::new(config.max_buffer_bytes);
        Self {
            config,
            connector,
            endpoint,
            shared,
            state: ConnectionState::Connecting,
            transport: None,
            retry,
            buffer,
            retry_at: None,
            shutdown: false,
            delivered: 0,
        }
    }

    fn run(mut self, rx: Receiver<Command>) {
        loop {
            match self.state {
                ConnectionState::Connecting => self.connect(),
                ConnectionState::Connected => {
                    select! {
                        recv(rx) -> msg => self.dispatch(msg),
                        default(self.config.liveness_interval) => self.probe(),
                    }
                }
                ConnectionState::Erroring => {
                    let deadline = self.retry_at.unwrap_or_else(Instant::now);
                    select! {
                        recv(rx) -> msg => self.dispatch(msg),
                        recv(at(deadline)) -> _ => self.retry(),
                    }
                }
                ConnectionState::ShuttingDown => break,
            }
            self.publish();
        }
        self.reject_pending(&rx);
    }

    fn dispatch(&mut self, msg: Result<Command, RecvError>) {
        match msg {
            Ok(Command::Write(write)) => self.write(write),
            Ok(Command::Close(ack)) => {
                self.close();
                let _ = ack.send(());
            }
            // Every handle is gone; treat it as a close nobody waits on.
            Err(RecvError) => self.close(),
        }
    }

    fn write(&mut self, write: PendingWrite) {
        if self.state == ConnectionState::Connected && self.buffer.is_empty() {
            self.send(write);
        } else {
            self.enqueue(write);
        }
    }

    /// Write to the live transport. On failure the payload returns to the
    /// head of the buffer and the connection enters `Erroring`.
    fn send(&mut self, write: PendingWrite) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            self.enqueue(write);
            return false;
        };
        match transport.write_all(&write.payload) {
            Ok(()) => {
                self.delivered += 1;
                write.complete(WriteOutcome::Delivered);
                true
            }
            Err(source) => {
                if let Err(write) = self.buffer.push_front(write) {
                    self.drop_write(write, DropReason::BufferFull);
                }
                self.fail(ConnectionError::Transport {
                    endpoint: self.endpoint.clone(),
                    source,
                });
                false
            }
        }
    }

    fn enqueue(&mut self, write: PendingWrite) {
        if !self.retry.buffering_enabled() {
            self.drop_write(write, DropReason::BufferingDisabled);
            return;
        }
        if let Err(write) = self.buffer.push_back(write) {
            self.drop_write(write, DropReason::BufferFull);
        }
    }

    fn drop_write(&self, write: PendingWrite, reason: DropReason) {
        let warner = &self.shared.warner;
        warner.record_drop();
        warner.warn_if_due(|count| {
            warn!(
                "syslog forwarder to {} dropped {count} records ({reason})",
                self.endpoint
            );
        });
        write.complete(WriteOutcome::Dropped(reason));
    }

    /// Scheduled connection attempt; does nothing once shutdown is requested.
    fn connect(&mut self) {
        if self.shutdown {
            self.finish_shutdown();
            return;
        }
        self.open();
    }

    fn open(&mut self) {
        self.set_state(ConnectionState::Connecting);
        match self.connector.connect() {
            Ok(transport) => self.on_connected(transport),
            Err(source) => self.fail(ConnectionError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            }),
        }
    }

    fn on_connected(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
        self.retry.record_success();
        self.set_state(ConnectionState::Connected);
        debug!("syslog forwarder connected to {}", self.endpoint);
        self.shared.events.emit_connect(&self.endpoint);
        self.drain();
    }

    /// Send every buffered write in FIFO order, stopping at the first failure.
    fn drain(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        while let Some(write) = self.buffer.pop_front() {
            if !self.send(write) {
                return;
            }
        }
        self.publish();
        self.shared.events.emit_drained();
    }

    fn probe(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.peer_closed() {
            Ok(false) => {}
            Ok(true) => self.fail(ConnectionError::StreamEnded {
                endpoint: self.endpoint.clone(),
            }),
            Err(source) => self.fail(ConnectionError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            }),
        }
    }

    fn fail(&mut self, err: ConnectionError) {
        self.teardown();
        self.set_state(ConnectionState::Erroring);
        self.shared.events.report_error(&err);
        if self.shutdown {
            return;
        }
        let delay = self.retry.current_delay();
        debug!(
            "syslog forwarder retrying {} in {}ms",
            self.endpoint,
            delay.as_millis()
        );
        let now = Instant::now();
        self.retry_at = Some(now.checked_add(delay).unwrap_or(now + FAR_FUTURE));
    }

    fn retry(&mut self) {
        if self.shutdown {
            return;
        }
        self.retry_at = None;
        if let AttemptOutcome::BufferingDisabled { attempts } = self.retry.record_attempt() {
            self.shared
                .events
                .report_error(&ConnectionError::BufferingDisabled { attempts });
        }
        self.set_state(ConnectionState::Connecting);
    }

    fn close(&mut self) {
        self.shutdown = true;
        self.retry_at = None;
        if self.config.flush_on_close && !self.buffer.is_empty() && self.transport.is_none() {
            // Give buffered records the one pending attempt before teardown.
            self.open();
        }
        self.finish_shutdown();
    }

    fn finish_shutdown(&mut self) {
        let remaining: Vec<_> = self.buffer.take_all().collect();
        for write in remaining {
            self.drop_write(write, DropReason::Closed);
        }
        self.teardown();
        self.set_state(ConnectionState::ShuttingDown);
        let endpoint = &self.endpoint;
        self.shared.warner.flush(|count| {
            warn!("syslog forwarder to {endpoint} dropped {count} records before shutdown");
        });
    }

    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take()
            && let Err(err) = transport.end()
        {
            debug!("syslog forwarder ignoring teardown error: {err}");
        }
    }

    fn reject_pending(&mut self, rx: &Receiver<Command>) {
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                Command::Write(write) => self.drop_write(write, DropReason::Closed),
                Command::Close(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let mut stats = self.shared.stats.lock();
        stats.state = self.state;
        stats.total_attempts = self.retry.total_attempts();
        stats.current_delay = self.retry.current_delay();
        stats.buffering_enabled = self.retry.buffering_enabled();
        stats.buffered_records = self.buffer.len();
        stats.buffered_bytes = self.buffer.bytes();
        stats.delivered = self.delivered;
        stats.dropped = self.shared.warner.total_dropped();
    }
}
