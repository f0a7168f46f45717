//! State machine tests driven by an in-memory connector.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use rstest::{fixture, rstest};

use super::*;

#[derive(Clone, Copy, Debug)]
enum Step {
    Refuse,
    Accept,
    /// Accept, then fail the first write.
    AcceptBroken,
    /// Accept, then report the peer as gone on the first probe.
    AcceptThenHangUp,
}

/// Bytes and teardown calls observed across every transport.
#[derive(Clone, Default)]
struct Remote {
    received: Arc<Mutex<Vec<u8>>>,
    ends: Arc<AtomicUsize>,
}

impl Remote {
    fn text(&self) -> String {
        String::from_utf8(self.received.lock().expect("remote lock").clone()).expect("utf8")
    }
}

struct MockTransport {
    remote: Remote,
    fail_next_write: bool,
    hang_up: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if std::mem::take(&mut self.fail_next_write) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        self.remote
            .received
            .lock()
            .expect("remote lock")
            .extend_from_slice(buf);
        Ok(())
    }

    fn peer_closed(&mut self) -> io::Result<bool> {
        Ok(self.hang_up.swap(false, Ordering::SeqCst))
    }

    fn end(&mut self) -> io::Result<()> {
        self.remote.ends.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::other("teardown errors are ignored"))
    }
}

/// Connector following a script, then repeating `fallback`.
struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    attempts: Arc<AtomicUsize>,
    remote: Remote,
}

impl Connector for ScriptedConnector {
    fn connect(&self) -> io::Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(self.fallback);
        let hang_up = Arc::new(AtomicBool::new(false));
        let fail_next_write = match step {
            Step::Refuse => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ));
            }
            Step::Accept => false,
            Step::AcceptBroken => true,
            Step::AcceptThenHangUp => {
                hang_up.store(true, Ordering::SeqCst);
                false
            }
        };
        Ok(Box::new(MockTransport {
            remote: self.remote.clone(),
            fail_next_write,
            hang_up,
        }))
    }

    fn describe(&self) -> String {
        "collector.test:6514".into()
    }
}

struct Harness {
    manager: ConnectionManager,
    remote: Remote,
    attempts: Arc<AtomicUsize>,
    events: Arc<ConnectionEvents>,
}

fn start(
    config: ConnectionConfig,
    script: &[Step],
    fallback: Step,
    events: Arc<ConnectionEvents>,
) -> Harness {
    let remote = Remote::default();
    let attempts = Arc::new(AtomicUsize::new(0));
    let connector = ScriptedConnector {
        script: Mutex::new(script.iter().copied().collect()),
        fallback,
        attempts: Arc::clone(&attempts),
        remote: remote.clone(),
    };
    let manager = ConnectionManager::with_connector(config, Box::new(connector), Arc::clone(&events))
        .expect("valid config");
    Harness {
        manager,
        remote,
        attempts,
        events,
    }
}

#[fixture]
fn config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new("collector.test", 6514);
    config.backoff.initial_delay = Duration::from_millis(50);
    config.backoff.max_delay = Duration::from_millis(400);
    config.liveness_interval = Duration::from_millis(20);
    config
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

type OutcomeLog = Arc<Mutex<Vec<(&'static str, WriteOutcome)>>>;

fn recording(log: &OutcomeLog, tag: &'static str) -> impl FnOnce(WriteOutcome) + Send + 'static {
    let log = Arc::clone(log);
    move |outcome| log.lock().expect("outcome lock").push((tag, outcome))
}

fn outcomes(log: &OutcomeLog) -> Vec<(&'static str, WriteOutcome)> {
    log.lock().expect("outcome lock").clone()
}

#[rstest]
fn delivers_immediately_when_connected(config: ConnectionConfig) {
    let events = ConnectionEvents::new();
    let (connected_tx, connected_rx) = mpsc::channel();
    events.on_connect(move |endpoint| {
        let _ = connected_tx.send(endpoint.to_owned());
    });
    let h = start(config, &[], Step::Accept, events);
    let endpoint = connected_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("connect event");
    assert_eq!(endpoint, "collector.test:6514");
    assert_eq!(h.manager.state(), ConnectionState::Connected);

    let log = OutcomeLog::default();
    h.manager
        .write(b"<30>hello\r\n".to_vec(), recording(&log, "hello"))
        .expect("accepted");
    assert!(wait_until(Duration::from_secs(2), || !outcomes(&log).is_empty()));
    assert_eq!(outcomes(&log), vec![("hello", WriteOutcome::Delivered)]);
    assert_eq!(h.remote.text(), "<30>hello\r\n");
}

#[rstest]
fn buffered_writes_drain_in_order(config: ConnectionConfig) {
    let events = ConnectionEvents::new();
    let (drained_tx, drained_rx) = mpsc::channel();
    events.on_drained(move || {
        let _ = drained_tx.send(());
    });
    let h = start(config, &[Step::Refuse], Step::Accept, events);

    let log = OutcomeLog::default();
    h.manager.write(b"A\r\n".to_vec(), recording(&log, "A")).expect("accepted");
    h.manager.write(b"B\r\n".to_vec(), recording(&log, "B")).expect("accepted");

    drained_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("buffer drained after reconnect");
    assert_eq!(h.remote.text(), "A\r\nB\r\n");
    assert_eq!(
        outcomes(&log),
        vec![("A", WriteOutcome::Delivered), ("B", WriteOutcome::Delivered)]
    );
    let stats = h.manager.stats();
    assert_eq!(stats.buffered_records, 0);
    assert_eq!(stats.total_attempts, 0);
}

#[rstest]
fn delay_doubles_and_stays_capped(mut config: ConnectionConfig) {
    config.backoff.initial_delay = Duration::from_millis(10);
    config.backoff.max_delay = Duration::from_millis(40);
    config.backoff.attempts_before_decay = 2;
    config.backoff.maximum_attempts = u32::MAX;
    let h = start(config, &[], Step::Refuse, ConnectionEvents::new());
    h.events.on_error(|_| {});

    let mut seen = Vec::new();
    let reached_cap = wait_until(Duration::from_secs(3), || {
        let delay = h.manager.stats().current_delay;
        seen.push(delay);
        delay == Duration::from_millis(40) && h.attempts.load(Ordering::SeqCst) >= 6
    });
    assert!(reached_cap, "delay never reached the ceiling: {seen:?}");
    assert!(seen.iter().all(|d| *d >= Duration::from_millis(10) && *d <= Duration::from_millis(40)));
}

#[rstest]
fn buffering_disabled_after_maximum_attempts(mut config: ConnectionConfig) {
    config.backoff.initial_delay = Duration::from_millis(5);
    config.backoff.max_delay = Duration::from_millis(5);
    config.backoff.maximum_attempts = 3;
    let events = ConnectionEvents::new();
    let capacity_errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&capacity_errors);
    events.on_error(move |err| {
        if matches!(err, ConnectionError::BufferingDisabled { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let h = start(config, &[], Step::Refuse, events);

    assert!(wait_until(Duration::from_secs(2), || {
        h.attempts.load(Ordering::SeqCst) >= 8
    }));
    assert!(!h.manager.stats().buffering_enabled);
    assert_eq!(capacity_errors.load(Ordering::SeqCst), 1);

    let log = OutcomeLog::default();
    h.manager
        .write(b"lost".to_vec(), recording(&log, "lost"))
        .expect("queued for the worker");
    assert!(wait_until(Duration::from_secs(2), || !outcomes(&log).is_empty()));
    assert_eq!(
        outcomes(&log),
        vec![("lost", WriteOutcome::Dropped(DropReason::BufferingDisabled))]
    );
    assert!(h.manager.stats().dropped >= 1);
}

#[rstest]
fn overflowing_the_buffer_drops_the_write(mut config: ConnectionConfig) {
    config.backoff.initial_delay = Duration::from_secs(30);
    config.backoff.max_delay = Duration::from_secs(30);
    config.max_buffer_bytes = 4;
    config.flush_on_close = false;
    let h = start(config, &[], Step::Refuse, ConnectionEvents::new());
    h.events.on_error(|_| {});

    let log = OutcomeLog::default();
    h.manager.write(b"abc".to_vec(), recording(&log, "abc")).expect("queued");
    h.manager.write(b"de".to_vec(), recording(&log, "de")).expect("queued");
    assert!(wait_until(Duration::from_secs(2), || !outcomes(&log).is_empty()));
    assert_eq!(
        outcomes(&log),
        vec![("de", WriteOutcome::Dropped(DropReason::BufferFull))]
    );
    assert!(wait_until(Duration::from_secs(2), || h.manager.stats().buffered_bytes == 3));
}

#[rstest]
fn close_flushes_buffer_before_teardown(mut config: ConnectionConfig) {
    config.backoff.initial_delay = Duration::from_secs(30);
    config.backoff.max_delay = Duration::from_secs(30);
    let events = ConnectionEvents::new();
    events.on_error(|_| {});
    let h = start(config, &[Step::Refuse], Step::Accept, events);
    assert!(wait_until(Duration::from_secs(2), || {
        h.manager.state() == ConnectionState::Erroring
    }));

    let log = OutcomeLog::default();
    h.manager.write(b"last words\r\n".to_vec(), recording(&log, "last")).expect("queued");
    assert!(wait_until(Duration::from_secs(2), || h.manager.stats().buffered_records == 1));
    h.manager.close();

    assert_eq!(outcomes(&log), vec![("last", WriteOutcome::Delivered)]);
    assert_eq!(h.remote.text(), "last words\r\n");
    assert_eq!(h.remote.ends.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.state(), ConnectionState::ShuttingDown);
}

#[rstest]
fn close_without_flush_discards_buffer(mut config: ConnectionConfig) {
    config.backoff.initial_delay = Duration::from_secs(30);
    config.backoff.max_delay = Duration::from_secs(30);
    config.flush_on_close = false;
    let events = ConnectionEvents::new();
    events.on_error(|_| {});
    let h = start(config, &[Step::Refuse], Step::Accept, events);

    let log = OutcomeLog::default();
    h.manager.write(b"pending".to_vec(), recording(&log, "pending")).expect("queued");
    assert!(wait_until(Duration::from_secs(2), || h.manager.stats().buffered_records == 1));
    h.manager.close();

    assert_eq!(
        outcomes(&log),
        vec![("pending", WriteOutcome::Dropped(DropReason::Closed))]
    );
    assert_eq!(h.remote.text(), "");
    assert_eq!(h.attempts.load(Ordering::SeqCst), 1);
}

#[rstest]
fn close_cancels_pending_retry(config: ConnectionConfig) {
    let events = ConnectionEvents::new();
    events.on_error(|_| {});
    let h = start(config, &[], Step::Refuse, events);
    assert!(wait_until(Duration::from_secs(2), || {
        h.manager.state() == ConnectionState::Erroring
    }));
    h.manager.close();
    let attempts = h.attempts.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
    assert_eq!(h.attempts.load(Ordering::SeqCst), attempts);
    h.manager.close();
    assert!(h.manager.is_closed());
}

#[rstest]
fn writes_after_close_are_rejected(config: ConnectionConfig) {
    let h = start(config, &[], Step::Accept, ConnectionEvents::new());
    h.manager.close();
    let log = OutcomeLog::default();
    let result = h.manager.write(b"late".to_vec(), recording(&log, "late"));
    assert_eq!(result, Err(DropReason::Closed));
    assert_eq!(
        outcomes(&log),
        vec![("late", WriteOutcome::Dropped(DropReason::Closed))]
    );
}

#[rstest]
fn failed_write_is_retried_after_reconnect(config: ConnectionConfig) {
    let events = ConnectionEvents::new();
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    events.on_error(move |err| {
        if matches!(err, ConnectionError::Transport { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let (connected_tx, connected_rx) = mpsc::channel();
    events.on_connect(move |_| {
        let _ = connected_tx.send(());
    });
    let h = start(config, &[Step::AcceptBroken], Step::Accept, events);
    connected_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("first connect");

    let log = OutcomeLog::default();
    h.manager.write(b"retry me\r\n".to_vec(), recording(&log, "retry")).expect("queued");
    assert!(wait_until(Duration::from_secs(2), || !outcomes(&log).is_empty()));
    assert_eq!(outcomes(&log), vec![("retry", WriteOutcome::Delivered)]);
    assert_eq!(h.remote.text(), "retry me\r\n");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.attempts.load(Ordering::SeqCst), 2);
}

#[rstest]
fn peer_hang_up_triggers_reconnect(config: ConnectionConfig) {
    let events = ConnectionEvents::new();
    let ended = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ended);
    events.on_error(move |err| {
        if matches!(err, ConnectionError::StreamEnded { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let h = start(config, &[Step::AcceptThenHangUp], Step::Accept, events);
    assert!(wait_until(Duration::from_secs(2), || {
        h.attempts.load(Ordering::SeqCst) >= 2 && h.manager.state() == ConnectionState::Connected
    }));
    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert!(h.remote.ends.load(Ordering::SeqCst) >= 1);
}

#[rstest]
fn unrepresentable_retry_delay_keeps_worker_alive(mut config: ConnectionConfig) {
    config.backoff.initial_delay = Duration::from_secs(u64::MAX);
    config.backoff.max_delay = Duration::MAX;
    let events = ConnectionEvents::new();
    events.on_error(|_| {});
    let h = start(config, &[], Step::Refuse, events);
    assert!(wait_until(Duration::from_secs(2), || {
        h.manager.state() == ConnectionState::Erroring
    }));

    let log = OutcomeLog::default();
    h.manager.write(b"parked".to_vec(), recording(&log, "parked")).expect("queued");
    assert!(wait_until(Duration::from_secs(2), || h.manager.stats().buffered_records == 1));
    h.manager.close();

    assert_eq!(
        outcomes(&log),
        vec![("parked", WriteOutcome::Dropped(DropReason::Closed))]
    );
    assert_eq!(h.attempts.load(Ordering::SeqCst), 2);
}

#[rstest]
fn rejects_invalid_config() {
    let err = ConnectionManager::new(ConnectionConfig::new("", 514)).expect_err("empty host");
    assert!(err.to_string().contains("host"));
}
