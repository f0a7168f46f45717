//! Buffering and reconnection against a collector that appears late.

mod test_utils;

use std::sync::mpsc;
use std::time::Duration;

use logtest::Logger;
use rstest::rstest;
use serial_test::serial;
use syslog_forwarder::{
    BackoffOverrides, ConnectionConfig, ConnectionError, ConnectionEvents, ConnectionManager,
    ConnectionState, DropReason, LogRecord, SyslogHandlerBuilder, WriteOutcome,
};
use test_utils::{LineServer, reserve_port, wait_until};

fn builder(port: u16, initial_delay_ms: u64) -> SyslogHandlerBuilder {
    SyslogHandlerBuilder::new()
        .with_tcp("127.0.0.1", port)
        .with_plain_tcp()
        .with_program("api".into())
        .with_backoff(
            BackoffOverrides::new()
                .with_initial_delay_ms(initial_delay_ms)
                .with_max_delay_ms(initial_delay_ms.max(200)),
        )
}

#[rstest]
#[serial]
fn buffered_record_is_first_line_after_connect() {
    let port = reserve_port();
    let handler = builder(port, 20).build().expect("handler builds");
    handler.manager().on_error(|_| {});

    handler
        .log(LogRecord::new("info", "first"))
        .expect("record buffered");
    handler
        .log(LogRecord::new("info", "second"))
        .expect("record buffered");
    assert!(wait_until(Duration::from_secs(2), || {
        handler.manager().stats().buffered_records == 2
    }));

    let server = LineServer::start_on(port);
    assert!(server.next_line().ends_with("info first\r\n"));
    assert!(server.next_line().ends_with("info second\r\n"));
    assert!(wait_until(Duration::from_secs(2), || {
        handler.manager().state() == ConnectionState::Connected
    }));
    handler.close();
}

#[rstest]
#[serial]
fn close_flushes_buffer_to_late_collector() {
    let port = reserve_port();
    let handler = builder(port, 60_000).build().expect("handler builds");
    handler.manager().on_error(|_| {});

    let (tx, rx) = mpsc::channel();
    handler
        .log_with_completion(LogRecord::new("error", "last words"), move |outcome| {
            let _ = tx.send(outcome);
        })
        .expect("record buffered");
    assert!(wait_until(Duration::from_secs(2), || {
        handler.manager().stats().buffered_records == 1
    }));

    let server = LineServer::start_on(port);
    handler.close();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).expect("completion fired"),
        WriteOutcome::Delivered
    );
    assert!(server.next_line().ends_with("error last words\r\n"));
    assert_eq!(handler.manager().state(), ConnectionState::ShuttingDown);
}

#[rstest]
#[serial]
fn close_without_flush_drops_buffer() {
    let port = reserve_port();
    let handler = builder(port, 60_000)
        .with_flush_on_close(false)
        .build()
        .expect("handler builds");
    handler.manager().on_error(|_| {});

    let (tx, rx) = mpsc::channel();
    handler
        .log_with_completion(LogRecord::new("info", "discarded"), move |outcome| {
            let _ = tx.send(outcome);
        })
        .expect("record buffered");
    assert!(wait_until(Duration::from_secs(2), || {
        handler.manager().stats().buffered_records == 1
    }));

    let server = LineServer::start_on(port);
    handler.close();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).expect("completion fired"),
        WriteOutcome::Dropped(DropReason::Closed)
    );
    assert!(server.try_line(Duration::from_millis(200)).is_none());
    assert_eq!(server.connections(), 0);
}

#[rstest]
#[serial]
fn collector_hang_up_after_sending_bytes_reconnects() {
    let server = LineServer::start_hanging_up_first(b"bye\r\n");
    let events = ConnectionEvents::new();
    let (tx, rx) = mpsc::channel();
    events.on_error(move |err| {
        if matches!(err, ConnectionError::StreamEnded { .. }) {
            let _ = tx.send(());
        }
    });
    let handler = builder(server.port(), 20)
        .with_liveness_interval_ms(20)
        .with_events(events)
        .build()
        .expect("handler builds");

    rx.recv_timeout(Duration::from_secs(2))
        .expect("stream end reported");
    handler
        .log(LogRecord::new("info", "after hang-up"))
        .expect("record accepted");

    assert!(server.next_line().ends_with("info after hang-up\r\n"));
    assert_eq!(server.connections(), 2);
    handler.close();
}

#[rstest]
#[serial]
fn rejected_writes_are_summarised_in_warnings() {
    let mut logger = Logger::start();
    let port = reserve_port();
    let mut config = ConnectionConfig::new("127.0.0.1", port).with_plain_tcp();
    config.backoff.initial_delay = Duration::from_secs(60);
    config.backoff.max_delay = Duration::from_secs(60);
    let manager = ConnectionManager::new(config).expect("valid config");
    manager.on_error(|_| {});
    manager.close();
    while logger.pop().is_some() {}

    let result = manager.write(b"late\r\n".to_vec(), |_| {});
    assert_eq!(result, Err(DropReason::Closed));

    let record = logger.pop().expect("drop warning emitted");
    assert_eq!(record.level(), log::Level::Warn);
    assert!(record.args().contains("dropped 1 records"), "{}", record.args());
    assert_eq!(manager.stats().dropped, 1);
}
