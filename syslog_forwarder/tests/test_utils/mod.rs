//! Loopback collector used by the integration tests.
//!
//! [`LineServer`] accepts any number of connections and forwards every
//! CRLF-terminated line it reads to a channel, so tests can assert on the
//! exact bytes a handler put on the wire.

#![allow(dead_code)]

use std::{
    io::{BufRead, BufReader, Write},
    net::{SocketAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

/// How long tests wait for a line before failing.
pub const LINE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LineServer {
    addr: SocketAddr,
    lines: mpsc::Receiver<String>,
    connections: Arc<AtomicUsize>,
}

impl LineServer {
    /// Listen on an ephemeral loopback port.
    pub fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
        Self::serve(listener, None)
    }

    /// Listen on a specific loopback port, typically one from [`reserve_port`].
    pub fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).expect("bind reserved port");
        Self::serve(listener, None)
    }

    /// Like [`start`](Self::start), but the first connection is sent
    /// `farewell` and closed straight away.
    pub fn start_hanging_up_first(farewell: &'static [u8]) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
        Self::serve(listener, Some(farewell))
    }

    fn serve(listener: TcpListener, farewell: Option<&'static [u8]>) -> Self {
        let addr = listener.local_addr().expect("listener has address");
        let (tx, lines) = mpsc::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { return };
                let previous = accepted.fetch_add(1, Ordering::SeqCst);
                if let (0, Some(farewell)) = (previous, farewell) {
                    let _ = stream.write_all(farewell);
                    continue;
                }
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut reader = BufReader::new(stream);
                    loop {
                        let mut line = String::new();
                        match reader.read_line(&mut line) {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {
                                if tx.send(line).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        Self {
            addr,
            lines,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Next received line, including its `\r\n` terminator.
    pub fn next_line(&self) -> String {
        self.lines
            .recv_timeout(LINE_TIMEOUT)
            .expect("line received from handler")
    }

    pub fn try_line(&self, timeout: Duration) -> Option<String> {
        self.lines.recv_timeout(timeout).ok()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Find a loopback port with nothing listening on it.
pub fn reserve_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
    listener.local_addr().expect("listener has address").port()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
