//! Byte-stream transports used by the connection worker.
//!
//! [`Connector`] is the factory seam: the worker asks it for a fresh
//! [`Transport`] on every (re)connection attempt. [`TcpConnector`] is the
//! production implementation and opens either plain TCP or TLS layered over an
//! established TCP stream.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use native_tls::{TlsConnector, TlsStream};
use socket2::{SockRef, TcpKeepalive};

use super::config::{ConnectionConfig, TlsOptions};

/// A connected, writable byte stream.
pub trait Transport: Send {
    /// Write the whole buffer and flush it to the peer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Report whether the peer has closed its side of the stream.
    fn peer_closed(&mut self) -> io::Result<bool>;

    /// Half-close the stream. Errors are ignored by callers.
    fn end(&mut self) -> io::Result<()>;
}

/// Opens new [`Transport`]s for a fixed endpoint.
pub trait Connector: Send {
    fn connect(&self) -> io::Result<Box<dyn Transport>>;

    /// Human-readable endpoint description.
    fn describe(&self) -> String;
}

impl TlsOptions {
    fn connector(&self) -> io::Result<TlsConnector> {
        let mut builder = TlsConnector::builder();
        if !self.verify_peer {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        builder.build().map_err(io::Error::other)
    }
}

/// Active socket connection.
pub enum ActiveConnection {
    PlainTcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ActiveConnection {
    fn tcp(&self) -> &TcpStream {
        match self {
            ActiveConnection::PlainTcp(stream) => stream,
            ActiveConnection::Tls(stream) => stream.get_ref(),
        }
    }
}

impl Transport for ActiveConnection {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => {
                stream.write_all(buf)?;
                stream.flush()
            }
            ActiveConnection::Tls(stream) => {
                stream.write_all(buf)?;
                stream.flush()
            }
        }
    }

    fn peer_closed(&mut self) -> io::Result<bool> {
        self.tcp().set_nonblocking(true)?;
        let result = match self {
            ActiveConnection::PlainTcp(stream) => drain_until_blocked(stream),
            // Read through the TLS layer so alerts and session tickets are
            // consumed and `close_notify` surfaces as end of stream.
            ActiveConnection::Tls(stream) => drain_until_blocked(stream.as_mut()),
        };
        self.tcp().set_nonblocking(false)?;
        result
    }

    fn end(&mut self) -> io::Result<()> {
        if let ActiveConnection::Tls(stream) = self {
            // Best effort close_notify before the TCP half-close.
            let _ = stream.shutdown();
        }
        self.tcp().shutdown(Shutdown::Write)
    }
}

/// Read and discard whatever the peer sent until the socket would block.
///
/// Returns `true` once the stream reports end of file. Collectors never send
/// application data, so nothing read here is kept.
fn drain_until_blocked(stream: &mut impl Read) -> io::Result<bool> {
    let mut scratch = [0u8; 512];
    loop {
        match stream.read(&mut scratch) {
            Ok(0) => return Ok(true),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Connector for TCP endpoints with optional TLS.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: String,
    port: u16,
    tls: Option<TlsOptions>,
    connect_timeout: Duration,
    write_timeout: Duration,
    keepalive: Option<Duration>,
}

impl TcpConnector {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            tls: config.tls.clone(),
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            keepalive: config.keepalive,
        }
    }

    fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }

    fn connect_tcp(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    if let Some(idle) = self.keepalive {
                        SockRef::from(&stream)
                            .set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
                    }
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {}:{}", self.host, self.port),
            )
        }))
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let stream = self.connect_tcp()?;
        let connection = if let Some(tls) = &self.tls {
            let connector = tls.connector()?;
            stream.set_read_timeout(Some(self.connect_timeout))?;
            stream.set_write_timeout(Some(self.connect_timeout))?;
            let stream = connector
                .connect(&tls.domain, stream)
                .map_err(io::Error::other)?;
            let tcp_ref = stream.get_ref();
            tcp_ref.set_read_timeout(None)?;
            tcp_ref.set_write_timeout(Some(self.write_timeout))?;
            ActiveConnection::Tls(Box::new(stream))
        } else {
            stream.set_write_timeout(Some(self.write_timeout))?;
            ActiveConnection::PlainTcp(stream)
        };
        Ok(Box::new(connection))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
