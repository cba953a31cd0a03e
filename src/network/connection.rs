//! Connections
//!
//! A connection is a byte stream to one node with a configurable timeout.
//! The executor only sees the [`Connection`] trait; [`TcpConnection`] is the
//! production implementation.

use std::fmt;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Aborts a connection's in-flight I/O from another thread
pub struct AbortHandle(Box<dyn Fn() + Send + Sync>);

impl AbortHandle {
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Box::new(abort))
    }

    pub fn abort(&self) {
        (self.0)()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// Byte stream to a node
pub trait Connection: Read + Write + Send {
    /// Apply a read/write timeout to subsequent I/O. `None` blocks indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Handle that makes blocked reads and writes fail promptly
    fn abort_handle(&self) -> Option<AbortHandle> {
        None
    }
}

/// TCP connection to a node
pub struct TcpConnection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Peer address for logging
    peer_addr: SocketAddr,
}

impl TcpConnection {
    /// Connect to `addr` within `timeout`
    pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::from_stream(stream)
    }

    /// Wrap an established stream
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            peer_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Connection for TcpConnection {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // Sockets reject a zero timeout
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.reader.get_ref().set_read_timeout(timeout)?;
        self.writer.get_ref().set_write_timeout(timeout)?;
        Ok(())
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        let stream = self.reader.get_ref().try_clone().ok()?;
        Some(AbortHandle::new(move || {
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }
}
