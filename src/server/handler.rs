//! Connection Handler
//!
//! Serves requests from one client connection against a [`MemStore`].

use std::io::{self, BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MeridianError, Result};
use crate::protocol::{read_request, write_response, Response, ResultCode};
use crate::server::MemStore;

/// Handles a single client connection
pub struct ConnectionHandler {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    store: Arc<MemStore>,

    /// Peer address for logging
    peer_addr: String,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, store: Arc<MemStore>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            store,
            peer_addr,
        })
    }

    /// Configure idle read and write timeouts; zero disables a timeout
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Serve requests until the client disconnects or an error occurs
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        loop {
            let request = match read_request(&mut self.reader) {
                Ok(request) => request,
                Err(MeridianError::Io(ref e)) if is_disconnect(e) => {
                    tracing::debug!("Client {} disconnected ({:?})", self.peer_addr, e.kind());
                    return Ok(());
                }
                Err(MeridianError::Io(ref e))
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    tracing::debug!("Read timeout for client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    // The stream is no longer framed; answer once and close
                    let _ = write_response(&mut self.writer, &Response::error(ResultCode::ParameterError));
                    return Err(e);
                }
            };

            tracing::trace!(
                "Request from {}: ns={} ops={}",
                self.peer_addr,
                request.namespace,
                request.operations.len()
            );

            let response = self.store.apply(&request);

            if let Err(e) = write_response(&mut self.writer, &response) {
                if let MeridianError::Io(ref io_err) = e {
                    if is_disconnect(io_err) || io_err.kind() == io::ErrorKind::BrokenPipe {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
