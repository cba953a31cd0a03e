//! TCP Server
//!
//! Accepts connections and serves each on its own thread. Shutting down
//! stops the accept loop and closes every open client connection, which is
//! what a client observes when a node goes away.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::server::{ConnectionHandler, MemStore};

/// Accept loop poll interval while idle
const ACCEPT_POLL: Duration = Duration::from_millis(10);

type OpenConnections = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// TCP server for a development node
pub struct Server {
    listener: TcpListener,
    store: Arc<MemStore>,
    shutdown: ShutdownHandle,
    next_id: AtomicU64,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
}

impl Server {
    /// Bind a listener; port 0 picks a free port
    pub fn bind(addr: impl ToSocketAddrs, store: Arc<MemStore>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            store,
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
                connections: Arc::new(Mutex::new(HashMap::new())),
            },
            next_id: AtomicU64::new(0),
            read_timeout_ms: 0,
            write_timeout_ms: 0,
        })
    }

    /// Idle timeouts applied to every accepted connection
    pub fn with_timeouts(mut self, read_ms: u64, write_ms: u64) -> Self {
        self.read_timeout_ms = read_ms;
        self.write_timeout_ms = write_ms;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> &Arc<MemStore> {
        &self.store
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run the accept loop until shutdown (blocking)
    pub fn run(&self) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        tracing::info!("Listening on {}", self.local_addr()?);

        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.serve(stream) {
                        tracing::warn!("Failed to serve {}: {}", peer, e);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        tracing::info!("Server stopped accepting connections");
        Ok(())
    }

    /// Run the accept loop on a background thread
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let shutdown = self.shutdown_handle();
        let thread = thread::Builder::new()
            .name(format!("meridian-node-{}", addr.port()))
            .spawn(move || {
                if let Err(e) = self.run() {
                    tracing::error!("Server error: {}", e);
                }
            })?;

        Ok(ServerHandle {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }

    fn serve(&self, stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shutdown
            .connections
            .lock()
            .insert(id, stream.try_clone()?);

        let mut handler = ConnectionHandler::new(stream, Arc::clone(&self.store))?;
        handler.set_timeouts(self.read_timeout_ms, self.write_timeout_ms)?;

        let connections = Arc::clone(&self.shutdown.connections);
        thread::spawn(move || {
            if let Err(e) = handler.handle() {
                tracing::debug!("Connection {} closed with error: {}", handler.peer_addr(), e);
            }
            connections.lock().remove(&id);
        });
        Ok(())
    }
}

/// Stops a running server from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    connections: OpenConnections,
}

impl ShutdownHandle {
    /// Stop accepting and close all open client connections
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        for (_, stream) in self.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A server running on a background thread; shut down on drop
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down and wait for the accept loop to exit
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
