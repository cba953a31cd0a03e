//! Connection Pool
//!
//! Leases connections to the executor for the duration of one attempt.
//!
//! ## Concurrency:
//! - Idle connections per node live in a lock-free `ArrayQueue`
//! - `open` counts connections checked out or idle, bounded per node
//! - The node table is behind a `RwLock`, written only on first contact

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;

use crate::cluster::Node;
use crate::error::{MeridianError, Result};

use super::{Connection, TcpConnection};

/// Source of connections to cluster nodes
pub trait ConnectionPool: Send + Sync {
    /// Obtain a connection to `node`, connecting within `timeout` if none is idle
    fn acquire(&self, node: &Arc<Node>, timeout: Option<Duration>) -> Result<Box<dyn Connection>>;

    /// Return a connection. Unhealthy connections are closed, not reused.
    fn release(&self, node: &Arc<Node>, connection: Box<dyn Connection>, healthy: bool);
}

/// Scoped connection lease; releases on every exit path
pub struct Lease<'a> {
    pool: &'a dyn ConnectionPool,
    node: Arc<Node>,
    connection: Option<Box<dyn Connection>>,
    healthy: bool,
}

impl<'a> Lease<'a> {
    pub fn acquire(pool: &'a dyn ConnectionPool, node: Arc<Node>, timeout: Option<Duration>) -> Result<Self> {
        let connection = pool.acquire(&node, timeout)?;
        Ok(Self {
            pool,
            node,
            connection: Some(connection),
            healthy: false,
        })
    }

    pub fn connection(&mut self) -> &mut Box<dyn Connection> {
        self.connection
            .as_mut()
            .expect("lease holds a connection until dropped")
    }

    /// The response was fully consumed; the connection may be reused
    pub fn mark_healthy(&mut self) {
        self.healthy = true;
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(&self.node, connection, self.healthy);
        }
    }
}

struct NodePool {
    idle: ArrayQueue<Box<dyn Connection>>,
    open: AtomicUsize,
}

/// TCP connection pool with a per-node connection limit
pub struct TcpConnectionPool {
    max_connections_per_node: usize,
    connect_timeout: Duration,
    nodes: RwLock<HashMap<String, Arc<NodePool>>>,
}

impl TcpConnectionPool {
    pub fn new(max_connections_per_node: usize, connect_timeout: Duration) -> Self {
        Self {
            max_connections_per_node: max_connections_per_node.max(1),
            connect_timeout,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    fn node_pool(&self, node: &Node) -> Arc<NodePool> {
        if let Some(pool) = self.nodes.read().get(node.name()) {
            return Arc::clone(pool);
        }
        let capacity = self.max_connections_per_node;
        Arc::clone(self.nodes.write().entry(node.name().to_string()).or_insert_with(|| {
            Arc::new(NodePool {
                idle: ArrayQueue::new(capacity),
                open: AtomicUsize::new(0),
            })
        }))
    }

    /// Idle connections currently pooled for a node
    pub fn idle_count(&self, node: &Node) -> usize {
        self.node_pool(node).idle.len()
    }

    /// Open connections (idle or leased) for a node
    pub fn open_count(&self, node: &Node) -> usize {
        self.node_pool(node).open.load(Ordering::Acquire)
    }
}

impl ConnectionPool for TcpConnectionPool {
    fn acquire(&self, node: &Arc<Node>, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        let pool = self.node_pool(node);

        if let Some(mut connection) = pool.idle.pop() {
            if let Err(e) = connection.set_timeout(timeout) {
                pool.open.fetch_sub(1, Ordering::AcqRel);
                tracing::trace!("Discarding idle connection to {}: {}", node, e);
                return Err(MeridianError::Connection {
                    node: node.name().to_string(),
                    source: e,
                });
            }
            return Ok(connection);
        }

        if pool.open.fetch_add(1, Ordering::AcqRel) >= self.max_connections_per_node {
            pool.open.fetch_sub(1, Ordering::AcqRel);
            return Err(MeridianError::NoMoreConnections {
                node: node.name().to_string(),
            });
        }

        let connect_timeout = match timeout {
            Some(t) if !t.is_zero() => t.min(self.connect_timeout),
            _ => self.connect_timeout,
        };

        let connected = TcpConnection::connect(node.address(), connect_timeout).and_then(|mut c| {
            c.set_timeout(timeout)?;
            Ok(c)
        });

        match connected {
            Ok(connection) => {
                tracing::trace!("Opened connection to {}", node);
                Ok(Box::new(connection))
            }
            Err(e) => {
                pool.open.fetch_sub(1, Ordering::AcqRel);
                Err(MeridianError::Connection {
                    node: node.name().to_string(),
                    source: e,
                })
            }
        }
    }

    fn release(&self, node: &Arc<Node>, connection: Box<dyn Connection>, healthy: bool) {
        let pool = self.node_pool(node);
        if healthy && node.is_active() {
            if pool.idle.push(connection).is_ok() {
                return;
            }
        } else {
            tracing::trace!("Closing connection to {}", node);
        }
        pool.open.fetch_sub(1, Ordering::AcqRel);
    }
}
