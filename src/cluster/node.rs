//! Cluster nodes
//!
//! A node is a server process owning some partitions as master or replica.
//! Nodes are shared as `Arc<Node>` between partition map generations.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

/// A server in the cluster
#[derive(Debug)]
pub struct Node {
    name: String,
    address: SocketAddr,

    /// Cleared by the cluster tender when the node leaves
    active: AtomicBool,
}

impl Node {
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
            active: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.address)
    }
}
