//! Network Module
//!
//! Connection handling between the executor and cluster nodes.
//!
//! ## Architecture
//! - `Connection`: byte stream with a per-attempt timeout and an abort handle
//! - `ConnectionPool`: leases connections per node
//! - `Lease`: scoped guard that always returns the connection to its pool

mod connection;
mod pool;

pub use connection::{AbortHandle, Connection, TcpConnection};
pub use pool::{ConnectionPool, Lease, TcpConnectionPool};
