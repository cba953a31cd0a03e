//! # Meridian
//!
//! Client for a partitioned, replicated record store:
//! - Multi-operation commands applied atomically to one record
//! - Partition-aware routing with replica failover for reads
//! - Bounded retries under a total deadline, with in-doubt write reporting
//! - Binary wire protocol over pooled TCP connections
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Client                                │
//! │             (get / put / add / delete / operate)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  CommandExecutor                             │
//! │       (encode once, attempt, classify, retry or fail)        │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │   ClusterView   │                │ ConnectionPool  │
//!   │ (partition map, │                │  (leases per    │
//!   │  error streaks) │                │      node)      │
//!   └─────────────────┘                └────────┬────────┘
//!                                               │
//!                                               ▼
//!                                      ┌─────────────────┐
//!                                      │   Wire Codec    │
//!                                      │ (request/reply) │
//!                                      └─────────────────┘
//! ```
//!
//! The `server` module holds an in-memory development node speaking the
//! same protocol.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod policy;

pub mod value;
pub mod key;
pub mod record;
pub mod operation;

pub mod protocol;
pub mod cluster;
pub mod network;
pub mod command;
pub mod client;
pub mod server;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{MeridianError, Result};
pub use config::{Config, NodeConfig};
pub use policy::{GenerationPolicy, Policy, ReadConsistency, RecordExistsAction};
pub use value::Value;
pub use key::{Digest, Key};
pub use record::{BinValue, Record};
pub use operation::{ListOperation, MapOperation, Operation, OperationType};
pub use protocol::ResultCode;
pub use command::{CancelToken, CommandExecutor, CommandKind, Outcome};
pub use client::Client;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Meridian
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
